// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest-visible handles and the tables that own the objects behind them.

use std::collections::BTreeMap as Map;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

macro_rules! egl_handle {
    ($(#[$attr:meta])* $name:ident, $none:literal) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            #[doc = $none]
            pub const NONE: $name = $name(0);

            pub fn from_raw(raw: u32) -> $name {
                $name(raw)
            }

            pub fn raw(&self) -> u32 {
                self.0
            }

            pub fn is_none(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

egl_handle!(
    /// Names a context in the display's context table.
    ContextHandle,
    "`EGL_NO_CONTEXT`"
);
egl_handle!(
    /// Names a window or pbuffer surface in the display's surface table.
    SurfaceHandle,
    "`EGL_NO_SURFACE`"
);
egl_handle!(
    /// Names a sync object in the display's sync table.
    SyncHandle,
    "`EGL_NO_SYNC_KHR`"
);
egl_handle!(
    /// One plus the index of a config in the host config table.
    ConfigHandle,
    "`EGL_NO_CONFIG_KHR`"
);

impl ConfigHandle {
    pub fn from_index(index: usize) -> ConfigHandle {
        ConfigHandle(index as u32 + 1)
    }

    pub fn index(&self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

/// Locks an object mutex. A panic while the lock was held leaves the object as it was at the
/// panic; the registry keeps serving it rather than poisoning every later call.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Live objects of one kind, keyed by handle. Ids are never reused, so a stale handle can't alias
/// a newer object.
pub struct ObjectTable<T> {
    objects: Map<u32, Arc<Mutex<T>>>,
    id_allocator: u32,
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self {
        ObjectTable {
            objects: Default::default(),
            id_allocator: 0,
        }
    }
}

impl<T> ObjectTable<T> {
    pub fn allocate_id(&mut self) -> u32 {
        self.id_allocator += 1;
        self.id_allocator
    }

    pub fn insert(&mut self, id: u32, object: T) -> Arc<Mutex<T>> {
        let object = Arc::new(Mutex::new(object));
        self.objects.insert(id, object.clone());
        object
    }

    pub fn get(&self, id: u32) -> Option<Arc<Mutex<T>>> {
        self.objects.get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Arc<Mutex<T>>> {
        self.objects.remove(&id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_not_reused() {
        let mut table: ObjectTable<u8> = Default::default();
        let first = table.allocate_id();
        table.insert(first, 1);
        table.remove(first);

        let second = table.allocate_id();
        assert_ne!(first, second);
        assert!(!table.contains(first));
        assert!(table.get(first).is_none());
    }

    #[test]
    fn config_handles_are_one_based() {
        assert!(ConfigHandle::NONE.index().is_none());
        assert_eq!(ConfigHandle::from_index(0).raw(), 1);
        assert_eq!(ConfigHandle::from_index(4).index(), Some(4));
    }
}
