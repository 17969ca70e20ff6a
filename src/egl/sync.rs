// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fence and native fence sync objects.

use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use log::warn;

use crate::egl::lock;
use crate::egl::Display;
use crate::egl::EglThreadInfo;
use crate::egl::SyncHandle;
use crate::egl_defines::*;
use crate::guest_utils::attrib_pairs;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::sync_device::SyncFd;

pub struct EglSync {
    /// Zero when no host object backs this sync.
    host_sync: u64,
    thread_handle: u64,
    sync_type: EGLint,
    condition: EGLint,
    status: EGLint,
    fd: Option<SyncFd>,
}

impl EglSync {
    pub fn sync_type(&self) -> EGLint {
        self.sync_type
    }

    pub fn host_sync(&self) -> u64 {
        self.host_sync
    }

    pub fn thread_handle(&self) -> u64 {
        self.thread_handle
    }

    pub fn is_signaled(&self) -> bool {
        self.status == EGL_SIGNALED_KHR
    }

    pub fn fd(&self) -> Option<&SyncFd> {
        self.fd.as_ref()
    }
}

/// Converts an `EGLTimeKHR` in nanoseconds to a poll timeout.
fn wait_timeout(timeout: EGLTime) -> Option<Duration> {
    match timeout {
        EGL_FOREVER_KHR => None,
        nanos => Some(Duration::from_nanos(nanos)),
    }
}

impl Display {
    fn sync(&self, handle: SyncHandle) -> GfxstreamResult<Arc<Mutex<EglSync>>> {
        self.lock_initialized()?
            .syncs
            .get(handle.raw())
            .ok_or(GfxstreamError::BadParameter("sync"))
    }

    /// Looks up a sync for the calls that treat null and destroyed handles as already signaled.
    fn sync_or_signaled(&self, handle: SyncHandle) -> GfxstreamResult<Option<Arc<Mutex<EglSync>>>> {
        let state = self.lock_initialized()?;
        Ok(state.syncs.get(handle.raw()))
    }

    pub fn create_sync(
        &self,
        thread: &mut EglThreadInfo,
        sync_type: EGLint,
        attribs: &[EGLint],
    ) -> GfxstreamResult<SyncHandle> {
        self.lock_initialized()?;

        let sync = match sync_type {
            EGL_SYNC_FENCE_KHR => self.create_fence(thread, attribs)?,
            EGL_SYNC_NATIVE_FENCE_ANDROID => self.create_native_fence(thread, attribs)?,
            _ => return Err(GfxstreamError::BadAttribute(sync_type)),
        };

        let mut state = self.lock_state();
        let id = state.syncs.allocate_id();
        state.syncs.insert(id, sync);
        Ok(SyncHandle::from_raw(id))
    }

    fn create_fence(&self, thread: &mut EglThreadInfo, attribs: &[EGLint]) -> GfxstreamResult<EglSync> {
        if let Some((attrib, _)) = attrib_pairs(attribs).next() {
            return Err(GfxstreamError::BadAttribute(attrib));
        }

        let major = self.current_client_major(thread);
        let conn = thread.connection()?;
        let mut sync = EglSync {
            host_sync: 0,
            thread_handle: 0,
            sync_type: EGL_SYNC_FENCE_KHR,
            condition: EGL_SYNC_PRIOR_COMMANDS_COMPLETE_KHR,
            status: EGL_UNSIGNALED_KHR,
            fd: None,
        };

        if conn.features()?.has_native_sync() {
            let host = conn
                .rc_encoder()?
                .create_sync(EGL_SYNC_FENCE_KHR, &[EGL_NONE], false)?;
            sync.host_sync = host.sync_handle;
            sync.thread_handle = host.thread_handle;
        } else {
            // Nothing on the host can be waited on later, so wait now.
            conn.gles_encoder(major)?.finish()?;
            sync.status = EGL_SIGNALED_KHR;
        }

        Ok(sync)
    }

    fn create_native_fence(&self, thread: &mut EglThreadInfo, attribs: &[EGLint]) -> GfxstreamResult<EglSync> {
        let mut fence_fd = EGL_NO_NATIVE_FENCE_FD_ANDROID;
        for (attrib, value) in attrib_pairs(attribs) {
            match attrib {
                EGL_SYNC_NATIVE_FENCE_FD_ANDROID => fence_fd = value,
                _ => return Err(GfxstreamError::BadAttribute(attrib)),
            }
        }
        if fence_fd < 0 && fence_fd != EGL_NO_NATIVE_FENCE_FD_ANDROID {
            return Err(GfxstreamError::BadAttribute(EGL_SYNC_NATIVE_FENCE_FD_ANDROID));
        }

        let binding = thread.current().cloned();
        let conn = thread.connection()?;
        if !conn.features()?.has_native_sync() {
            return Err(GfxstreamError::BadAttribute(EGL_SYNC_NATIVE_FENCE_ANDROID));
        }

        let mut sync = EglSync {
            host_sync: 0,
            thread_handle: 0,
            sync_type: EGL_SYNC_NATIVE_FENCE_ANDROID,
            condition: EGL_SYNC_NATIVE_FENCE_SIGNALED_ANDROID,
            status: EGL_UNSIGNALED_KHR,
            fd: None,
        };

        if fence_fd != EGL_NO_NATIVE_FENCE_FD_ANDROID {
            // SAFETY:
            // Safe because the caller hands ownership of the descriptor to the sync object, as
            // EGL_ANDROID_native_fence_sync requires.
            let fd = unsafe { OwnedFd::from_raw_fd(fence_fd as RawFd) };
            sync.fd = Some(SyncFd::new(fd));
            return Ok(sync);
        }

        let host = conn
            .rc_encoder()?
            .create_sync(EGL_SYNC_NATIVE_FENCE_ANDROID, attribs, false)?;
        sync.host_sync = host.sync_handle;
        sync.thread_handle = host.thread_handle;

        // The sync device belongs to the current context.
        let context = binding
            .filter(|binding| std::ptr::eq(Arc::as_ptr(&binding.display), self))
            .and_then(|binding| self.lock_state().contexts.get(binding.context.raw()));
        match context {
            Some(context) => {
                let mut context = lock(&context);
                match context.sync_device(&self.params().sync_device) {
                    Some(device) => sync.fd = Some(device.queue_work(host)?),
                    None => warn!("native fence created without a sync device"),
                }
            }
            None => debug!("native fence created without a current context"),
        }

        Ok(sync)
    }

    /// Blocks until `handle` signals or `timeout` nanoseconds pass.
    pub fn client_wait_sync(
        &self,
        thread: &mut EglThreadInfo,
        handle: SyncHandle,
        flags: EGLint,
        timeout: EGLTime,
    ) -> GfxstreamResult<EGLint> {
        let sync = match self.sync_or_signaled(handle)? {
            Some(sync) => sync,
            None => return Ok(EGL_CONDITION_SATISFIED_KHR),
        };
        let mut sync = lock(&sync);
        if sync.is_signaled() {
            return Ok(EGL_CONDITION_SATISFIED_KHR);
        }

        let conn = thread.connection()?;
        let result = if sync.host_sync != 0 && conn.features()?.has_native_sync() {
            conn.rc_encoder()?
                .client_wait_sync(sync.host_sync, flags, timeout)?
        } else if let Some(fd) = &sync.fd {
            match fd.wait(wait_timeout(timeout))? {
                true => EGL_CONDITION_SATISFIED_KHR,
                false => EGL_TIMEOUT_EXPIRED_KHR,
            }
        } else {
            EGL_CONDITION_SATISFIED_KHR
        };

        if result == EGL_CONDITION_SATISFIED_KHR {
            sync.status = EGL_SIGNALED_KHR;
        }
        Ok(result)
    }

    /// Makes the host wait for `handle` before running later commands; the guest doesn't block.
    pub fn wait_sync(&self, thread: &mut EglThreadInfo, handle: SyncHandle, flags: EGLint) -> GfxstreamResult<()> {
        let sync = match self.sync_or_signaled(handle)? {
            Some(sync) => sync,
            None => return Ok(()),
        };
        let host_sync = {
            let sync = lock(&sync);
            match sync.is_signaled() {
                true => 0,
                false => sync.host_sync,
            }
        };

        let conn = thread.connection()?;
        if host_sync != 0 && conn.features()?.has_native_sync_v3() {
            conn.rc_encoder()?.wait_sync(host_sync, flags)?;
        }
        Ok(())
    }

    pub fn get_sync_attrib(&self, thread: &mut EglThreadInfo, handle: SyncHandle, attrib: EGLint) -> GfxstreamResult<EGLint> {
        let sync = self.sync(handle)?;
        let mut sync = lock(&sync);
        match attrib {
            EGL_SYNC_TYPE_KHR => Ok(sync.sync_type),
            EGL_SYNC_CONDITION_KHR => Ok(sync.condition),
            EGL_SYNC_STATUS_KHR => {
                if !sync.is_signaled() && self.poll_signaled(thread, &sync)? {
                    sync.status = EGL_SIGNALED_KHR;
                }
                Ok(sync.status)
            }
            _ => Err(GfxstreamError::BadAttribute(attrib)),
        }
    }

    /// Asks whoever can tell whether `sync` has signaled, without blocking.
    fn poll_signaled(&self, thread: &mut EglThreadInfo, sync: &EglSync) -> GfxstreamResult<bool> {
        if sync.host_sync != 0 {
            let conn = thread.connection()?;
            let features = conn.features()?.clone();
            let mut rc = conn.rc_encoder()?;
            if features.has_native_sync_v4() {
                return rc.is_sync_signaled(sync.host_sync);
            }
            if features.has_native_sync() {
                let result = rc.client_wait_sync(sync.host_sync, 0, 0)?;
                return Ok(result == EGL_CONDITION_SATISFIED_KHR);
            }
        }

        match &sync.fd {
            Some(fd) => fd.wait(Some(Duration::ZERO)),
            None => Ok(false),
        }
    }

    /// Returns a new descriptor for the sync's signal, owned by the caller.
    pub fn dup_native_fence_fd(&self, handle: SyncHandle) -> GfxstreamResult<SyncFd> {
        let sync = self.sync(handle)?;
        let sync = lock(&sync);
        match &sync.fd {
            Some(fd) => fd.try_clone(),
            None => Err(GfxstreamError::BadParameter("sync has no native fence")),
        }
    }

    pub fn destroy_sync(&self, thread: &mut EglThreadInfo, handle: SyncHandle) -> GfxstreamResult<()> {
        if handle.is_none() {
            return Ok(());
        }

        let sync = self
            .lock_initialized()?
            .syncs
            .remove(handle.raw())
            .ok_or(GfxstreamError::BadParameter("sync"))?;
        let host_sync = {
            let mut sync = lock(&sync);
            sync.fd = None;
            sync.host_sync
        };

        if host_sync != 0 {
            let conn = thread.connection()?;
            if conn.features()?.has_native_sync() {
                conn.rc_encoder()?.destroy_sync(host_sync)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_means_no_timeout() {
        assert_eq!(wait_timeout(EGL_FOREVER_KHR), None);
        assert_eq!(wait_timeout(1_000_000), Some(Duration::from_millis(1)));
    }
}
