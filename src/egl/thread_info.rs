// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cell::RefCell;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::error;
use log::warn;

use crate::egl::ContextHandle;
use crate::egl::Display;
use crate::egl_defines::*;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::host_connection::HostConnection;
use crate::parameters::ConnectionParameters;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identifies one `EglThreadInfo`, and so one guest thread, for as long as the process lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadToken(u64);

impl ThreadToken {
    pub fn new() -> ThreadToken {
        ThreadToken(NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// The context a thread has current, and on which display.
#[derive(Clone)]
pub struct CurrentBinding {
    pub display: Arc<Display>,
    pub context: ContextHandle,
}

/// Builds the host connection of a thread on its first EGL call.
pub type Connector = Box<dyn FnMut() -> GfxstreamResult<HostConnection> + Send>;

/// Per-thread EGL bookkeeping: host connection, current context and last error.
///
/// Dropping it releases whatever the thread still has current, so a thread that exits without
/// tearing down EGL leaks no host contexts.
pub struct EglThreadInfo {
    token: ThreadToken,
    connector: Connector,
    connection: Option<HostConnection>,
    connection_failure_logged: bool,
    current: Option<CurrentBinding>,
    error: EGLint,
}

thread_local! {
    static THREAD_INFO: RefCell<EglThreadInfo> = RefCell::new(
        EglThreadInfo::from_parameters(ConnectionParameters::global())
    );
}

impl EglThreadInfo {
    pub fn new(connector: Connector) -> EglThreadInfo {
        EglThreadInfo {
            token: ThreadToken::new(),
            connector,
            connection: None,
            connection_failure_logged: false,
            current: None,
            error: EGL_SUCCESS,
        }
    }

    pub fn from_parameters(params: ConnectionParameters) -> EglThreadInfo {
        EglThreadInfo::new(Box::new(move || HostConnection::new(&params)))
    }

    /// Runs `f` with the calling thread's info, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if called from within `f`, or after the thread's locals were destroyed. Without
    /// thread bookkeeping no EGL state can be tracked, so there is nothing to recover to.
    pub fn with<F, R>(f: F) -> R
    where
        F: FnOnce(&mut EglThreadInfo) -> R,
    {
        THREAD_INFO.with(|info| f(&mut info.borrow_mut()))
    }

    /// Replaces how this thread reaches the host. An existing connection is dropped; the next call
    /// that needs one uses `connector`.
    pub fn set_connector(&mut self, connector: Connector) {
        self.connector = connector;
        self.connection = None;
        self.connection_failure_logged = false;
    }

    pub fn token(&self) -> ThreadToken {
        self.token
    }

    /// Returns the thread's host connection, connecting on first use.
    ///
    /// A failed connect is logged once per thread and reported as `ConnectionUnavailable`; the
    /// next call tries again.
    pub fn connection(&mut self) -> GfxstreamResult<&mut HostConnection> {
        if self.connection.is_none() {
            match (self.connector)() {
                Ok(connection) => self.connection = Some(connection),
                Err(e) => {
                    if !self.connection_failure_logged {
                        error!("failed to connect to the host renderer: {}", e);
                        self.connection_failure_logged = true;
                    }
                    return Err(GfxstreamError::ConnectionUnavailable);
                }
            }
        }

        self.connection
            .as_mut()
            .ok_or(GfxstreamError::ConnectionUnavailable)
    }

    /// Returns the connection only if one was already made.
    pub fn existing_connection(&mut self) -> Option<&mut HostConnection> {
        self.connection.as_mut()
    }

    pub fn drop_connection(&mut self) {
        self.connection = None;
    }

    pub fn current(&self) -> Option<&CurrentBinding> {
        self.current.as_ref()
    }

    pub fn current_context(&self) -> ContextHandle {
        self.current
            .as_ref()
            .map(|binding| binding.context)
            .unwrap_or(ContextHandle::NONE)
    }

    pub(crate) fn set_current(&mut self, current: Option<CurrentBinding>) {
        self.current = current;
    }

    /// Returns the last error and resets it to `EGL_SUCCESS`.
    pub fn get_error(&mut self) -> EGLint {
        std::mem::replace(&mut self.error, EGL_SUCCESS)
    }

    pub fn set_error(&mut self, error: EGLint) {
        self.error = error;
    }

    /// Stores the EGL code of a failed result as the thread's last error.
    pub(crate) fn record<T>(&mut self, result: GfxstreamResult<T>) -> GfxstreamResult<T> {
        if let Err(ref e) = result {
            self.error = e.egl_error();
        }
        result
    }
}

impl Drop for EglThreadInfo {
    fn drop(&mut self) {
        if let Some(binding) = self.current.clone() {
            if let Err(e) = binding.display.release_thread(self) {
                warn!("failed to release context on thread exit: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_error_resets() {
        let mut info = EglThreadInfo::new(Box::new(|| Err(GfxstreamError::ConnectionUnavailable)));
        assert_eq!(info.get_error(), EGL_SUCCESS);
        let _ = info.record::<()>(Err(GfxstreamError::BadSurface));
        assert_eq!(info.get_error(), EGL_BAD_SURFACE);
        assert_eq!(info.get_error(), EGL_SUCCESS);
    }

    #[test]
    fn failed_connect_is_retried() {
        let mut attempts = 0;
        let mut info = EglThreadInfo::new(Box::new(move || {
            attempts += 1;
            Err(GfxstreamError::IoError(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )))
        }));
        assert!(matches!(
            info.connection(),
            Err(GfxstreamError::ConnectionUnavailable)
        ));
        assert!(info.connection().is_err());
        assert!(info.existing_connection().is_none());
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(ThreadToken::new(), ThreadToken::new());
    }
}
