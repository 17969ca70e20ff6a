// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! EGL entry points in their C shape: calls on the calling thread's state that report failure
//! through a sentinel return value and `egl_get_error()`.

use std::os::fd::IntoRawFd;
use std::sync::Arc;

use log::debug;

use crate::egl::ConfigHandle;
use crate::egl::ContextHandle;
use crate::egl::Display;
use crate::egl::EglThreadInfo;
use crate::egl::SurfaceHandle;
use crate::egl::SyncHandle;
use crate::egl_defines::*;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::native_window::NativeWindow;

pub type EGLDisplay = u32;

pub const EGL_NO_DISPLAY: EGLDisplay = 0;
pub const EGL_DEFAULT_DISPLAY: u32 = 0;
/// The one display handle this implementation hands out.
const DEFAULT_DISPLAY_HANDLE: EGLDisplay = 1;

/// Runs `f` on the display named by `dpy`, storing the error of a failed call and turning it into
/// `failure`.
fn call<T, F>(name: &str, dpy: EGLDisplay, failure: T, f: F) -> T
where
    F: FnOnce(&Arc<Display>, &mut EglThreadInfo) -> GfxstreamResult<T>,
{
    EglThreadInfo::with(|thread| {
        let result = match dpy {
            DEFAULT_DISPLAY_HANDLE => f(&Display::global(), thread),
            _ => Err(GfxstreamError::BadDisplay),
        };
        match thread.record(result) {
            Ok(value) => value,
            Err(e) => {
                debug!("{} failed: {}", name, e);
                failure
            }
        }
    })
}

fn boolean(result: GfxstreamResult<()>) -> GfxstreamResult<EGLBoolean> {
    result.map(|_| EGL_TRUE)
}

pub fn egl_get_error() -> EGLint {
    EglThreadInfo::with(|thread| thread.get_error())
}

pub fn egl_get_display(native_display: u32) -> EGLDisplay {
    match native_display {
        EGL_DEFAULT_DISPLAY => DEFAULT_DISPLAY_HANDLE,
        _ => EGL_NO_DISPLAY,
    }
}

pub fn egl_initialize(dpy: EGLDisplay, major: Option<&mut EGLint>, minor: Option<&mut EGLint>) -> EGLBoolean {
    let version = call("eglInitialize", dpy, None, |display, thread| {
        display.initialize(thread).map(Some)
    });
    match version {
        Some((host_major, host_minor)) => {
            if let Some(major) = major {
                *major = host_major;
            }
            if let Some(minor) = minor {
                *minor = host_minor;
            }
            EGL_TRUE
        }
        None => EGL_FALSE,
    }
}

pub fn egl_terminate(dpy: EGLDisplay) -> EGLBoolean {
    call("eglTerminate", dpy, EGL_FALSE, |display, thread| {
        boolean(display.terminate(thread))
    })
}

pub fn egl_query_string(dpy: EGLDisplay, name: EGLint) -> Option<String> {
    call("eglQueryString", dpy, None, |display, _| {
        display.query_string(name).map(Some)
    })
}

pub fn egl_get_configs(dpy: EGLDisplay) -> Option<Vec<ConfigHandle>> {
    call("eglGetConfigs", dpy, None, |display, _| {
        display.get_configs().map(Some)
    })
}

pub fn egl_choose_config(dpy: EGLDisplay, attribs: &[EGLint], max_configs: usize) -> Option<Vec<ConfigHandle>> {
    call("eglChooseConfig", dpy, None, |display, thread| {
        display.choose_config(thread, attribs, max_configs).map(Some)
    })
}

pub fn egl_get_config_attrib(dpy: EGLDisplay, config: ConfigHandle, attrib: EGLint, value: &mut EGLint) -> EGLBoolean {
    call("eglGetConfigAttrib", dpy, EGL_FALSE, |display, _| {
        *value = display.get_config_attrib(config, attrib)?;
        Ok(EGL_TRUE)
    })
}

pub fn egl_create_context(
    dpy: EGLDisplay,
    config: ConfigHandle,
    share: ContextHandle,
    attribs: &[EGLint],
) -> ContextHandle {
    call("eglCreateContext", dpy, ContextHandle::NONE, |display, thread| {
        display.create_context(thread, config, share, attribs)
    })
}

pub fn egl_destroy_context(dpy: EGLDisplay, ctx: ContextHandle) -> EGLBoolean {
    call("eglDestroyContext", dpy, EGL_FALSE, |display, thread| {
        boolean(display.destroy_context(thread, ctx))
    })
}

pub fn egl_make_current(dpy: EGLDisplay, draw: SurfaceHandle, read: SurfaceHandle, ctx: ContextHandle) -> EGLBoolean {
    call("eglMakeCurrent", dpy, EGL_FALSE, |display, thread| {
        boolean(display.make_current(thread, draw, read, ctx))
    })
}

pub fn egl_get_current_context() -> ContextHandle {
    EglThreadInfo::with(|thread| thread.current_context())
}

pub fn egl_get_current_surface(which: EGLint) -> SurfaceHandle {
    EglThreadInfo::with(|thread| {
        let display = match thread.current() {
            Some(binding) => binding.display.clone(),
            None => return SurfaceHandle::NONE,
        };
        let result = display.get_current_surface(thread, which);
        thread.record(result).unwrap_or(SurfaceHandle::NONE)
    })
}

pub fn egl_query_context(dpy: EGLDisplay, ctx: ContextHandle, attrib: EGLint, value: &mut EGLint) -> EGLBoolean {
    call("eglQueryContext", dpy, EGL_FALSE, |display, _| {
        *value = display.query_context(ctx, attrib)?;
        Ok(EGL_TRUE)
    })
}

pub fn egl_create_window_surface(
    dpy: EGLDisplay,
    config: ConfigHandle,
    window: Option<Arc<dyn NativeWindow>>,
    attribs: &[EGLint],
) -> SurfaceHandle {
    call("eglCreateWindowSurface", dpy, SurfaceHandle::NONE, |display, thread| {
        display.create_window_surface(thread, config, window, attribs)
    })
}

pub fn egl_create_pbuffer_surface(dpy: EGLDisplay, config: ConfigHandle, attribs: &[EGLint]) -> SurfaceHandle {
    call("eglCreatePbufferSurface", dpy, SurfaceHandle::NONE, |display, thread| {
        display.create_pbuffer_surface(thread, config, attribs)
    })
}

pub fn egl_destroy_surface(dpy: EGLDisplay, surface: SurfaceHandle) -> EGLBoolean {
    call("eglDestroySurface", dpy, EGL_FALSE, |display, thread| {
        boolean(display.destroy_surface(thread, surface))
    })
}

pub fn egl_swap_buffers(dpy: EGLDisplay, surface: SurfaceHandle) -> EGLBoolean {
    call("eglSwapBuffers", dpy, EGL_FALSE, |display, thread| {
        boolean(display.swap_buffers(thread, surface))
    })
}

pub fn egl_swap_interval(dpy: EGLDisplay, interval: EGLint) -> EGLBoolean {
    call("eglSwapInterval", dpy, EGL_FALSE, |display, thread| {
        boolean(display.swap_interval(thread, interval))
    })
}

pub fn egl_query_surface(dpy: EGLDisplay, surface: SurfaceHandle, attrib: EGLint, value: &mut EGLint) -> EGLBoolean {
    call("eglQuerySurface", dpy, EGL_FALSE, |display, _| {
        *value = display.query_surface(surface, attrib)?;
        Ok(EGL_TRUE)
    })
}

pub fn egl_surface_attrib(dpy: EGLDisplay, surface: SurfaceHandle, attrib: EGLint, value: EGLint) -> EGLBoolean {
    call("eglSurfaceAttrib", dpy, EGL_FALSE, |display, _| {
        boolean(display.surface_attrib(surface, attrib, value))
    })
}

pub fn egl_bind_tex_image(dpy: EGLDisplay, surface: SurfaceHandle, buffer: EGLint) -> EGLBoolean {
    call("eglBindTexImage", dpy, EGL_FALSE, |display, thread| {
        boolean(display.bind_tex_image(thread, surface, buffer))
    })
}

pub fn egl_release_tex_image(dpy: EGLDisplay, surface: SurfaceHandle, buffer: EGLint) -> EGLBoolean {
    call("eglReleaseTexImage", dpy, EGL_FALSE, |display, _| {
        boolean(display.release_tex_image(surface, buffer))
    })
}

pub fn egl_wait_client() -> EGLBoolean {
    call("eglWaitClient", DEFAULT_DISPLAY_HANDLE, EGL_FALSE, |display, thread| {
        boolean(display.wait_client(thread))
    })
}

pub fn egl_release_thread() -> EGLBoolean {
    EglThreadInfo::with(|thread| {
        let display = match thread.current() {
            Some(binding) => binding.display.clone(),
            None => return EGL_TRUE,
        };
        let result = display.release_thread(thread);
        match thread.record(result) {
            Ok(()) => EGL_TRUE,
            Err(_) => EGL_FALSE,
        }
    })
}

pub fn egl_create_sync_khr(dpy: EGLDisplay, sync_type: EGLint, attribs: &[EGLint]) -> SyncHandle {
    call("eglCreateSyncKHR", dpy, SyncHandle::NONE, |display, thread| {
        display.create_sync(thread, sync_type, attribs)
    })
}

pub fn egl_destroy_sync_khr(dpy: EGLDisplay, sync: SyncHandle) -> EGLBoolean {
    call("eglDestroySyncKHR", dpy, EGL_FALSE, |display, thread| {
        boolean(display.destroy_sync(thread, sync))
    })
}

pub fn egl_client_wait_sync_khr(dpy: EGLDisplay, sync: SyncHandle, flags: EGLint, timeout: EGLTime) -> EGLint {
    call("eglClientWaitSyncKHR", dpy, EGL_FALSE as EGLint, |display, thread| {
        display.client_wait_sync(thread, sync, flags, timeout)
    })
}

pub fn egl_wait_sync_khr(dpy: EGLDisplay, sync: SyncHandle, flags: EGLint) -> EGLint {
    call("eglWaitSyncKHR", dpy, EGL_FALSE as EGLint, |display, thread| {
        display.wait_sync(thread, sync, flags)?;
        Ok(EGL_TRUE as EGLint)
    })
}

pub fn egl_get_sync_attrib_khr(dpy: EGLDisplay, sync: SyncHandle, attrib: EGLint, value: &mut EGLint) -> EGLBoolean {
    call("eglGetSyncAttribKHR", dpy, EGL_FALSE, |display, thread| {
        *value = display.get_sync_attrib(thread, sync, attrib)?;
        Ok(EGL_TRUE)
    })
}

/// Returns a descriptor the caller owns, or `EGL_NO_NATIVE_FENCE_FD_ANDROID`.
pub fn egl_dup_native_fence_fd_android(dpy: EGLDisplay, sync: SyncHandle) -> EGLint {
    call(
        "eglDupNativeFenceFDANDROID",
        dpy,
        EGL_NO_NATIVE_FENCE_FD_ANDROID,
        |display, _| {
            let fd = display.dup_native_fence_fd(sync)?;
            Ok(std::os::fd::OwnedFd::from(fd).into_raw_fd())
        },
    )
}

/// `glGetString` of the current context. Errors are GL errors, so the EGL error is left alone.
pub fn gl_get_string(name: GLenum) -> Option<String> {
    EglThreadInfo::with(|thread| {
        let display = thread.current()?.display.clone();
        display.get_gl_string(thread, name).ok()
    })
}
