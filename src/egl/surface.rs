// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! EGL surfaces: windows backed by a native buffer queue, and pbuffers backed by a host color
//! buffer.

use std::sync::Arc;

use log::debug;
use log::warn;

use crate::egl::BindingState;
use crate::egl::ConfigHandle;
use crate::egl::SurfaceHandle;
use crate::egl::SurfaceType;
use crate::egl_defines::*;
use crate::gralloc::NativeBuffer;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::host_connection::HostConnection;
use crate::ipc::Transport;
use crate::native_window::NativeWindow;
use crate::sync_device::SyncDevice;
use crate::sync_device::SyncFd;

/// State every surface carries regardless of what backs it.
#[derive(Debug)]
pub struct SurfaceBase {
    pub handle: SurfaceHandle,
    pub config: ConfigHandle,
    pub config_id: EGLint,
    pub surface_type: SurfaceType,
    pub width: u32,
    pub height: u32,
    pub texture_format: EGLint,
    pub texture_target: EGLint,
    pub host_surface: u32,
    pub swap_behavior: EGLint,
    pub swap_interval: EGLint,
    pub binding: BindingState,
}

impl SurfaceBase {
    pub fn new(handle: SurfaceHandle, config: ConfigHandle, config_id: EGLint, surface_type: SurfaceType) -> SurfaceBase {
        SurfaceBase {
            handle,
            config,
            config_id,
            surface_type,
            width: 0,
            height: 0,
            texture_format: EGL_NO_TEXTURE,
            texture_target: EGL_NO_TEXTURE,
            host_surface: 0,
            swap_behavior: EGL_BUFFER_DESTROYED,
            swap_interval: 1,
            binding: BindingState::Unbound,
        }
    }
}

pub trait Surface: Send {
    fn base(&self) -> &SurfaceBase;
    fn base_mut(&mut self) -> &mut SurfaceBase;

    /// Presents the current back buffer.
    ///
    /// `sync_device` is the current context's sync device, if any, and `gles_major` the client
    /// version of the current context, which picks the encoder used to drain the host.
    fn swap_buffers(
        &mut self,
        conn: &mut HostConnection,
        sync_device: Option<&dyn SyncDevice>,
        gles_major: u32,
    ) -> GfxstreamResult<()>;

    fn set_swap_interval(&mut self, interval: EGLint) -> GfxstreamResult<()> {
        self.base_mut().swap_interval = interval;
        Ok(())
    }

    /// Host color buffer that textures can be bound from. Only pbuffers have one.
    fn color_buffer(&self) -> Option<u32> {
        None
    }

    /// Releases the host surface and everything it holds. Called once, after the surface left
    /// the display's table.
    fn destroy(&mut self, conn: &mut HostConnection) -> GfxstreamResult<()>;
}

/// A surface presenting into a native window's buffer queue.
pub struct WindowSurface {
    base: SurfaceBase,
    window: Arc<dyn NativeWindow>,
    buffer: Option<NativeBuffer>,
}

impl WindowSurface {
    /// Dequeues the first buffer, creates the host surface of the same size and points the host
    /// surface at the buffer.
    pub fn create(
        conn: &mut HostConnection,
        mut base: SurfaceBase,
        window: Arc<dyn NativeWindow>,
    ) -> GfxstreamResult<WindowSurface> {
        if !window.is_valid() {
            return Err(GfxstreamError::BadNativeWindow);
        }

        // The first buffer is written only after the host surface exists, so its acquire signal
        // can be dropped unread.
        let (buffer, _acquire) = window
            .dequeue_buffer()
            .map_err(|_| GfxstreamError::BadAlloc("window buffer"))?;
        base.width = buffer.width;
        base.height = buffer.height;

        let (mut rc, gralloc) = conn.rc_and_gralloc()?;
        let host_surface = match rc.create_window_surface(base.config_id as u32, base.width, base.height) {
            Ok(0) => Err(GfxstreamError::BadAlloc("window surface")),
            other => other,
        };
        let host_surface = match host_surface {
            Ok(host_surface) => host_surface,
            Err(e) => {
                if let Err(cancel_err) = window.cancel_buffer(buffer) {
                    warn!("failed to return window buffer: {}", cancel_err);
                }
                return Err(e);
            }
        };
        rc.set_window_color_buffer(host_surface, gralloc.host_handle(&buffer))?;
        base.host_surface = host_surface;
        window.inc_ref();

        Ok(WindowSurface {
            base,
            window,
            buffer: Some(buffer),
        })
    }

    pub fn window(&self) -> &Arc<dyn NativeWindow> {
        &self.window
    }

    /// Pushes the back buffer to the host. Returns the signal the consumer waits on, if any.
    fn drain(
        &self,
        conn: &mut HostConnection,
        sync_device: Option<&dyn SyncDevice>,
        gles_major: u32,
    ) -> GfxstreamResult<Option<SyncFd>> {
        if conn.features()?.has_native_sync() {
            return self.present_fence(conn, sync_device);
        }

        conn.rc_encoder()?
            .flush_window_color_buffer(self.base.host_surface)?;
        conn.gles_encoder(gles_major)?.finish()?;
        Ok(None)
    }

    /// Signal that fires once everything issued so far has reached the buffer.
    ///
    /// With native sync the host creates a fence that frees itself once signaled; without a sync
    /// device there is nothing to hand the consumer.
    fn present_fence(
        &self,
        conn: &mut HostConnection,
        sync_device: Option<&dyn SyncDevice>,
    ) -> GfxstreamResult<Option<SyncFd>> {
        let mut rc = conn.rc_encoder()?;
        rc.flush_window_color_buffer_async(self.base.host_surface)?;
        let host_sync = rc.create_sync(
            EGL_SYNC_NATIVE_FENCE_ANDROID,
            &[
                EGL_SYNC_NATIVE_FENCE_FD_ANDROID,
                EGL_NO_NATIVE_FENCE_FD_ANDROID,
                EGL_NONE,
            ],
            true,
        )?;

        match sync_device {
            Some(device) => Ok(Some(device.queue_work(host_sync)?)),
            None => Ok(None),
        }
    }
}

impl Surface for WindowSurface {
    fn base(&self) -> &SurfaceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SurfaceBase {
        &mut self.base
    }

    fn swap_buffers(
        &mut self,
        conn: &mut HostConnection,
        sync_device: Option<&dyn SyncDevice>,
        gles_major: u32,
    ) -> GfxstreamResult<()> {
        let buffer = self.buffer.take().ok_or(GfxstreamError::BadAccess)?;

        let fence = match self.drain(conn, sync_device, gles_major) {
            Ok(fence) => fence,
            Err(e) => {
                self.buffer = Some(buffer);
                return Err(e);
            }
        };

        self.window.queue_buffer(buffer, fence)?;

        // Without a buffer the surface can only be destroyed.
        let (next, _acquire) = self
            .window
            .dequeue_buffer()
            .map_err(|_| GfxstreamError::BadAlloc("window buffer"))?;
        let (mut rc, gralloc) = conn.rc_and_gralloc()?;
        rc.set_window_color_buffer(self.base.host_surface, gralloc.host_handle(&next))?;

        if (next.width, next.height) != (self.base.width, self.base.height) {
            debug!(
                "surface {:?} resized to {}x{}",
                self.base.handle, next.width, next.height
            );
        }
        self.base.width = next.width;
        self.base.height = next.height;
        self.buffer = Some(next);
        Ok(())
    }

    fn set_swap_interval(&mut self, interval: EGLint) -> GfxstreamResult<()> {
        self.window.set_swap_interval(interval)?;
        self.base.swap_interval = interval;
        Ok(())
    }

    fn destroy(&mut self, conn: &mut HostConnection) -> GfxstreamResult<()> {
        if let Some(buffer) = self.buffer.take() {
            if let Err(e) = self.window.cancel_buffer(buffer) {
                warn!("failed to return window buffer: {}", e);
            }
        }
        self.window.dec_ref();
        conn.rc_encoder()?
            .destroy_window_surface(self.base.host_surface)
    }
}

/// An offscreen surface rendering into a host color buffer.
pub struct PbufferSurface {
    base: SurfaceBase,
    color_buffer: u32,
    refcount_channel: Option<Box<dyn Transport>>,
}

impl PbufferSurface {
    /// Creates the host surface and its color buffer.
    ///
    /// With `use_refcount_channel` and a host that offers the channel, the color buffer is held
    /// by an open side channel instead of an explicit reference, so it is freed even if this
    /// process dies.
    pub fn create(
        conn: &mut HostConnection,
        mut base: SurfaceBase,
        width: u32,
        height: u32,
        gl_format: GLenum,
        use_refcount_channel: bool,
    ) -> GfxstreamResult<PbufferSurface> {
        base.width = width;
        base.height = height;

        let (mut rc, gralloc) = conn.rc_and_gralloc()?;
        let host_surface = match rc.create_window_surface(base.config_id as u32, width, height)? {
            0 => return Err(GfxstreamError::BadAlloc("pbuffer surface")),
            host_surface => host_surface,
        };
        let color_buffer = match gralloc.create_color_buffer(&mut rc, width, height, gl_format) {
            Ok(color_buffer) => color_buffer,
            Err(e) => {
                rc.destroy_window_surface(host_surface)?;
                return Err(e);
            }
        };
        rc.set_window_color_buffer(host_surface, color_buffer)?;
        let has_refcount_pipe = rc.features().has_refcount_pipe();
        base.host_surface = host_surface;

        let refcount_channel = match use_refcount_channel && has_refcount_pipe {
            true => match conn.open_refcount_channel()? {
                Some(mut channel) => {
                    channel.write_all(&color_buffer.to_le_bytes())?;
                    channel.flush()?;
                    Some(channel)
                }
                None => None,
            },
            false => None,
        };

        Ok(PbufferSurface {
            base,
            color_buffer,
            refcount_channel,
        })
    }

    pub fn has_refcount_channel(&self) -> bool {
        self.refcount_channel.is_some()
    }
}

impl Surface for PbufferSurface {
    fn base(&self) -> &SurfaceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SurfaceBase {
        &mut self.base
    }

    fn swap_buffers(
        &mut self,
        _conn: &mut HostConnection,
        _sync_device: Option<&dyn SyncDevice>,
        _gles_major: u32,
    ) -> GfxstreamResult<()> {
        Ok(())
    }

    fn color_buffer(&self) -> Option<u32> {
        Some(self.color_buffer)
    }

    fn destroy(&mut self, conn: &mut HostConnection) -> GfxstreamResult<()> {
        let mut rc = conn.rc_encoder()?;
        // Closing the channel drops the host reference.
        if self.refcount_channel.take().is_none() {
            rc.close_color_buffer(self.color_buffer)?;
        }
        rc.destroy_window_surface(self.base.host_surface)
    }
}
