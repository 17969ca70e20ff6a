// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Context and surface entry points of the display.
//!
//! Every call validates the display and then the handles it is given before it talks to the
//! host, so a failed call leaves both the registry and the host untouched.

use std::sync::Arc;

use log::debug;
use log::warn;

use crate::egl::destroy_retired;
use crate::egl::gles_api_for;
use crate::egl::lock;
use crate::egl::parse_context_attribs;
use crate::egl::BindingState;
use crate::egl::ConfigHandle;
use crate::egl::ContextHandle;
use crate::egl::CurrentBinding;
use crate::egl::Display;
use crate::egl::EglContext;
use crate::egl::EglThreadInfo;
use crate::egl::GlLimits;
use crate::egl::PbufferSurface;
use crate::egl::Release;
use crate::egl::Retired;
use crate::egl::SharedContext;
use crate::egl::SharedGroup;
use crate::egl::SharedSurface;
use crate::egl::Surface;
use crate::egl::SurfaceBase;
use crate::egl::SurfaceHandle;
use crate::egl::SurfaceType;
use crate::egl::ThreadToken;
use crate::egl::WindowSurface;
use crate::egl_defines::*;
use crate::guest_utils::attrib_pairs;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::native_window::NativeWindow;

/// Objects a pending `make_current` moved from unbound to current.
#[derive(Default)]
struct Claims {
    context: Option<ContextHandle>,
    surfaces: Vec<SurfaceHandle>,
}

/// Binds `surface` to `thread`; also reports whether it was unbound before.
fn claim_surface(surface: &SharedSurface, thread: ThreadToken) -> GfxstreamResult<(u32, bool)> {
    let mut surface = lock(surface);
    let base = surface.base_mut();
    let claimed = base.binding == BindingState::Unbound;
    base.binding.bind(thread)?;
    Ok((base.host_surface, claimed))
}

impl Display {
    pub fn create_context(
        &self,
        thread: &mut EglThreadInfo,
        config: ConfigHandle,
        share: ContextHandle,
        attribs: &[EGLint],
    ) -> GfxstreamResult<ContextHandle> {
        let (major, minor) = parse_context_attribs(attribs)?;
        let config_id = {
            let state = self.lock_initialized()?;
            if !state.configs.is_valid(config) {
                return Err(GfxstreamError::BadConfig);
            }
            state.configs.get_attrib(config, EGL_CONFIG_ID)?
        };
        let share = match share.is_none() {
            true => None,
            false => Some(self.context(share)?),
        };

        let conn = thread.connection()?;
        let features = conn.features()?.clone();
        if !features.supports_gles(major, minor) {
            return Err(GfxstreamError::BadConfig);
        }
        // 3.x contexts run on the newest host context the host offers.
        let device_version = match major {
            3 => features.gles_max_version.major_minor(),
            _ => (major, minor),
        };

        let (share_host_context, shared) = match &share {
            Some(share) => {
                let share = lock(share);
                (share.host_context(), share.shared_group().clone())
            }
            None => (0, SharedGroup::new()),
        };

        let host_context = conn.rc_encoder()?.create_context(
            config_id as u32,
            share_host_context,
            gles_api_for(device_version.0, device_version.1),
        )?;
        if host_context == 0 {
            return Err(GfxstreamError::BadAlloc("context"));
        }
        conn.clear_gralloc_only();

        let mut state = self.lock_state();
        let handle = ContextHandle::from_raw(state.contexts.allocate_id());
        state.contexts.insert(
            handle.raw(),
            EglContext::new(
                handle,
                config,
                config_id,
                (major, minor),
                device_version,
                host_context,
                shared,
            ),
        );
        debug!(
            "created context {:?} (GLES {}.{}) on host context {}",
            handle, major, minor, host_context
        );
        Ok(handle)
    }

    /// Destroys `handle`, or marks it for destruction if it is current somewhere.
    pub fn destroy_context(&self, thread: &mut EglThreadInfo, handle: ContextHandle) -> GfxstreamResult<()> {
        let context = self.context(handle)?;
        let (release, host_context) = {
            let mut context = lock(&context);
            (context.binding_mut().request_delete(), context.host_context())
        };
        if release == Release::StillAlive {
            return Ok(());
        }

        self.lock_state().contexts.remove(handle.raw());
        thread.connection()?.rc_encoder()?.destroy_context(host_context)
    }

    pub fn make_current(
        self: &Arc<Self>,
        thread: &mut EglThreadInfo,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        ctx: ContextHandle,
    ) -> GfxstreamResult<()> {
        if ctx.is_none() && !(draw.is_none() && read.is_none()) {
            return Err(GfxstreamError::BadMatch("surfaces without a context"));
        }
        if !ctx.is_none() && draw.is_none() != read.is_none() {
            return Err(GfxstreamError::BadMatch("only one of draw and read surfaces"));
        }

        let previous = thread.current().cloned();
        if ctx.is_none() {
            return match previous {
                Some(_) => self.release_thread(thread),
                None => Ok(()),
            };
        }

        let context = self.context(ctx)?;
        let draw_surface = self.optional_surface(draw)?;
        let read_surface = self.optional_surface(read)?;

        if self.params().fast_rebind {
            if let Some(previous) = &previous {
                let same_binding = {
                    let context = lock(&context);
                    context.draw() == draw && context.read() == read
                };
                if Arc::ptr_eq(&previous.display, self) && previous.context == ctx && same_binding {
                    return Ok(());
                }
            }
        }

        let previous_host = match &previous {
            Some(previous) => previous.display.host_binding(previous),
            None => (0, 0, 0),
        };

        // The new objects are claimed before the host call so no other thread can bind them in
        // between. A failed switch hands the claims back.
        let token = thread.token();
        let mut claims = Claims::default();
        let (host_context, (major, _)) = {
            let mut context = lock(&context);
            let unbound = context.binding() == BindingState::Unbound;
            context.binding_mut().bind(token)?;
            if unbound {
                claims.context = Some(ctx);
            }
            (context.host_context(), context.client_version())
        };
        let mut host_surfaces = [0; 2];
        for (index, (handle, surface)) in [(draw, &draw_surface), (read, &read_surface)]
            .into_iter()
            .enumerate()
        {
            let surface = match surface {
                Some(surface) => surface,
                None => continue,
            };
            match claim_surface(surface, token) {
                Ok((host_surface, claimed)) => {
                    host_surfaces[index] = host_surface;
                    if claimed {
                        claims.surfaces.push(handle);
                    }
                }
                Err(e) => {
                    self.return_claims(thread, claims);
                    return Err(e);
                }
            }
        }

        let host = (host_context, host_surfaces[0], host_surfaces[1]);
        if let Err(e) = self.switch_host(thread, &context, host, previous_host) {
            self.return_claims(thread, claims);
            return Err(e);
        }
        debug!("context {:?} (GLES {}) current on {:?}", ctx, major, token);

        let retired: Vec<Retired> = match &previous {
            Some(previous) => {
                let next = match Arc::ptr_eq(&previous.display, self) {
                    true => Some((ctx, draw, read)),
                    false => None,
                };
                previous.display.unbind(previous, next)
            }
            None => Vec::new(),
        };
        lock(&context).set_surfaces(draw, read);
        thread.set_current(Some(CurrentBinding {
            display: self.clone(),
            context: ctx,
        }));

        // The host already switched, so destroy failures are only logged.
        if let Ok(conn) = thread.connection() {
            let _ = destroy_retired(conn, retired);
        }
        Ok(())
    }

    /// Makes `host` current on the host and sizes the context's client state. When sizing fails
    /// the host goes back to `previous`.
    fn switch_host(
        &self,
        thread: &mut EglThreadInfo,
        context: &SharedContext,
        host: (u32, u32, u32),
        previous: (u32, u32, u32),
    ) -> GfxstreamResult<()> {
        let conn = thread.connection()?;
        if !conn.rc_encoder()?.make_current(host.0, host.1, host.2)? {
            return Err(GfxstreamError::BadContext);
        }

        let sized = lock(context).init_client_state(|major, minor| {
            let mut gl = conn.gles_encoder(major)?;
            GlLimits::query(&mut gl, major, minor)
        });
        if sized.is_err() {
            let (context, draw, read) = previous;
            let restored = conn
                .rc_encoder()
                .and_then(|mut rc| rc.make_current(context, draw, read));
            if let Err(e) = restored {
                warn!("failed to restore the previous host binding: {}", e);
            }
        }
        sized
    }

    /// Host ids of the context and surfaces in `binding`.
    fn host_binding(&self, binding: &CurrentBinding) -> (u32, u32, u32) {
        let context = self.lock_state().contexts.get(binding.context.raw());
        let context = match context {
            Some(context) => context,
            None => return (0, 0, 0),
        };
        let (host_context, draw, read) = {
            let context = lock(&context);
            (context.host_context(), context.draw(), context.read())
        };
        let host_surface = |handle: SurfaceHandle| {
            let surface = self.lock_state().surfaces.get(handle.raw());
            surface
                .map(|surface| lock(&surface).base().host_surface)
                .unwrap_or(0)
        };
        (host_context, host_surface(draw), host_surface(read))
    }

    /// Unbinds what a failed `make_current` bound. A delete requested in the meantime happens now.
    fn return_claims(&self, thread: &mut EglThreadInfo, claims: Claims) {
        let mut retired = Vec::new();
        if let Some(handle) = claims.context {
            let context = self.lock_state().contexts.get(handle.raw());
            if let Some(context) = context {
                if lock(&context).binding_mut().release() == Release::DestroyNow {
                    self.lock_state().contexts.remove(handle.raw());
                    retired.push(Retired::Context(context));
                }
            }
        }
        for handle in claims.surfaces {
            let surface = self.lock_state().surfaces.get(handle.raw());
            if let Some(surface) = surface {
                if lock(&surface).base_mut().binding.release() == Release::DestroyNow {
                    self.lock_state().surfaces.remove(handle.raw());
                    retired.push(Retired::Surface(surface));
                }
            }
        }

        if retired.is_empty() {
            return;
        }
        match thread.connection() {
            Ok(conn) => {
                let _ = destroy_retired(conn, retired);
            }
            Err(e) => warn!("dropped objects without reaching the host: {}", e),
        }
    }

    fn optional_surface(&self, handle: SurfaceHandle) -> GfxstreamResult<Option<SharedSurface>> {
        match handle.is_none() {
            true => Ok(None),
            false => Ok(Some(self.surface(handle)?)),
        }
    }

    pub fn get_current_context(&self, thread: &EglThreadInfo) -> ContextHandle {
        match self.current_context_of(thread) {
            Some(context) => lock(&context).handle(),
            None => ContextHandle::NONE,
        }
    }

    /// Current draw (`EGL_DRAW`) or read (`EGL_READ`) surface of the thread.
    pub fn get_current_surface(&self, thread: &EglThreadInfo, which: EGLint) -> GfxstreamResult<SurfaceHandle> {
        let context = match self.current_context_of(thread) {
            Some(context) => context,
            None => return Ok(SurfaceHandle::NONE),
        };
        let context = lock(&context);
        match which {
            EGL_DRAW => Ok(context.draw()),
            EGL_READ => Ok(context.read()),
            _ => Err(GfxstreamError::BadParameter("surface selector")),
        }
    }

    pub fn query_context(&self, handle: ContextHandle, attrib: EGLint) -> GfxstreamResult<EGLint> {
        let context = self.context(handle)?;
        let context = lock(&context);
        match attrib {
            EGL_CONFIG_ID => Ok(context.config_id()),
            EGL_CONTEXT_CLIENT_TYPE => Ok(EGL_OPENGL_ES_API),
            EGL_CONTEXT_CLIENT_VERSION => Ok(context.client_version().0 as EGLint),
            EGL_RENDER_BUFFER => match context.draw().is_none() {
                true => Ok(EGL_NONE),
                false => Ok(EGL_BACK_BUFFER),
            },
            _ => Err(GfxstreamError::BadAttribute(attrib)),
        }
    }

    /// GL string of the thread's current context.
    pub fn get_gl_string(&self, thread: &mut EglThreadInfo, name: GLenum) -> GfxstreamResult<String> {
        let context = self
            .current_context_of(thread)
            .ok_or(GfxstreamError::BadContext)?;
        let conn = thread.connection()?;
        let mut rc = conn.rc_encoder()?;
        let value = lock(&context).gl_string(&mut rc, name);
        value
    }

    /// Blocks until the host has executed everything the current context issued.
    pub fn wait_client(&self, thread: &mut EglThreadInfo) -> GfxstreamResult<()> {
        let context = match self.current_context_of(thread) {
            Some(context) => context,
            None => return Ok(()),
        };
        let major = lock(&context).client_version().0;
        thread.connection()?.gles_encoder(major)?.finish()
    }

    /// Reserves a surface handle and the base state for a new surface of `config`.
    fn new_surface_base(&self, config: ConfigHandle, required: SurfaceType) -> GfxstreamResult<SurfaceBase> {
        let mut state = self.lock_initialized()?;
        if !state.configs.is_valid(config) {
            return Err(GfxstreamError::BadConfig);
        }
        let surface_type = state.configs.surface_type(config)?;
        if !surface_type.contains(required) {
            return Err(GfxstreamError::BadMatch("config lacks the surface type"));
        }
        let config_id = state.configs.get_attrib(config, EGL_CONFIG_ID)?;
        let handle = SurfaceHandle::from_raw(state.surfaces.allocate_id());
        Ok(SurfaceBase::new(handle, config, config_id, required))
    }

    fn register_surface(&self, surface: Box<dyn Surface>) -> SurfaceHandle {
        let handle = surface.base().handle;
        self.lock_state().surfaces.insert(handle.raw(), surface);
        handle
    }

    pub fn create_window_surface(
        &self,
        thread: &mut EglThreadInfo,
        config: ConfigHandle,
        window: Option<Arc<dyn NativeWindow>>,
        attribs: &[EGLint],
    ) -> GfxstreamResult<SurfaceHandle> {
        let mut base = self.new_surface_base(config, SurfaceType::WINDOW)?;
        let window = window
            .filter(|window| window.is_valid())
            .ok_or(GfxstreamError::BadNativeWindow)?;
        for (attrib, value) in attrib_pairs(attribs) {
            match (attrib, value) {
                (EGL_RENDER_BUFFER, EGL_BACK_BUFFER) => (),
                (EGL_RENDER_BUFFER, _) => return Err(GfxstreamError::BadAttribute(attrib)),
                (EGL_SWAP_BEHAVIOR, EGL_BUFFER_PRESERVED | EGL_BUFFER_DESTROYED) => {
                    base.swap_behavior = value
                }
                _ => return Err(GfxstreamError::BadAttribute(attrib)),
            }
        }

        let conn = thread.connection()?;
        let surface = WindowSurface::create(conn, base, window)?;
        conn.clear_gralloc_only();
        Ok(self.register_surface(Box::new(surface)))
    }

    pub fn create_pbuffer_surface(
        &self,
        thread: &mut EglThreadInfo,
        config: ConfigHandle,
        attribs: &[EGLint],
    ) -> GfxstreamResult<SurfaceHandle> {
        let mut width = 0;
        let mut height = 0;
        let mut texture_format = EGL_NO_TEXTURE;
        let mut texture_target = EGL_NO_TEXTURE;
        for (attrib, value) in attrib_pairs(attribs) {
            match attrib {
                EGL_WIDTH => width = value,
                EGL_HEIGHT => height = value,
                EGL_TEXTURE_FORMAT => texture_format = value,
                EGL_TEXTURE_TARGET => texture_target = value,
                EGL_LARGEST_PBUFFER | EGL_MIPMAP_TEXTURE => (),
                _ => return Err(GfxstreamError::BadAttribute(attrib)),
            }
        }
        let width = u32::try_from(width).map_err(|_| GfxstreamError::BadParameter("pbuffer width"))?;
        let height = u32::try_from(height).map_err(|_| GfxstreamError::BadParameter("pbuffer height"))?;
        if (texture_format == EGL_NO_TEXTURE) != (texture_target == EGL_NO_TEXTURE) {
            return Err(GfxstreamError::BadMatch("texture format and target"));
        }

        let mut base = self.new_surface_base(config, SurfaceType::PBUFFER)?;
        base.texture_format = texture_format;
        base.texture_target = texture_target;
        let gl_format = self.lock_initialized()?.configs.color_buffer_format(config)?;

        let conn = thread.connection()?;
        let surface = PbufferSurface::create(
            conn,
            base,
            width,
            height,
            gl_format,
            self.params().refcount_pipe,
        )?;
        conn.clear_gralloc_only();
        Ok(self.register_surface(Box::new(surface)))
    }

    /// Destroys `handle`, or marks it for destruction while a context has it bound.
    pub fn destroy_surface(&self, thread: &mut EglThreadInfo, handle: SurfaceHandle) -> GfxstreamResult<()> {
        let surface = self.surface(handle)?;
        if lock(&surface).base_mut().binding.request_delete() == Release::StillAlive {
            return Ok(());
        }

        self.lock_state().surfaces.remove(handle.raw());
        let conn = thread.connection()?;
        let result = lock(&surface).destroy(conn);
        result
    }

    pub fn swap_buffers(&self, thread: &mut EglThreadInfo, handle: SurfaceHandle) -> GfxstreamResult<()> {
        let surface = self.surface(handle)?;
        let context = self.current_context_of(thread);

        let conn = thread.connection()?;
        let mut context = context.as_ref().map(|context| lock(context));
        let major = context
            .as_ref()
            .map(|context| context.client_version().0)
            .unwrap_or(2);
        let sync_device = match context.as_mut() {
            Some(context) => context.sync_device(&self.params().sync_device),
            None => None,
        };
        let result = lock(&surface).swap_buffers(conn, sync_device, major);
        result
    }

    /// Sets the swap interval of the current draw surface.
    pub fn swap_interval(&self, thread: &mut EglThreadInfo, interval: EGLint) -> GfxstreamResult<()> {
        let context = self
            .current_context_of(thread)
            .ok_or(GfxstreamError::BadContext)?;
        let draw = lock(&context).draw();
        if draw.is_none() {
            return Err(GfxstreamError::BadSurface);
        }
        let surface = self.surface(draw)?;

        lock(&surface).set_swap_interval(interval)?;
        thread
            .connection()?
            .rc_encoder()?
            .fb_set_swap_interval(interval)
    }

    pub fn query_surface(&self, handle: SurfaceHandle, attrib: EGLint) -> GfxstreamResult<EGLint> {
        let surface = self.surface(handle)?;
        let surface = lock(&surface);
        let base = surface.base();
        match attrib {
            EGL_WIDTH => Ok(base.width.try_into()?),
            EGL_HEIGHT => Ok(base.height.try_into()?),
            EGL_CONFIG_ID => Ok(base.config_id),
            EGL_TEXTURE_FORMAT => Ok(base.texture_format),
            EGL_TEXTURE_TARGET => Ok(base.texture_target),
            EGL_SWAP_BEHAVIOR => Ok(base.swap_behavior),
            EGL_RENDER_BUFFER => Ok(EGL_BACK_BUFFER),
            EGL_LARGEST_PBUFFER | EGL_MIPMAP_TEXTURE => Ok(EGL_FALSE as EGLint),
            _ => Err(GfxstreamError::BadAttribute(attrib)),
        }
    }

    pub fn surface_attrib(&self, handle: SurfaceHandle, attrib: EGLint, value: EGLint) -> GfxstreamResult<()> {
        let surface = self.surface(handle)?;
        let mut surface = lock(&surface);
        match (attrib, value) {
            (EGL_SWAP_BEHAVIOR, EGL_BUFFER_PRESERVED | EGL_BUFFER_DESTROYED) => {
                surface.base_mut().swap_behavior = value;
                Ok(())
            }
            (EGL_SWAP_BEHAVIOR, _) => Err(GfxstreamError::BadParameter("swap behavior")),
            _ => Err(GfxstreamError::BadAttribute(attrib)),
        }
    }

    /// Checks that `handle` is a pbuffer that can be bound as a texture; returns its color buffer.
    fn texture_color_buffer(&self, handle: SurfaceHandle, buffer: EGLint) -> GfxstreamResult<u32> {
        let surface = self.surface(handle)?;
        if buffer != EGL_BACK_BUFFER {
            return Err(GfxstreamError::BadParameter("texture buffer"));
        }
        let surface = lock(&surface);
        let color_buffer = surface.color_buffer().ok_or(GfxstreamError::BadSurface)?;
        if surface.base().texture_format == EGL_NO_TEXTURE {
            return Err(GfxstreamError::BadMatch("surface has no texture format"));
        }
        Ok(color_buffer)
    }

    pub fn bind_tex_image(&self, thread: &mut EglThreadInfo, handle: SurfaceHandle, buffer: EGLint) -> GfxstreamResult<()> {
        let color_buffer = self.texture_color_buffer(handle, buffer)?;
        if !thread.connection()?.rc_encoder()?.bind_texture(color_buffer)? {
            return Err(GfxstreamError::BadAlloc("texture binding"));
        }
        Ok(())
    }

    pub fn release_tex_image(&self, handle: SurfaceHandle, buffer: EGLint) -> GfxstreamResult<()> {
        self.texture_color_buffer(handle, buffer).map(|_| ())
    }
}
