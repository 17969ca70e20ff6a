// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! EGL contexts: binding state, shared namespaces and per-context client state.

use std::collections::BTreeMap as Map;
use std::sync::Arc;
use std::sync::Mutex;

use crate::egl::lock;
use crate::egl::ConfigHandle;
use crate::egl::ContextHandle;
use crate::egl::SurfaceHandle;
use crate::egl::ThreadToken;
use crate::egl_defines::*;
use crate::gles_encoder::GlesEncoder;
use crate::guest_utils::attrib_pairs;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::GLES_API_2;
use crate::ipc::GLES_API_3_0;
use crate::ipc::GLES_API_3_1;
use crate::ipc::GLES_API_CM;
use crate::parameters::SyncDeviceKind;
use crate::render_control::RenderControlEncoder;
use crate::sync_device::open_sync_device;
use crate::sync_device::SyncDevice;

/// Where an object stands with respect to being current on a thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Current(ThreadToken),
    /// Destroy was requested while current. The object keeps working until it is released.
    PendingDelete(ThreadToken),
    Destroyed,
}

/// Outcome of a transition that may end an object's life.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Release {
    StillAlive,
    DestroyNow,
}

impl BindingState {
    pub fn is_current(&self) -> bool {
        matches!(
            self,
            BindingState::Current(_) | BindingState::PendingDelete(_)
        )
    }

    pub fn is_delete_pending(&self) -> bool {
        matches!(self, BindingState::PendingDelete(_))
    }

    pub fn current_thread(&self) -> Option<ThreadToken> {
        match self {
            BindingState::Current(thread) | BindingState::PendingDelete(thread) => Some(*thread),
            _ => None,
        }
    }

    /// Fails with `BadAccess` if the object is current on a thread other than `thread`.
    pub fn check_bindable(&self, thread: ThreadToken) -> GfxstreamResult<()> {
        match self {
            BindingState::Unbound => Ok(()),
            BindingState::Current(owner) | BindingState::PendingDelete(owner) => {
                match *owner == thread {
                    true => Ok(()),
                    false => Err(GfxstreamError::BadAccess),
                }
            }
            BindingState::Destroyed => Err(GfxstreamError::BadParameter("object destroyed")),
        }
    }

    pub fn bind(&mut self, thread: ThreadToken) -> GfxstreamResult<()> {
        self.check_bindable(thread)?;
        if *self == BindingState::Unbound {
            *self = BindingState::Current(thread);
        }

        Ok(())
    }

    /// Makes the object not current. A pending delete takes effect now.
    pub fn release(&mut self) -> Release {
        match self {
            BindingState::Current(_) => {
                *self = BindingState::Unbound;
                Release::StillAlive
            }
            BindingState::PendingDelete(_) => {
                *self = BindingState::Destroyed;
                Release::DestroyNow
            }
            _ => Release::StillAlive,
        }
    }

    /// Requests destruction. Current objects are only marked.
    pub fn request_delete(&mut self) -> Release {
        match self {
            BindingState::Unbound => {
                *self = BindingState::Destroyed;
                Release::DestroyNow
            }
            BindingState::Current(thread) => {
                *self = BindingState::PendingDelete(*thread);
                Release::StillAlive
            }
            _ => Release::StillAlive,
        }
    }
}

/// Implementation limits sizing the client-side vertex and buffer binding state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GlLimits {
    pub max_vertex_attribs: u32,
    pub max_transform_feedback_separate_attribs: u32,
    pub max_uniform_buffer_bindings: u32,
    pub max_atomic_counter_buffer_bindings: u32,
    pub max_shader_storage_buffer_bindings: u32,
    pub max_vertex_attrib_bindings: u32,
}

impl GlLimits {
    /// Limits assumed for GLES 1 contexts, which never query the host.
    pub const GLES1: GlLimits = GlLimits {
        max_vertex_attribs: 16,
        max_transform_feedback_separate_attribs: 0,
        max_uniform_buffer_bindings: 0,
        max_atomic_counter_buffer_bindings: 0,
        max_shader_storage_buffer_bindings: 0,
        max_vertex_attrib_bindings: 0,
    };

    /// Issues the `glGetIntegerv` queries that exist in GLES `major.minor`.
    pub fn query(gl: &mut GlesEncoder, major: u32, minor: u32) -> GfxstreamResult<GlLimits> {
        let mut get = |pname: GLenum| -> GfxstreamResult<u32> {
            Ok(gl.get_integerv(pname)?.max(0) as u32)
        };

        let mut limits = GlLimits {
            max_vertex_attribs: get(GL_MAX_VERTEX_ATTRIBS)?,
            ..Default::default()
        };

        if major >= 3 {
            limits.max_transform_feedback_separate_attribs =
                get(GL_MAX_TRANSFORM_FEEDBACK_SEPARATE_ATTRIBS)?;
            limits.max_uniform_buffer_bindings = get(GL_MAX_UNIFORM_BUFFER_BINDINGS)?;
        }

        if (major, minor) >= (3, 1) {
            limits.max_atomic_counter_buffer_bindings = get(GL_MAX_ATOMIC_COUNTER_BUFFER_BINDINGS)?;
            limits.max_shader_storage_buffer_bindings = get(GL_MAX_SHADER_STORAGE_BUFFER_BINDINGS)?;
            limits.max_vertex_attrib_bindings = get(GL_MAX_VERTEX_ATTRIB_BINDINGS)?;
        }

        Ok(limits)
    }
}

/// The GL object namespace shared by a context and every context created with it as share
/// context. Dropped with the last context referencing it.
#[derive(Debug, Default)]
pub struct SharedGroup {
    limits: Mutex<Option<GlLimits>>,
}

impl SharedGroup {
    pub fn new() -> Arc<SharedGroup> {
        Arc::new(Default::default())
    }

    pub fn limits(&self) -> Option<GlLimits> {
        *lock(&self.limits)
    }

    /// Returns the cached limits, running `query` only if none are cached yet.
    pub fn limits_or_query<F>(&self, query: F) -> GfxstreamResult<GlLimits>
    where
        F: FnOnce() -> GfxstreamResult<GlLimits>,
    {
        let mut limits = lock(&self.limits);
        if let Some(cached) = *limits {
            return Ok(cached);
        }

        let queried = query()?;
        *limits = Some(queried);
        Ok(queried)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexAttrib {
    pub enabled: bool,
    pub buffer: u32,
}

/// Client-side binding state of a context, sized from the shared group's limits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientState {
    pub vertex_attribs: Vec<VertexAttrib>,
    pub transform_feedback_buffers: Vec<u32>,
    pub uniform_buffers: Vec<u32>,
    pub atomic_counter_buffers: Vec<u32>,
    pub shader_storage_buffers: Vec<u32>,
    pub vertex_attrib_bindings: Vec<u32>,
}

impl ClientState {
    pub fn new(limits: &GlLimits) -> ClientState {
        ClientState {
            vertex_attribs: vec![Default::default(); limits.max_vertex_attribs as usize],
            transform_feedback_buffers: vec![0; limits.max_transform_feedback_separate_attribs as usize],
            uniform_buffers: vec![0; limits.max_uniform_buffer_bindings as usize],
            atomic_counter_buffers: vec![0; limits.max_atomic_counter_buffer_bindings as usize],
            shader_storage_buffers: vec![0; limits.max_shader_storage_buffer_bindings as usize],
            vertex_attrib_bindings: vec![0; limits.max_vertex_attrib_bindings as usize],
        }
    }
}

/// Parses context creation attributes into the requested (major, minor) client version.
pub fn parse_context_attribs(attribs: &[EGLint]) -> GfxstreamResult<(u32, u32)> {
    let mut major = 1;
    let mut minor = 0;
    for (attrib, value) in attrib_pairs(attribs) {
        match attrib {
            // EGL_CONTEXT_MAJOR_VERSION_KHR shares the value.
            EGL_CONTEXT_CLIENT_VERSION => {
                major = u32::try_from(value).map_err(|_| GfxstreamError::BadAttribute(attrib))?
            }
            EGL_CONTEXT_MINOR_VERSION_KHR => {
                minor = u32::try_from(value).map_err(|_| GfxstreamError::BadAttribute(attrib))?
            }
            EGL_CONTEXT_FLAGS_KHR => (),
            _ => return Err(GfxstreamError::BadAttribute(attrib)),
        }
    }

    match (major, minor) {
        (1, 0) | (2, 0) | (3, 0) | (3, 1) | (3, 2) => Ok((major, minor)),
        _ => Err(GfxstreamError::BadConfig),
    }
}

/// `gl_version` argument of `rcCreateContext` for a client version.
pub fn gles_api_for(major: u32, minor: u32) -> u32 {
    match (major, minor) {
        (1, _) => GLES_API_CM,
        (2, _) => GLES_API_2,
        (3, 0) => GLES_API_3_0,
        _ => GLES_API_3_1,
    }
}

pub struct EglContext {
    handle: ContextHandle,
    config: ConfigHandle,
    config_id: EGLint,
    client_version: (u32, u32),
    device_version: (u32, u32),
    host_context: u32,
    draw: SurfaceHandle,
    read: SurfaceHandle,
    shared: Arc<SharedGroup>,
    client_state: Option<ClientState>,
    binding: BindingState,
    gl_strings: Map<GLenum, String>,
    sync_device: Option<Option<Box<dyn SyncDevice>>>,
}

impl EglContext {
    pub fn new(
        handle: ContextHandle,
        config: ConfigHandle,
        config_id: EGLint,
        client_version: (u32, u32),
        device_version: (u32, u32),
        host_context: u32,
        shared: Arc<SharedGroup>,
    ) -> EglContext {
        EglContext {
            handle,
            config,
            config_id,
            client_version,
            device_version,
            host_context,
            draw: SurfaceHandle::NONE,
            read: SurfaceHandle::NONE,
            shared,
            client_state: None,
            binding: BindingState::Unbound,
            gl_strings: Default::default(),
            sync_device: None,
        }
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn config(&self) -> ConfigHandle {
        self.config
    }

    pub fn config_id(&self) -> EGLint {
        self.config_id
    }

    pub fn client_version(&self) -> (u32, u32) {
        self.client_version
    }

    /// Version of the host context actually backing this one.
    pub fn device_version(&self) -> (u32, u32) {
        self.device_version
    }

    pub fn host_context(&self) -> u32 {
        self.host_context
    }

    pub fn draw(&self) -> SurfaceHandle {
        self.draw
    }

    pub fn read(&self) -> SurfaceHandle {
        self.read
    }

    pub fn set_surfaces(&mut self, draw: SurfaceHandle, read: SurfaceHandle) {
        self.draw = draw;
        self.read = read;
    }

    pub fn shared_group(&self) -> &Arc<SharedGroup> {
        &self.shared
    }

    pub fn client_state(&self) -> Option<&ClientState> {
        self.client_state.as_ref()
    }

    pub fn binding(&self) -> BindingState {
        self.binding
    }

    pub fn binding_mut(&mut self) -> &mut BindingState {
        &mut self.binding
    }

    /// Sizes the client state on first bind. `query` runs at most once per shared group; later
    /// contexts of the group reuse its answer.
    pub fn init_client_state<F>(&mut self, query: F) -> GfxstreamResult<()>
    where
        F: FnOnce(u32, u32) -> GfxstreamResult<GlLimits>,
    {
        if self.client_state.is_some() {
            return Ok(());
        }

        let (major, minor) = self.client_version;
        let limits = match major {
            1 => GlLimits::GLES1,
            _ => self.shared.limits_or_query(|| query(major, minor))?,
        };
        self.client_state = Some(ClientState::new(&limits));
        Ok(())
    }

    /// Returns a GL string, asking the host only the first time.
    pub fn gl_string(&mut self, rc: &mut RenderControlEncoder, name: GLenum) -> GfxstreamResult<String> {
        if let Some(cached) = self.gl_strings.get(&name) {
            return Ok(cached.clone());
        }

        let value = rc.get_gl_string(name)?;
        self.gl_strings.insert(name, value.clone());
        Ok(value)
    }

    /// Returns the kernel sync device, opening it on first use.
    pub fn sync_device(&mut self, kind: &SyncDeviceKind) -> Option<&dyn SyncDevice> {
        self.sync_device
            .get_or_insert_with(|| open_sync_device(kind))
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_while_current_is_deferred() {
        let thread = ThreadToken::new();
        let mut state = BindingState::Unbound;
        state.bind(thread).unwrap();
        assert_eq!(state.request_delete(), Release::StillAlive);
        assert!(state.is_current());
        assert!(state.is_delete_pending());
        assert_eq!(state.release(), Release::DestroyNow);
        assert_eq!(state, BindingState::Destroyed);
    }

    #[test]
    fn bind_on_second_thread_is_refused() {
        let first = ThreadToken::new();
        let second = ThreadToken::new();
        let mut state = BindingState::Unbound;
        state.bind(first).unwrap();
        assert!(matches!(state.bind(second), Err(GfxstreamError::BadAccess)));
        assert_eq!(state.current_thread(), Some(first));
        state.bind(first).unwrap();
    }

    #[test]
    fn unbound_delete_is_immediate() {
        let mut state = BindingState::Unbound;
        assert_eq!(state.request_delete(), Release::DestroyNow);
        assert_eq!(state.release(), Release::StillAlive);
    }

    #[test]
    fn context_versions() {
        assert_eq!(parse_context_attribs(&[EGL_NONE]).unwrap(), (1, 0));
        assert_eq!(
            parse_context_attribs(&[
                EGL_CONTEXT_MAJOR_VERSION_KHR,
                3,
                EGL_CONTEXT_MINOR_VERSION_KHR,
                1,
                EGL_NONE
            ])
            .unwrap(),
            (3, 1)
        );
        assert!(matches!(
            parse_context_attribs(&[EGL_CONTEXT_CLIENT_VERSION, 4, EGL_NONE]),
            Err(GfxstreamError::BadConfig)
        ));
        assert!(matches!(
            parse_context_attribs(&[EGL_WIDTH, 4, EGL_NONE]),
            Err(GfxstreamError::BadAttribute(EGL_WIDTH))
        ));
        assert_eq!(gles_api_for(3, 2), GLES_API_3_1);
    }

    #[test]
    fn limits_are_queried_once_per_group() {
        let group = SharedGroup::new();
        let limits = GlLimits {
            max_vertex_attribs: 8,
            ..Default::default()
        };
        assert_eq!(group.limits_or_query(|| Ok(limits)).unwrap(), limits);
        let again = group
            .limits_or_query(|| panic!("limits queried twice"))
            .unwrap();
        assert_eq!(again, limits);
    }
}
