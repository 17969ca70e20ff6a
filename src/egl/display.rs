// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The EGL display: host configs plus the registry of live contexts, surfaces and syncs.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;

use log::debug;
use log::info;
use log::warn;

use crate::egl::lock;
use crate::egl::ConfigHandle;
use crate::egl::ConfigTable;
use crate::egl::ContextHandle;
use crate::egl::CurrentBinding;
use crate::egl::EglContext;
use crate::egl::EglSync;
use crate::egl::EglThreadInfo;
use crate::egl::ObjectTable;
use crate::egl::Release;
use crate::egl::Surface;
use crate::egl::SurfaceHandle;
use crate::egl::SyncHandle;
use crate::egl_defines::*;
use crate::features::HostFeatures;
use crate::guest_utils::attrib_pairs;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::host_connection::HostConnection;
use crate::parameters::ConnectionParameters;

/// Host EGL extensions the guest can expose as is.
const FORWARDED_EXTENSIONS: &[&str] = &[
    "EGL_KHR_image_base",
    "EGL_KHR_gl_texture_2D_image",
    "EGL_KHR_gl_renderbuffer_image",
    "EGL_KHR_surfaceless_context",
    "EGL_ANDROID_image_native_buffer",
    "EGL_ANDROID_recordable",
];

const CLIENT_APIS: &str = "OpenGL_ES";

pub(crate) type SharedContext = Arc<Mutex<EglContext>>;
pub(crate) type SharedSurface = Arc<Mutex<Box<dyn Surface>>>;

/// An object that left the registry and still has to be destroyed on the host.
pub(crate) enum Retired {
    Context(SharedContext),
    Surface(SharedSurface),
    Sync(Arc<Mutex<EglSync>>),
}

pub(crate) struct DisplayState {
    pub initialized: bool,
    pub egl_version: (EGLint, EGLint),
    pub vendor: String,
    pub version: String,
    pub extensions: String,
    pub configs: ConfigTable,
    pub contexts: ObjectTable<EglContext>,
    pub surfaces: ObjectTable<Box<dyn Surface>>,
    pub syncs: ObjectTable<EglSync>,
}

/// The process-wide EGL display.
///
/// The tables are guarded by one mutex that is only held to validate handles and change
/// membership. Objects are locked after it is released; when both are needed the table comes
/// first, then a context, then a surface.
pub struct Display {
    params: ConnectionParameters,
    state: Mutex<DisplayState>,
}

static GLOBAL_DISPLAY: OnceLock<Arc<Display>> = OnceLock::new();

impl Display {
    pub fn new(params: ConnectionParameters) -> Arc<Display> {
        Arc::new(Display {
            params,
            state: Mutex::new(DisplayState {
                initialized: false,
                egl_version: (0, 0),
                vendor: String::new(),
                version: String::new(),
                extensions: String::new(),
                configs: Default::default(),
                contexts: Default::default(),
                surfaces: Default::default(),
                syncs: Default::default(),
            }),
        })
    }

    /// The display behind `EGL_DEFAULT_DISPLAY`.
    pub fn global() -> Arc<Display> {
        GLOBAL_DISPLAY
            .get_or_init(|| Display::new(ConnectionParameters::global()))
            .clone()
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DisplayState> {
        lock(&self.state)
    }

    pub(crate) fn lock_initialized(&self) -> GfxstreamResult<MutexGuard<'_, DisplayState>> {
        let state = self.lock_state();
        match state.initialized {
            true => Ok(state),
            false => Err(GfxstreamError::NotInitialized),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    /// Fetches the EGL version, strings and configs from the host. Returns the EGL version.
    ///
    /// Initializing an initialized display only returns the version again.
    pub fn initialize(&self, thread: &mut EglThreadInfo) -> GfxstreamResult<(EGLint, EGLint)> {
        {
            let state = self.lock_state();
            if state.initialized {
                return Ok(state.egl_version);
            }
        }

        let conn = thread.connection()?;
        let mut rc = conn.rc_encoder()?;
        let egl_version = rc.get_egl_version()?;
        let vendor = rc.query_egl_string(EGL_VENDOR)?;
        let host_extensions = rc.query_egl_string(EGL_EXTENSIONS)?;
        let (num_configs, num_attribs) = rc.get_num_configs()?;
        let words = rc.get_configs(num_configs, num_attribs)?;
        let configs = ConfigTable::from_host(num_configs, num_attribs, &words)?;
        let extensions = build_extension_string(&host_extensions, rc.features());

        let mut state = self.lock_state();
        if !state.initialized {
            info!(
                "display initialized: EGL {}.{}, {} configs",
                egl_version.0,
                egl_version.1,
                configs.len()
            );
            state.egl_version = egl_version;
            state.version = format!("{}.{} gfxstream", egl_version.0, egl_version.1);
            state.vendor = vendor;
            state.extensions = extensions;
            state.configs = configs;
            state.initialized = true;
        }
        Ok(state.egl_version)
    }

    /// Destroys every object that isn't current and marks the rest for destruction on release.
    pub fn terminate(&self, thread: &mut EglThreadInfo) -> GfxstreamResult<()> {
        let retired = {
            let mut state = self.lock_state();
            if !state.initialized {
                return Ok(());
            }
            state.initialized = false;

            let mut retired = Vec::new();
            for id in state.contexts.ids() {
                let context = state.contexts.get(id);
                if let Some(context) = context {
                    if lock(&context).binding_mut().request_delete() == Release::DestroyNow {
                        state.contexts.remove(id);
                        retired.push(Retired::Context(context));
                    }
                }
            }
            for id in state.surfaces.ids() {
                let surface = state.surfaces.get(id);
                if let Some(surface) = surface {
                    if lock(&surface).base_mut().binding.request_delete() == Release::DestroyNow {
                        state.surfaces.remove(id);
                        retired.push(Retired::Surface(surface));
                    }
                }
            }
            for id in state.syncs.ids() {
                if let Some(sync) = state.syncs.remove(id) {
                    retired.push(Retired::Sync(sync));
                }
            }
            retired
        };

        debug!("display terminated, {} objects destroyed", retired.len());
        match thread.connection() {
            Ok(conn) => destroy_retired(conn, retired),
            // The host drops everything of a connection that goes away.
            Err(_) => Ok(()),
        }
    }

    pub fn query_string(&self, name: EGLint) -> GfxstreamResult<String> {
        let state = self.lock_initialized()?;
        match name {
            EGL_VENDOR => Ok(state.vendor.clone()),
            EGL_VERSION => Ok(state.version.clone()),
            EGL_EXTENSIONS => Ok(state.extensions.clone()),
            EGL_CLIENT_APIS => Ok(CLIENT_APIS.to_string()),
            _ => Err(GfxstreamError::BadParameter("string name")),
        }
    }

    pub fn is_valid_config(&self, config: ConfigHandle) -> bool {
        self.lock_state().configs.is_valid(config)
    }

    pub fn is_context(&self, context: ContextHandle) -> bool {
        self.lock_state().contexts.contains(context.raw())
    }

    pub fn is_surface(&self, surface: SurfaceHandle) -> bool {
        self.lock_state().surfaces.contains(surface.raw())
    }

    pub fn is_sync(&self, sync: SyncHandle) -> bool {
        self.lock_state().syncs.contains(sync.raw())
    }

    pub fn get_index_of_config(&self, config: ConfigHandle) -> GfxstreamResult<usize> {
        self.lock_initialized()?
            .configs
            .get_index_of_config(config)
            .ok_or(GfxstreamError::BadConfig)
    }

    pub fn get_config_at_index(&self, index: usize) -> GfxstreamResult<ConfigHandle> {
        self.lock_initialized()?
            .configs
            .get_config_at_index(index)
            .ok_or(GfxstreamError::BadParameter("config index"))
    }

    pub fn get_config_attrib(&self, config: ConfigHandle, attrib: EGLint) -> GfxstreamResult<EGLint> {
        self.lock_initialized()?.configs.get_attrib(config, attrib)
    }

    /// Returns every config, in host order.
    pub fn get_configs(&self) -> GfxstreamResult<Vec<ConfigHandle>> {
        Ok(self.lock_initialized()?.configs.handles().collect())
    }

    /// Lets the host pick up to `max_configs` configs matching `attribs`.
    pub fn choose_config(
        &self,
        thread: &mut EglThreadInfo,
        attribs: &[EGLint],
        max_configs: usize,
    ) -> GfxstreamResult<Vec<ConfigHandle>> {
        let num_configs = self.lock_initialized()?.configs.len();

        let mut request: Vec<EGLint> = attrib_pairs(attribs)
            .flat_map(|(attrib, value)| [attrib, value])
            .collect();
        request.push(EGL_NONE);

        let conn = thread.connection()?;
        let indices = conn.rc_encoder()?.choose_config(&request, max_configs)?;
        indices
            .into_iter()
            .map(|index| {
                let index = usize::try_from(index)?;
                match index < num_configs {
                    true => Ok(ConfigHandle::from_index(index)),
                    false => Err(GfxstreamError::ProtocolViolation("chosen config out of range")),
                }
            })
            .collect()
    }

    pub(crate) fn context(&self, handle: ContextHandle) -> GfxstreamResult<SharedContext> {
        self.lock_initialized()?
            .contexts
            .get(handle.raw())
            .ok_or(GfxstreamError::BadContext)
    }

    pub(crate) fn surface(&self, handle: SurfaceHandle) -> GfxstreamResult<SharedSurface> {
        self.lock_initialized()?
            .surfaces
            .get(handle.raw())
            .ok_or(GfxstreamError::BadSurface)
    }

    /// The context `thread` has current on this display.
    pub(crate) fn current_context_of(&self, thread: &EglThreadInfo) -> Option<SharedContext> {
        let binding = thread.current()?;
        if !std::ptr::eq(Arc::as_ptr(&binding.display), self) {
            return None;
        }
        self.lock_state().contexts.get(binding.context.raw())
    }

    /// Client major version of the thread's current context, 2 without one.
    pub(crate) fn current_client_major(&self, thread: &EglThreadInfo) -> u32 {
        self.current_context_of(thread)
            .map(|context| lock(&context).client_version().0)
            .unwrap_or(2)
    }

    /// Takes `binding` off its thread. Objects that `next` binds again stay current; objects
    /// whose destroy was deferred leave the registry and are returned.
    pub(crate) fn unbind(
        &self,
        binding: &CurrentBinding,
        next: Option<(ContextHandle, SurfaceHandle, SurfaceHandle)>,
    ) -> Vec<Retired> {
        let mut retired = Vec::new();
        let context = match self.lock_state().contexts.get(binding.context.raw()) {
            Some(context) => context,
            None => return retired,
        };

        let (draw, read) = {
            let context = lock(&context);
            (context.draw(), context.read())
        };
        let kept = |surface: SurfaceHandle| {
            next.map(|(_, next_draw, next_read)| surface == next_draw || surface == next_read)
                .unwrap_or(false)
        };

        let mut surfaces = vec![draw];
        if read != draw {
            surfaces.push(read);
        }
        for handle in surfaces {
            if handle.is_none() || kept(handle) {
                continue;
            }
            let surface = self.lock_state().surfaces.get(handle.raw());
            if let Some(surface) = surface {
                if lock(&surface).base_mut().binding.release() == Release::DestroyNow {
                    self.lock_state().surfaces.remove(handle.raw());
                    retired.push(Retired::Surface(surface));
                }
            }
        }

        if next.map(|(next_context, _, _)| next_context) != Some(binding.context) {
            let release = {
                let mut context = lock(&context);
                context.set_surfaces(SurfaceHandle::NONE, SurfaceHandle::NONE);
                context.binding_mut().release()
            };
            if release == Release::DestroyNow {
                self.lock_state().contexts.remove(binding.context.raw());
                retired.push(Retired::Context(context));
            }
        }

        retired
    }

    /// Releases whatever `thread` has current, as on thread exit.
    ///
    /// Works on a terminated display, and without a host connection, so that objects whose
    /// destroy was deferred still leave the registry.
    pub fn release_thread(self: &Arc<Self>, thread: &mut EglThreadInfo) -> GfxstreamResult<()> {
        let binding = match thread.current().cloned() {
            Some(binding) => binding,
            None => return Ok(()),
        };

        let retired = binding.display.unbind(&binding, None);
        thread.set_current(None);

        let conn = match thread.connection() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("released thread without reaching the host: {}", e);
                return Ok(());
            }
        };
        let released = conn
            .rc_encoder()
            .and_then(|mut rc| rc.make_current(0, 0, 0));
        let destroyed = destroy_retired(conn, retired);
        released?;
        destroyed
    }
}

/// Destroys the host side of objects that already left the registry.
pub(crate) fn destroy_retired(conn: &mut HostConnection, retired: Vec<Retired>) -> GfxstreamResult<()> {
    let mut result = Ok(());
    for object in retired {
        let destroyed = match object {
            Retired::Context(context) => {
                let host_context = lock(&context).host_context();
                conn.rc_encoder()
                    .and_then(|mut rc| rc.destroy_context(host_context))
            }
            Retired::Surface(surface) => lock(&surface).destroy(conn),
            Retired::Sync(sync) => {
                let host_sync = lock(&sync).host_sync();
                match host_sync {
                    0 => Ok(()),
                    host_sync => destroy_host_sync(conn, host_sync),
                }
            }
        };
        if let Err(e) = destroyed {
            warn!("failed to destroy host object: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

fn destroy_host_sync(conn: &mut HostConnection, host_sync: u64) -> GfxstreamResult<()> {
    if conn.features()?.has_native_sync() {
        conn.rc_encoder()?.destroy_sync(host_sync)?;
    }
    Ok(())
}

/// Builds the guest extension string: host extensions the guest can pass through, plus the sync
/// extensions the guest implements on top of the negotiated features.
fn build_extension_string(host_extensions: &str, features: &HostFeatures) -> String {
    let mut extensions: Vec<&str> = host_extensions
        .split_ascii_whitespace()
        .filter(|ext| FORWARDED_EXTENSIONS.contains(ext))
        .collect();

    extensions.push("EGL_KHR_fence_sync");
    if features.has_native_sync() {
        extensions.push("EGL_ANDROID_native_fence_sync");
    }
    if features.has_native_sync_v3() {
        extensions.push("EGL_KHR_wait_sync");
    }

    extensions.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SyncImpl;

    #[test]
    fn extension_string_follows_features() {
        let host = "EGL_KHR_image_base EGL_EXT_unknown EGL_KHR_surfaceless_context";
        let none = build_extension_string(host, &HostFeatures::default());
        assert_eq!(
            none,
            "EGL_KHR_image_base EGL_KHR_surfaceless_context EGL_KHR_fence_sync"
        );

        let features = HostFeatures {
            sync_impl: SyncImpl::NativeSyncV3,
            ..Default::default()
        };
        let synced = build_extension_string("", &features);
        assert_eq!(
            synced,
            "EGL_KHR_fence_sync EGL_ANDROID_native_fence_sync EGL_KHR_wait_sync"
        );
    }

    #[test]
    fn uninitialized_display_rejects_lookups() {
        let display = Display::new(Default::default());
        assert!(!display.is_initialized());
        assert!(matches!(
            display.query_string(EGL_VENDOR),
            Err(GfxstreamError::NotInitialized)
        ));
        assert!(matches!(
            display.get_configs(),
            Err(GfxstreamError::NotInitialized)
        ));
        assert!(!display.is_context(ContextHandle::from_raw(1)));
    }
}
