// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

#![allow(dead_code)]

use std::sync::Arc;

use gfxstream_guest::egl::ConfigHandle;
use gfxstream_guest::egl::ContextHandle;
use gfxstream_guest::egl::Display;
use gfxstream_guest::egl::EglThreadInfo;
use gfxstream_guest::egl::SurfaceHandle;
use gfxstream_guest::egl_defines::*;
use gfxstream_guest::gralloc::GoldfishGralloc;
use gfxstream_guest::host_connection::HostConnection;
use gfxstream_guest::ipc::TransportKind;
use gfxstream_guest::parameters::ConnectionParameters;
use gfxstream_guest::parameters::SyncDeviceKind;
use gfxstream_guest::stub::StubConfig;
use gfxstream_guest::stub::StubRenderer;

/// Parameters for tests: stub transport and descriptors that are signaled from the start.
pub fn test_parameters() -> ConnectionParameters {
    ConnectionParameters {
        transport: TransportKind::Stub,
        sync_device: SyncDeviceKind::Pipe,
        ..Default::default()
    }
}

/// Thread state whose connections all go to `renderer`.
pub fn thread_for(renderer: &StubRenderer) -> EglThreadInfo {
    let renderer = renderer.clone();
    EglThreadInfo::new(Box::new(move || {
        HostConnection::with_transport(
            TransportKind::Stub,
            Box::new(renderer.transport()),
            Box::new(GoldfishGralloc),
        )
    }))
}

/// A display of its own over a renderer of its own, initialized from `thread`.
pub struct Fixture {
    pub renderer: StubRenderer,
    pub display: Arc<Display>,
    pub thread: EglThreadInfo,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with(StubConfig::default(), test_parameters())
    }

    pub fn with(config: StubConfig, params: ConnectionParameters) -> Fixture {
        let renderer = StubRenderer::new(config);
        let display = Display::new(params);
        let mut thread = thread_for(&renderer);
        display.initialize(&mut thread).unwrap();
        Fixture {
            renderer,
            display,
            thread,
        }
    }

    /// First config whose surface type covers `surface_bits`.
    pub fn config(&self, surface_bits: EGLint) -> ConfigHandle {
        self.display
            .get_configs()
            .unwrap()
            .into_iter()
            .find(|config| {
                let bits = self
                    .display
                    .get_config_attrib(*config, EGL_SURFACE_TYPE)
                    .unwrap();
                bits & surface_bits == surface_bits
            })
            .unwrap()
    }

    pub fn context(&mut self, major: EGLint) -> ContextHandle {
        let config = self.config(EGL_PBUFFER_BIT);
        self.display
            .create_context(
                &mut self.thread,
                config,
                ContextHandle::NONE,
                &[EGL_CONTEXT_CLIENT_VERSION, major, EGL_NONE],
            )
            .unwrap()
    }

    pub fn pbuffer(&mut self, width: EGLint, height: EGLint) -> SurfaceHandle {
        let config = self.config(EGL_PBUFFER_BIT);
        self.display
            .create_pbuffer_surface(
                &mut self.thread,
                config,
                &[EGL_WIDTH, width, EGL_HEIGHT, height, EGL_NONE],
            )
            .unwrap()
    }

    pub fn make_current(&mut self, surface: SurfaceHandle, context: ContextHandle) {
        self.display
            .make_current(&mut self.thread, surface, surface, context)
            .unwrap()
    }

    /// Pushes batched commands to the host so its state can be inspected.
    pub fn flush(&mut self) {
        self.thread.connection().unwrap().flush().unwrap();
    }

    pub fn opcode_count(&self, opcode: u32) -> usize {
        self.renderer.state().opcode_count(opcode)
    }
}
