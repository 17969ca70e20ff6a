// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! host_connection: One guest client's connection to the host renderer.

use std::sync::Mutex;
use std::sync::MutexGuard;

use log::debug;
use log::warn;

use crate::egl::EglThreadInfo;
use crate::features::HostFeatures;
use crate::gles_encoder::GlesApi;
use crate::gles_encoder::GlesEncoder;
use crate::gles_encoder::GlesEncoderState;
use crate::gralloc::GoldfishGralloc;
use crate::gralloc::Gralloc;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::*;
use crate::parameters::ConnectionParameters;
use crate::render_control::negotiate;
use crate::render_control::RenderControlEncoder;

/// Flags word written right after the transport is opened. No flags are defined.
const CLIENT_FLAGS: u32 = 0;

/// A stream to the host renderer plus the encoders layered on top of it.
///
/// Encoders are built on first use and memoized. Building the render-control encoder runs
/// capability negotiation; the GLES encoders are built on top of it so they inherit the checksum
/// version.
pub struct HostConnection {
    kind: TransportKind,
    stream: RenderStream,
    features: Option<HostFeatures>,
    gl: Option<GlesEncoderState>,
    gl2: Option<GlesEncoderState>,
    gralloc: Box<dyn Gralloc>,
    gralloc_only: bool,
}

impl HostConnection {
    /// Runs `f` with the calling thread's connection, connecting on first use.
    pub fn get<F, R>(f: F) -> GfxstreamResult<R>
    where
        F: FnOnce(&mut HostConnection) -> GfxstreamResult<R>,
    {
        EglThreadInfo::with(|thread| f(thread.connection()?))
    }

    /// Drops the calling thread's connection, if any.
    pub fn exit() {
        EglThreadInfo::with(|thread| thread.drop_connection());
    }

    pub fn new(params: &ConnectionParameters) -> GfxstreamResult<HostConnection> {
        let transport = connect(&params.transport)?;
        HostConnection::with_transport(
            params.transport.clone(),
            transport,
            Box::new(GoldfishGralloc),
        )
    }

    pub fn with_transport(
        kind: TransportKind,
        transport: Box<dyn Transport>,
        gralloc: Box<dyn Gralloc>,
    ) -> GfxstreamResult<HostConnection> {
        let mut stream = RenderStream::new(transport);
        stream.write_raw(&CLIENT_FLAGS.to_le_bytes())?;
        stream.flush()?;
        debug!("connected to host renderer over {:?}", kind);

        Ok(HostConnection {
            kind,
            stream,
            features: None,
            gl: None,
            gl2: None,
            gralloc,
            gralloc_only: true,
        })
    }

    pub fn kind(&self) -> &TransportKind {
        &self.kind
    }

    /// True once the stream has seen a transport or protocol failure.
    pub fn is_broken(&self) -> bool {
        self.stream.is_broken()
    }

    /// Returns the host capabilities, negotiating them if this is the first use.
    pub fn features(&mut self) -> GfxstreamResult<&HostFeatures> {
        let (_, features) = negotiated(&mut self.stream, &mut self.features)?;
        Ok(features)
    }

    pub fn rc_encoder(&mut self) -> GfxstreamResult<RenderControlEncoder<'_>> {
        let (stream, features) = negotiated(&mut self.stream, &mut self.features)?;
        Ok(RenderControlEncoder::new(stream, features))
    }

    /// Returns the GLES 1 encoder.
    pub fn gl_encoder(&mut self) -> GfxstreamResult<GlesEncoder<'_>> {
        let checksum_version = self.features()?.checksum_version;
        let state = self
            .gl
            .get_or_insert_with(|| GlesEncoderState::new(GlesApi::Gles1, checksum_version));
        Ok(GlesEncoder::new(&mut self.stream, state))
    }

    /// Returns the GLES 2/3 encoder.
    pub fn gl2_encoder(&mut self) -> GfxstreamResult<GlesEncoder<'_>> {
        let checksum_version = self.features()?.checksum_version;
        let state = self
            .gl2
            .get_or_insert_with(|| GlesEncoderState::new(GlesApi::Gles2, checksum_version));
        Ok(GlesEncoder::new(&mut self.stream, state))
    }

    /// Returns the encoder matching a context's client major version.
    pub fn gles_encoder(&mut self, major_version: u32) -> GfxstreamResult<GlesEncoder<'_>> {
        match major_version {
            1 => self.gl_encoder(),
            _ => self.gl2_encoder(),
        }
    }

    pub fn flush(&mut self) -> GfxstreamResult<()> {
        self.stream.flush()
    }

    pub fn gralloc_helper(&self) -> &dyn Gralloc {
        self.gralloc.as_ref()
    }

    /// Splits the connection into its render-control encoder and gralloc translator, for the
    /// allocations that need both.
    pub fn rc_and_gralloc(&mut self) -> GfxstreamResult<(RenderControlEncoder<'_>, &dyn Gralloc)> {
        let (stream, features) = negotiated(&mut self.stream, &mut self.features)?;
        Ok((RenderControlEncoder::new(stream, features), self.gralloc.as_ref()))
    }

    /// Opens a refcount side channel next to this connection's transport.
    pub fn open_refcount_channel(&self) -> GfxstreamResult<Option<Box<dyn Transport>>> {
        self.stream.open_refcount_channel()
    }

    /// True while the connection has only served buffer allocation. Such a connection is closed
    /// without flushing the GLES encoders.
    pub fn is_gralloc_only(&self) -> bool {
        self.gralloc_only
    }

    /// Called when a context or surface is created over this connection.
    pub fn clear_gralloc_only(&mut self) {
        self.gralloc_only = false;
    }
}

impl Drop for HostConnection {
    fn drop(&mut self) {
        if self.stream.is_broken() {
            return;
        }
        if !self.gralloc_only {
            for state in [self.gl.as_ref(), self.gl2.as_ref()].into_iter().flatten() {
                if let Err(e) = GlesEncoder::new(&mut self.stream, state).flush() {
                    warn!("failed to flush GL work on disconnect: {}", e);
                }
            }
        }
        // Destroys queued by thread teardown must reach the host before the transport closes.
        if let Err(e) = self.stream.flush() {
            warn!("failed to flush host connection on disconnect: {}", e);
        }
    }
}

/// Negotiates on first use and splits the stream from the negotiated features.
fn negotiated<'a>(
    stream: &'a mut RenderStream,
    features: &'a mut Option<HostFeatures>,
) -> GfxstreamResult<(&'a mut RenderStream, &'a HostFeatures)> {
    if features.is_none() {
        *features = Some(negotiate(stream)?);
    }

    match features {
        Some(features) => Ok((stream, &*features)),
        None => Err(GfxstreamError::ConnectionUnavailable),
    }
}

/// A connection intentionally shared by several threads.
///
/// Every multi-step protocol sequence must run under a single `lock()` guard; the transport only
/// guarantees atomicity of individual writes.
pub struct SharedHostConnection {
    connection: Mutex<HostConnection>,
}

impl SharedHostConnection {
    pub fn new(connection: HostConnection) -> SharedHostConnection {
        SharedHostConnection {
            connection: Mutex::new(connection),
        }
    }

    /// Locks the connection; it is unlocked when the guard drops.
    pub fn lock(&self) -> MutexGuard<'_, HostConnection> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn into_inner(self) -> HostConnection {
        self.connection
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubConfig;
    use crate::stub::StubRenderer;

    fn connection(renderer: &StubRenderer) -> HostConnection {
        HostConnection::with_transport(
            TransportKind::Stub,
            Box::new(renderer.transport()),
            Box::new(GoldfishGralloc),
        )
        .unwrap()
    }

    #[test]
    fn negotiation_runs_once() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut conn = connection(&renderer);
        assert_eq!(renderer.state().opcode_count(RC_GET_RENDERER_VERSION), 0);

        for _ in 0..3 {
            assert!(conn.rc_encoder().unwrap().features().has_native_sync());
            conn.gl2_encoder().unwrap();
        }
        assert_eq!(renderer.state().opcode_count(RC_GET_RENDERER_VERSION), 1);
        assert_eq!(renderer.state().opcode_count(RC_GET_HOST_EXTENSIONS_STRING), 2);
        assert_eq!(renderer.state().opcode_count(RC_SELECT_CHECKSUM_HELPER), 1);
    }

    #[test]
    fn client_flags_are_written_first() {
        let renderer = StubRenderer::new(StubConfig::default());
        let _conn = connection(&renderer);
        assert!(renderer.state().saw_client_flags());
    }

    #[test]
    fn gralloc_only_until_cleared() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut conn = connection(&renderer);
        assert!(conn.is_gralloc_only());
        conn.clear_gralloc_only();
        assert!(!conn.is_gralloc_only());
    }

    #[test]
    fn dropping_pushes_queued_commands() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut conn = connection(&renderer);
        conn.rc_encoder().unwrap().fb_set_swap_interval(0).unwrap();
        conn.clear_gralloc_only();
        conn.gl2_encoder().unwrap();
        assert_eq!(renderer.state().swap_interval(), 1);

        drop(conn);
        assert_eq!(renderer.state().swap_interval(), 0);
        assert_eq!(renderer.state().opcode_count(GLES2_OP_FLUSH), 1);
    }

    #[test]
    fn gralloc_only_connection_skips_gl_flush() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut conn = connection(&renderer);
        conn.gl2_encoder().unwrap();
        drop(conn);
        assert_eq!(renderer.state().opcode_count(GLES2_OP_FLUSH), 0);
    }

    #[test]
    fn shared_connection_sequences_under_one_guard() {
        let renderer = StubRenderer::new(StubConfig::default());
        let shared = std::sync::Arc::new(SharedHostConnection::new(connection(&renderer)));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let mut conn = shared.lock();
                    let mut rc = conn.rc_encoder().unwrap();
                    let version = rc.get_renderer_version().unwrap();
                    let width = rc.get_fb_param(crate::egl_defines::FB_WIDTH).unwrap();
                    (version, width)
                })
            })
            .collect();

        for worker in workers {
            let (version, width) = worker.join().unwrap();
            assert_eq!(version, StubConfig::default().renderer_version);
            assert_eq!(width, StubConfig::default().display_width as i32);
        }
    }

    #[test]
    fn broken_transport_fails_closed() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut conn = connection(&renderer);
        conn.rc_encoder().unwrap();

        renderer.state().disconnect();
        assert!(conn.rc_encoder().unwrap().get_renderer_version().is_err());
        assert!(conn.is_broken());
        assert!(matches!(
            conn.flush(),
            Err(GfxstreamError::ConnectionUnavailable)
        ));
    }
}
