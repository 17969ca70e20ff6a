// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! render_control: Encoder for the render-control protocol that manages host-side objects.

use std::mem::size_of;

use log::debug;
use log::info;

use crate::egl_defines::*;
use crate::features::HostFeatures;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::*;

/// Upper bounds on the config table the host may report.
const MAX_HOST_CONFIGS: u32 = 4096;
const MAX_CONFIG_ATTRIBS: u32 = 256;

/// Host handle of a sync object and of the host thread that will signal it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostSync {
    pub sync_handle: u64,
    pub thread_handle: u64,
}

/// Host display placement returned by `rcGetDisplayPose`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayPose {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Runs the one-time capability negotiation on a fresh stream.
///
/// The host renderer version is read first, then the host extension list, and finally a checksum
/// helper is selected when both ends support one. Every packet after the selection carries a
/// checksum trailer.
pub fn negotiate(stream: &mut RenderStream) -> GfxstreamResult<HostFeatures> {
    let mut reply = stream.transact(Command::new(RC_GET_RENDERER_VERSION), size_of::<i32>())?;
    let renderer_version = reply.u32()?;

    let extensions = query_string(stream, |len| {
        Command::new(RC_GET_HOST_EXTENSIONS_STRING)
            .u32(len.try_into()?)
            .out_buffer(len)
    })?;
    debug!("host extensions: {}", extensions);

    let mut features = HostFeatures::from_extensions(renderer_version, &extensions);
    let checksum_version = HostFeatures::offered_checksum_version(&extensions);
    if checksum_version > 0 {
        stream.send(
            Command::new(RC_SELECT_CHECKSUM_HELPER)
                .u32(checksum_version)
                .u32(0),
        )?;
        if stream.set_checksum_version(checksum_version)? {
            features.checksum_version = checksum_version;
        }
    }

    info!(
        "negotiated host renderer v{}: sync {:?}, gles {:?}, checksum v{}",
        features.renderer_version,
        features.sync_impl,
        features.gles_max_version,
        features.checksum_version
    );
    Ok(features)
}

/// Issues a string query twice: once with an empty buffer to learn the size, then for real.
///
/// The host answers a too-small buffer with the negated size it needs, NUL included.
fn query_string<F>(stream: &mut RenderStream, build: F) -> GfxstreamResult<String>
where
    F: Fn(usize) -> GfxstreamResult<Command>,
{
    let mut reply = stream.transact(build(0)?, size_of::<i32>())?;
    let needed = reply.i32()?;
    if needed >= 0 {
        return Ok(String::new());
    }

    let len: usize = needed.unsigned_abs().try_into()?;
    let mut reply = stream.transact(build(len)?, size_of::<i32>())?;
    let raw = reply.bytes(len)?.to_vec();
    if reply.i32()? < 0 {
        return Err(GfxstreamError::ProtocolViolation("string grew between queries"));
    }

    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// A borrowed view of a connection's stream that encodes render-control calls.
pub struct RenderControlEncoder<'a> {
    stream: &'a mut RenderStream,
    features: &'a HostFeatures,
}

impl<'a> RenderControlEncoder<'a> {
    pub fn new(stream: &'a mut RenderStream, features: &'a HostFeatures) -> RenderControlEncoder<'a> {
        RenderControlEncoder { stream, features }
    }

    pub fn features(&self) -> &HostFeatures {
        self.features
    }

    pub fn flush(&mut self) -> GfxstreamResult<()> {
        self.stream.flush()
    }

    pub fn stream(&mut self) -> &mut RenderStream {
        self.stream
    }

    fn call_i32(&mut self, command: Command) -> GfxstreamResult<i32> {
        self.stream.transact(command, size_of::<i32>())?.i32()
    }

    fn call_u32(&mut self, command: Command) -> GfxstreamResult<u32> {
        self.stream.transact(command, size_of::<u32>())?.u32()
    }

    pub fn get_renderer_version(&mut self) -> GfxstreamResult<u32> {
        self.call_u32(Command::new(RC_GET_RENDERER_VERSION))
    }

    /// Returns (major, minor) of the host EGL.
    pub fn get_egl_version(&mut self) -> GfxstreamResult<(EGLint, EGLint)> {
        let command = Command::new(RC_GET_EGL_VERSION)
            .out_buffer(size_of::<EGLint>())?
            .out_buffer(size_of::<EGLint>())?;
        let mut reply = self.stream.transact(command, size_of::<EGLint>())?;
        let major = reply.i32()?;
        let minor = reply.i32()?;
        if reply.i32()? == 0 {
            return Err(GfxstreamError::BadAlloc("egl version"));
        }

        Ok((major, minor))
    }

    pub fn query_egl_string(&mut self, name: EGLint) -> GfxstreamResult<String> {
        query_string(self.stream, |len| {
            Ok(Command::new(RC_QUERY_EGL_STRING)
                .i32(name)
                .out_buffer(len)?
                .i32(len.try_into()?))
        })
    }

    pub fn get_gl_string(&mut self, name: GLenum) -> GfxstreamResult<String> {
        query_string(self.stream, |len| {
            Ok(Command::new(RC_GET_GL_STRING)
                .u32(name)
                .out_buffer(len)?
                .i32(len.try_into()?))
        })
    }

    /// Returns (number of configs, number of attributes per config).
    pub fn get_num_configs(&mut self) -> GfxstreamResult<(u32, u32)> {
        let command = Command::new(RC_GET_NUM_CONFIGS).out_buffer(size_of::<u32>())?;
        let mut reply = self.stream.transact(command, size_of::<EGLint>())?;
        let num_attribs = reply.u32()?;
        let num_configs = reply.i32()?;
        Ok((num_configs.try_into()?, num_attribs))
    }

    /// Fetches the config table: a row of attribute ids followed by one row of values per config.
    pub fn get_configs(&mut self, num_configs: u32, num_attribs: u32) -> GfxstreamResult<Vec<u32>> {
        if num_configs > MAX_HOST_CONFIGS || num_attribs > MAX_CONFIG_ATTRIBS {
            return Err(GfxstreamError::ProtocolViolation("config table too large"));
        }
        let rows: usize = num_configs.try_into()?;
        let len = rows
            .checked_add(1)
            .and_then(|rows| rows.checked_mul(usize::try_from(num_attribs).ok()?))
            .and_then(|words| words.checked_mul(size_of::<u32>()))
            .ok_or(GfxstreamError::ProtocolViolation("config table size overflows"))?;
        let words = len / size_of::<u32>();
        let command = Command::new(RC_GET_CONFIGS)
            .u32(len.try_into()?)
            .out_buffer(len)?;
        let mut reply = self.stream.transact(command, size_of::<EGLint>())?;
        let table = (0..words)
            .map(|_| reply.u32())
            .collect::<GfxstreamResult<Vec<u32>>>()?;
        if reply.i32()? < 0 {
            return Err(GfxstreamError::BadAlloc("config table"));
        }

        Ok(table)
    }

    /// Asks the host to pick configs matching `attribs`; returns up to `max_configs` indices.
    pub fn choose_config(&mut self, attribs: &[EGLint], max_configs: usize) -> GfxstreamResult<Vec<u32>> {
        let attrib_bytes: Vec<u8> = attribs.iter().flat_map(|a| a.to_le_bytes()).collect();
        let command = Command::new(RC_CHOOSE_CONFIG)
            .buffer(&attrib_bytes)?
            .u32(attrib_bytes.len().try_into()?)
            .out_buffer(max_configs * size_of::<u32>())?
            .u32(max_configs.try_into()?);
        let mut reply = self.stream.transact(command, size_of::<EGLint>())?;
        let configs = (0..max_configs)
            .map(|_| reply.u32())
            .collect::<GfxstreamResult<Vec<u32>>>()?;
        let count = reply.i32()?;
        if count < 0 {
            return Err(GfxstreamError::BadAttribute(EGL_NONE));
        }

        let count: usize = count.try_into()?;
        Ok(configs.into_iter().take(count.min(max_configs)).collect())
    }

    pub fn get_fb_param(&mut self, param: EGLint) -> GfxstreamResult<EGLint> {
        self.call_i32(Command::new(RC_GET_FB_PARAM).i32(param))
    }

    /// Returns the host context handle, 0 on failure.
    pub fn create_context(&mut self, config: u32, share: u32, gl_version: u32) -> GfxstreamResult<u32> {
        self.call_u32(
            Command::new(RC_CREATE_CONTEXT)
                .u32(config)
                .u32(share)
                .u32(gl_version),
        )
    }

    pub fn destroy_context(&mut self, context: u32) -> GfxstreamResult<()> {
        self.stream.send(Command::new(RC_DESTROY_CONTEXT).u32(context))
    }

    /// Returns the host surface handle, 0 on failure.
    pub fn create_window_surface(&mut self, config: u32, width: u32, height: u32) -> GfxstreamResult<u32> {
        self.call_u32(
            Command::new(RC_CREATE_WINDOW_SURFACE)
                .u32(config)
                .u32(width)
                .u32(height),
        )
    }

    pub fn destroy_window_surface(&mut self, surface: u32) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(RC_DESTROY_WINDOW_SURFACE).u32(surface))
    }

    /// Returns the host color buffer handle, 0 on failure.
    pub fn create_color_buffer(&mut self, width: u32, height: u32, internal_format: GLenum) -> GfxstreamResult<u32> {
        self.call_u32(
            Command::new(RC_CREATE_COLOR_BUFFER)
                .u32(width)
                .u32(height)
                .u32(internal_format),
        )
    }

    pub fn open_color_buffer(&mut self, color_buffer: u32) -> GfxstreamResult<i32> {
        self.call_i32(Command::new(RC_OPEN_COLOR_BUFFER2).u32(color_buffer))
    }

    pub fn close_color_buffer(&mut self, color_buffer: u32) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(RC_CLOSE_COLOR_BUFFER).u32(color_buffer))
    }

    pub fn set_window_color_buffer(&mut self, surface: u32, color_buffer: u32) -> GfxstreamResult<()> {
        self.stream.send(
            Command::new(RC_SET_WINDOW_COLOR_BUFFER)
                .u32(surface)
                .u32(color_buffer),
        )
    }

    pub fn flush_window_color_buffer(&mut self, surface: u32) -> GfxstreamResult<i32> {
        self.call_i32(Command::new(RC_FLUSH_WINDOW_COLOR_BUFFER).u32(surface))
    }

    pub fn flush_window_color_buffer_async(&mut self, surface: u32) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(RC_FLUSH_WINDOW_COLOR_BUFFER_ASYNC).u32(surface))
    }

    pub fn make_current(&mut self, context: u32, draw: u32, read: u32) -> GfxstreamResult<bool> {
        let ret = self.call_i32(
            Command::new(RC_MAKE_CURRENT)
                .u32(context)
                .u32(draw)
                .u32(read),
        )?;
        Ok(ret != 0)
    }

    pub fn fb_post(&mut self, color_buffer: u32) -> GfxstreamResult<()> {
        self.stream.send(Command::new(RC_FB_POST).u32(color_buffer))
    }

    pub fn fb_set_swap_interval(&mut self, interval: EGLint) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(RC_FB_SET_SWAP_INTERVAL).i32(interval))
    }

    pub fn bind_texture(&mut self, color_buffer: u32) -> GfxstreamResult<bool> {
        Ok(self.call_i32(Command::new(RC_BIND_TEXTURE).u32(color_buffer))? != 0)
    }

    pub fn bind_renderbuffer(&mut self, color_buffer: u32) -> GfxstreamResult<bool> {
        Ok(self.call_i32(Command::new(RC_BIND_RENDERBUFFER).u32(color_buffer))? != 0)
    }

    /// Creates a host sync object. With `destroy_when_signaled` the host frees it on its own once
    /// signaled and the guest must never destroy it.
    pub fn create_sync(
        &mut self,
        sync_type: EGLint,
        attribs: &[EGLint],
        destroy_when_signaled: bool,
    ) -> GfxstreamResult<HostSync> {
        let attrib_bytes: Vec<u8> = attribs.iter().flat_map(|a| a.to_le_bytes()).collect();
        let command = Command::new(RC_CREATE_SYNC_KHR)
            .i32(sync_type)
            .buffer(&attrib_bytes)?
            .u32(attrib_bytes.len().try_into()?)
            .i32(destroy_when_signaled as i32)
            .out_buffer(size_of::<u64>())?
            .out_buffer(size_of::<u64>())?;
        let mut reply = self.stream.transact(command, 0)?;
        Ok(HostSync {
            sync_handle: reply.u64()?,
            thread_handle: reply.u64()?,
        })
    }

    pub fn client_wait_sync(&mut self, sync: u64, flags: EGLint, timeout: EGLTime) -> GfxstreamResult<EGLint> {
        self.call_i32(
            Command::new(RC_CLIENT_WAIT_SYNC_KHR)
                .u64(sync)
                .i32(flags)
                .u64(timeout),
        )
    }

    pub fn wait_sync(&mut self, sync: u64, flags: EGLint) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(RC_WAIT_SYNC_KHR).u64(sync).i32(flags))
    }

    pub fn destroy_sync(&mut self, sync: u64) -> GfxstreamResult<EGLint> {
        self.call_i32(Command::new(RC_DESTROY_SYNC_KHR).u64(sync))
    }

    pub fn is_sync_signaled(&mut self, sync: u64) -> GfxstreamResult<bool> {
        Ok(self.call_i32(Command::new(RC_IS_SYNC_SIGNALED).u64(sync))? != 0)
    }

    /// Submits an opaque composition request to the host compositor.
    pub fn compose(&mut self, request: &[u8]) -> GfxstreamResult<i32> {
        self.call_i32(
            Command::new(RC_COMPOSE)
                .u32(request.len().try_into()?)
                .buffer(request)?,
        )
    }

    pub fn get_display_pose(&mut self, display_id: u32) -> GfxstreamResult<DisplayPose> {
        let command = Command::new(RC_GET_DISPLAY_POSE)
            .u32(display_id)
            .out_buffer(size_of::<i32>())?
            .out_buffer(size_of::<i32>())?
            .out_buffer(size_of::<u32>())?
            .out_buffer(size_of::<u32>())?;
        let mut reply = self.stream.transact(command, size_of::<i32>())?;
        let pose = DisplayPose {
            x: reply.i32()?,
            y: reply.i32()?,
            width: reply.u32()?,
            height: reply.u32()?,
        };
        if reply.i32()? != 0 {
            return Err(GfxstreamError::BadParameter("display id"));
        }

        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SyncImpl;
    use crate::stub::StubConfig;
    use crate::stub::StubRenderer;

    fn connected_stream(renderer: &StubRenderer) -> RenderStream {
        let mut stream = RenderStream::new(Box::new(renderer.transport()));
        stream.write_raw(&0u32.to_le_bytes()).unwrap();
        stream
    }

    #[test]
    fn negotiation_selects_checksum_and_sync_level() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut stream = connected_stream(&renderer);
        let features = negotiate(&mut stream).unwrap();

        assert_eq!(features.renderer_version, 1);
        assert_eq!(features.sync_impl, SyncImpl::NativeSyncV4);
        assert_eq!(features.checksum_version, 1);
        assert_eq!(stream.checksum_version(), 1);
        // Sizing plus fetching the extension string.
        assert_eq!(
            renderer
                .state()
                .opcode_count(RC_GET_HOST_EXTENSIONS_STRING),
            2
        );

        // Later calls carry trailers the host accepts.
        let mut rc = RenderControlEncoder::new(&mut stream, &features);
        assert_eq!(rc.get_egl_version().unwrap(), (1, 4));
        assert_eq!(rc.query_egl_string(EGL_VENDOR).unwrap(), "Stub");
    }

    #[test]
    fn choose_config_caps_results() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut stream = connected_stream(&renderer);
        let features = negotiate(&mut stream).unwrap();
        let mut rc = RenderControlEncoder::new(&mut stream, &features);

        assert_eq!(rc.choose_config(&[EGL_NONE], 8).unwrap(), vec![0, 1, 2]);
        assert_eq!(rc.choose_config(&[EGL_NONE], 1).unwrap(), vec![0]);
        assert_eq!(
            rc.choose_config(&[EGL_DEPTH_SIZE, 24, EGL_NONE], 8).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn display_pose_of_unknown_display_fails() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut stream = connected_stream(&renderer);
        let features = negotiate(&mut stream).unwrap();
        let mut rc = RenderControlEncoder::new(&mut stream, &features);

        let pose = rc.get_display_pose(0).unwrap();
        assert_eq!((pose.width, pose.height), (1280, 720));
        assert!(matches!(
            rc.get_display_pose(1),
            Err(GfxstreamError::BadParameter(_))
        ));
        assert_eq!(rc.get_fb_param(FB_WIDTH).unwrap(), 1280);
    }

    #[test]
    fn oversized_config_table_is_refused() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut stream = connected_stream(&renderer);
        let features = negotiate(&mut stream).unwrap();
        let mut rc = RenderControlEncoder::new(&mut stream, &features);

        for (num_configs, num_attribs) in [(i32::MAX as u32, u32::MAX), (1, MAX_CONFIG_ATTRIBS + 1)] {
            assert!(matches!(
                rc.get_configs(num_configs, num_attribs),
                Err(GfxstreamError::ProtocolViolation(_))
            ));
        }
        assert_eq!(renderer.state().opcode_count(RC_GET_CONFIGS), 0);

        let (num_configs, num_attribs) = rc.get_num_configs().unwrap();
        let table = rc.get_configs(num_configs, num_attribs).unwrap();
        assert_eq!(table.len(), ((num_configs + 1) * num_attribs) as usize);
    }
}
