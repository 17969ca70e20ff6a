// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! gles_encoder: The few GLES entry points the connection layer issues itself.

use std::mem::size_of;

use crate::egl_defines::GLenum;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GlesApi {
    Gles1,
    Gles2,
}

/// Per-connection state of a GLES encoder, created on first use.
#[derive(Clone, Debug)]
pub struct GlesEncoderState {
    api: GlesApi,
    checksum_version: u32,
}

impl GlesEncoderState {
    pub fn new(api: GlesApi, checksum_version: u32) -> GlesEncoderState {
        GlesEncoderState {
            api,
            checksum_version,
        }
    }

    pub fn api(&self) -> GlesApi {
        self.api
    }

    /// Checksum version inherited from render-control negotiation.
    pub fn checksum_version(&self) -> u32 {
        self.checksum_version
    }
}

pub struct GlesEncoder<'a> {
    stream: &'a mut RenderStream,
    state: &'a GlesEncoderState,
}

impl<'a> GlesEncoder<'a> {
    pub fn new(stream: &'a mut RenderStream, state: &'a GlesEncoderState) -> GlesEncoder<'a> {
        GlesEncoder { stream, state }
    }

    pub fn api(&self) -> GlesApi {
        self.state.api
    }

    fn opcode(&self, gles1: u32, gles2: u32) -> u32 {
        match self.state.api {
            GlesApi::Gles1 => gles1,
            GlesApi::Gles2 => gles2,
        }
    }

    pub fn get_integerv(&mut self, pname: GLenum) -> GfxstreamResult<i32> {
        let command = Command::new(self.opcode(GLES1_OP_GET_INTEGERV, GLES2_OP_GET_INTEGERV))
            .u32(pname)
            .out_buffer(size_of::<i32>())?;
        self.stream.transact(command, 0)?.i32()
    }

    pub fn flush(&mut self) -> GfxstreamResult<()> {
        self.stream
            .send(Command::new(self.opcode(GLES1_OP_FLUSH, GLES2_OP_FLUSH)))?;
        self.stream.flush()
    }

    /// Blocks until the host has executed everything issued on this connection.
    pub fn finish(&mut self) -> GfxstreamResult<()> {
        let command = Command::new(self.opcode(GLES1_OP_FINISH, GLES2_OP_FINISH));
        self.stream.transact(command, size_of::<u32>())?;
        Ok(())
    }
}
