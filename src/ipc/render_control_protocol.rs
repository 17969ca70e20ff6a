// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hand-written description of the render-control wire protocol. Intended to be shared with the
//! host renderer.
//!
//! Every packet starts with a `RenderControlHeader`; `size` covers the header, the arguments and
//! the checksum trailer. Scalars are little endian. Input buffers are sent as `[len u32][bytes]`,
//! output buffers only as `[len u32]`. A reply carries the output buffers followed by the return
//! value and then the checksum trailer.

#![allow(dead_code)]

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Render-control opcodes (must match the host decoder).
pub const RC_GET_RENDERER_VERSION: u32 = 10000;
pub const RC_GET_EGL_VERSION: u32 = 10001;
pub const RC_QUERY_EGL_STRING: u32 = 10002;
pub const RC_GET_GL_STRING: u32 = 10003;
pub const RC_GET_NUM_CONFIGS: u32 = 10004;
pub const RC_GET_CONFIGS: u32 = 10005;
pub const RC_CHOOSE_CONFIG: u32 = 10006;
pub const RC_GET_FB_PARAM: u32 = 10007;
pub const RC_CREATE_CONTEXT: u32 = 10008;
pub const RC_DESTROY_CONTEXT: u32 = 10009;
pub const RC_CREATE_WINDOW_SURFACE: u32 = 10010;
pub const RC_DESTROY_WINDOW_SURFACE: u32 = 10011;
pub const RC_CREATE_COLOR_BUFFER: u32 = 10012;
pub const RC_OPEN_COLOR_BUFFER: u32 = 10013;
pub const RC_CLOSE_COLOR_BUFFER: u32 = 10014;
pub const RC_SET_WINDOW_COLOR_BUFFER: u32 = 10015;
pub const RC_FLUSH_WINDOW_COLOR_BUFFER: u32 = 10016;
pub const RC_MAKE_CURRENT: u32 = 10017;
pub const RC_FB_POST: u32 = 10018;
pub const RC_FB_SET_SWAP_INTERVAL: u32 = 10019;
pub const RC_BIND_TEXTURE: u32 = 10020;
pub const RC_BIND_RENDERBUFFER: u32 = 10021;
pub const RC_OPEN_COLOR_BUFFER2: u32 = 10025;
pub const RC_SELECT_CHECKSUM_HELPER: u32 = 10028;
pub const RC_CREATE_SYNC_KHR: u32 = 10029;
pub const RC_CLIENT_WAIT_SYNC_KHR: u32 = 10030;
pub const RC_FLUSH_WINDOW_COLOR_BUFFER_ASYNC: u32 = 10031;
pub const RC_DESTROY_SYNC_KHR: u32 = 10032;
pub const RC_WAIT_SYNC_KHR: u32 = 10036;
pub const RC_COMPOSE: u32 = 10037;
pub const RC_GET_DISPLAY_POSE: u32 = 10043;
pub const RC_IS_SYNC_SIGNALED: u32 = 10047;
pub const RC_GET_HOST_EXTENSIONS_STRING: u32 = 10054;

/// GLES 1 opcodes used by the core (the rest of the API is generated elsewhere). `glFinish` is
/// answered with a 32-bit word once the host pipeline has drained.
pub const GLES1_OP_FINISH: u32 = 1056;
pub const GLES1_OP_FLUSH: u32 = 1057;
pub const GLES1_OP_GET_INTEGERV: u32 = 1066;

/// GLES 2/3 opcodes used by the core.
pub const GLES2_OP_FINISH: u32 = 2077;
pub const GLES2_OP_FLUSH: u32 = 2078;
pub const GLES2_OP_GET_INTEGERV: u32 = 2094;

/// Values for the gl_version argument of `RC_CREATE_CONTEXT`.
pub const GLES_API_CM: u32 = 1;
pub const GLES_API_2: u32 = 2;
pub const GLES_API_3_0: u32 = 3;
pub const GLES_API_3_1: u32 = 4;

/// Size of the client flags word written right after the transport is opened.
pub const CLIENT_FLAGS_SIZE: usize = 4;

#[derive(Copy, Clone, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct RenderControlHeader {
    pub opcode: u32,
    pub size: u32,
}

/// Layout of the checksum v1 trailer.
#[derive(Copy, Clone, Debug, Default, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct ChecksumTrailerV1 {
    pub length: u32,
    pub sequence: u32,
}

pub fn render_control_opcode_str(opcode: u32) -> &'static str {
    match opcode {
        RC_GET_RENDERER_VERSION => "rcGetRendererVersion",
        RC_GET_EGL_VERSION => "rcGetEGLVersion",
        RC_QUERY_EGL_STRING => "rcQueryEGLString",
        RC_GET_GL_STRING => "rcGetGLString",
        RC_GET_NUM_CONFIGS => "rcGetNumConfigs",
        RC_GET_CONFIGS => "rcGetConfigs",
        RC_CHOOSE_CONFIG => "rcChooseConfig",
        RC_GET_FB_PARAM => "rcGetFBParam",
        RC_CREATE_CONTEXT => "rcCreateContext",
        RC_DESTROY_CONTEXT => "rcDestroyContext",
        RC_CREATE_WINDOW_SURFACE => "rcCreateWindowSurface",
        RC_DESTROY_WINDOW_SURFACE => "rcDestroyWindowSurface",
        RC_CREATE_COLOR_BUFFER => "rcCreateColorBuffer",
        RC_OPEN_COLOR_BUFFER => "rcOpenColorBuffer",
        RC_CLOSE_COLOR_BUFFER => "rcCloseColorBuffer",
        RC_SET_WINDOW_COLOR_BUFFER => "rcSetWindowColorBuffer",
        RC_FLUSH_WINDOW_COLOR_BUFFER => "rcFlushWindowColorBuffer",
        RC_MAKE_CURRENT => "rcMakeCurrent",
        RC_FB_POST => "rcFBPost",
        RC_FB_SET_SWAP_INTERVAL => "rcFBSetSwapInterval",
        RC_BIND_TEXTURE => "rcBindTexture",
        RC_BIND_RENDERBUFFER => "rcBindRenderbuffer",
        RC_OPEN_COLOR_BUFFER2 => "rcOpenColorBuffer2",
        RC_SELECT_CHECKSUM_HELPER => "rcSelectChecksumHelper",
        RC_CREATE_SYNC_KHR => "rcCreateSyncKHR",
        RC_CLIENT_WAIT_SYNC_KHR => "rcClientWaitSyncKHR",
        RC_FLUSH_WINDOW_COLOR_BUFFER_ASYNC => "rcFlushWindowColorBufferAsync",
        RC_DESTROY_SYNC_KHR => "rcDestroySyncKHR",
        RC_WAIT_SYNC_KHR => "rcWaitSyncKHR",
        RC_COMPOSE => "rcCompose",
        RC_GET_DISPLAY_POSE => "rcGetDisplayPose",
        RC_IS_SYNC_SIGNALED => "rcIsSyncSignaled",
        RC_GET_HOST_EXTENSIONS_STRING => "rcGetHostExtensionsString",
        GLES1_OP_FINISH | GLES2_OP_FINISH => "glFinish",
        GLES1_OP_FLUSH | GLES2_OP_FLUSH => "glFlush",
        GLES1_OP_GET_INTEGERV | GLES2_OP_GET_INTEGERV => "glGetIntegerv",
        _ => "UNKNOWN",
    }
}
