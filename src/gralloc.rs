// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! gralloc: Translation between guest buffer allocations and host color buffers.

use crate::egl_defines::*;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::render_control::RenderControlEncoder;

/// Android HAL pixel formats carried by guest buffers.
pub const HAL_PIXEL_FORMAT_RGBA_8888: u32 = 1;
pub const HAL_PIXEL_FORMAT_RGBX_8888: u32 = 2;
pub const HAL_PIXEL_FORMAT_RGB_888: u32 = 3;
pub const HAL_PIXEL_FORMAT_RGB_565: u32 = 4;
pub const HAL_PIXEL_FORMAT_BGRA_8888: u32 = 5;

/// A guest buffer allocation as handed out by the allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NativeBuffer {
    pub width: u32,
    pub height: u32,
    /// Row stride in pixels.
    pub stride: u32,
    /// One of the `HAL_PIXEL_FORMAT_*` values.
    pub format: u32,
    /// Color buffer the allocator created on the host for this buffer.
    pub host_handle: u32,
}

pub fn hal_format_bytes_per_pixel(format: u32) -> Option<usize> {
    match format {
        HAL_PIXEL_FORMAT_RGBA_8888 | HAL_PIXEL_FORMAT_RGBX_8888 | HAL_PIXEL_FORMAT_BGRA_8888 => {
            Some(4)
        }
        HAL_PIXEL_FORMAT_RGB_888 => Some(3),
        HAL_PIXEL_FORMAT_RGB_565 => Some(2),
        _ => None,
    }
}

/// Maps guest buffers to host color buffers. Injected when a connection is built.
pub trait Gralloc: Send {
    fn host_handle(&self, buffer: &NativeBuffer) -> u32;
    fn format(&self, buffer: &NativeBuffer) -> u32;
    fn allocated_size(&self, buffer: &NativeBuffer) -> usize;
    /// Allocates a host color buffer that no guest buffer backs (pbuffers).
    fn create_color_buffer(
        &self,
        rc: &mut RenderControlEncoder,
        width: u32,
        height: u32,
        gl_format: GLenum,
    ) -> GfxstreamResult<u32>;
}

/// Translator for buffers from the goldfish allocator, whose handles embed the host color buffer.
#[derive(Default)]
pub struct GoldfishGralloc;

impl Gralloc for GoldfishGralloc {
    fn host_handle(&self, buffer: &NativeBuffer) -> u32 {
        buffer.host_handle
    }

    fn format(&self, buffer: &NativeBuffer) -> u32 {
        buffer.format
    }

    fn allocated_size(&self, buffer: &NativeBuffer) -> usize {
        let bpp = hal_format_bytes_per_pixel(buffer.format).unwrap_or(4);
        buffer.stride.max(buffer.width) as usize * buffer.height as usize * bpp
    }

    fn create_color_buffer(
        &self,
        rc: &mut RenderControlEncoder,
        width: u32,
        height: u32,
        gl_format: GLenum,
    ) -> GfxstreamResult<u32> {
        match rc.create_color_buffer(width, height, gl_format)? {
            0 => Err(GfxstreamError::BadAlloc("color buffer")),
            handle => Ok(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_size_uses_stride() {
        let buffer = NativeBuffer {
            width: 100,
            height: 10,
            stride: 128,
            format: HAL_PIXEL_FORMAT_RGB_565,
            host_handle: 3,
        };
        let gralloc = GoldfishGralloc;
        assert_eq!(gralloc.allocated_size(&buffer), 128 * 10 * 2);
        assert_eq!(gralloc.host_handle(&buffer), 3);
        assert_eq!(gralloc.format(&buffer), HAL_PIXEL_FORMAT_RGB_565);
    }
}
