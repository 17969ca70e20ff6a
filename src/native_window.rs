// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::gralloc::NativeBuffer;
use crate::guest_utils::GfxstreamResult;
use crate::sync_device::SyncFd;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NativeWindowQuery {
    Width,
    Height,
    Format,
    MinUndequeuedBuffers,
}

/// The buffer queue a window surface renders into.
///
/// Implementations are shared between the surface and whoever produced the window, so every
/// method takes `&self`.
pub trait NativeWindow: Send + Sync {
    /// False once the window has been abandoned by its consumer.
    fn is_valid(&self) -> bool {
        true
    }

    /// Takes the next free buffer, together with the signal that must fire before it is written.
    fn dequeue_buffer(&self) -> GfxstreamResult<(NativeBuffer, Option<SyncFd>)>;
    /// Hands a rendered buffer to the consumer. `fence` fires once rendering is complete.
    fn queue_buffer(&self, buffer: NativeBuffer, fence: Option<SyncFd>) -> GfxstreamResult<()>;
    /// Returns a dequeued buffer without presenting it.
    fn cancel_buffer(&self, buffer: NativeBuffer) -> GfxstreamResult<()>;
    fn query(&self, what: NativeWindowQuery) -> GfxstreamResult<i32>;
    fn set_swap_interval(&self, interval: i32) -> GfxstreamResult<()>;
    fn inc_ref(&self);
    fn dec_ref(&self);
}
