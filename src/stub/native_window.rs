// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::egl_defines::GL_RGBA;
use crate::gralloc::NativeBuffer;
use crate::gralloc::HAL_PIXEL_FORMAT_RGBA_8888;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::native_window::NativeWindow;
use crate::native_window::NativeWindowQuery;
use crate::stub::StubRenderer;
use crate::sync_device::SyncFd;

/// A buffer handed to the consumer by `queue_buffer`.
#[derive(Debug)]
pub struct QueuedFrame {
    pub host_handle: u32,
    pub width: u32,
    pub height: u32,
    pub fence: Option<SyncFd>,
}

struct WindowState {
    width: u32,
    height: u32,
    free: Vec<NativeBuffer>,
    dequeued: usize,
    cancelled: usize,
    queued: Vec<QueuedFrame>,
    refs: i32,
    abandoned: bool,
    swap_interval: i32,
}

/// A buffer queue whose buffers are color buffers of a `StubRenderer`. The consumer takes every
/// queued buffer immediately, so the queue never runs dry.
pub struct StubNativeWindow {
    renderer: StubRenderer,
    state: Mutex<WindowState>,
}

impl StubNativeWindow {
    pub fn new(renderer: &StubRenderer, width: u32, height: u32) -> StubNativeWindow {
        StubNativeWindow {
            renderer: renderer.clone(),
            state: Mutex::new(WindowState {
                width,
                height,
                free: Vec::new(),
                dequeued: 0,
                cancelled: 0,
                queued: Vec::new(),
                refs: 0,
                abandoned: false,
                swap_interval: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Changes the size of buffers dequeued from now on.
    pub fn resize(&self, width: u32, height: u32) {
        let stale = {
            let mut state = self.lock();
            state.width = width;
            state.height = height;
            std::mem::take(&mut state.free)
        };
        let mut renderer = self.renderer.state();
        for buffer in stale {
            renderer.release_color_buffer(buffer.host_handle);
        }
    }

    /// Makes the window invalid, as when its consumer goes away.
    pub fn abandon(&self) {
        self.lock().abandoned = true;
    }

    /// Removes and returns every frame queued so far.
    pub fn take_queued(&self) -> Vec<QueuedFrame> {
        std::mem::take(&mut self.lock().queued)
    }

    pub fn dequeued_count(&self) -> usize {
        self.lock().dequeued
    }

    pub fn cancelled_count(&self) -> usize {
        self.lock().cancelled
    }

    pub fn ref_count(&self) -> i32 {
        self.lock().refs
    }

    pub fn swap_interval(&self) -> i32 {
        self.lock().swap_interval
    }
}

impl NativeWindow for StubNativeWindow {
    fn is_valid(&self) -> bool {
        !self.lock().abandoned
    }

    fn dequeue_buffer(&self) -> GfxstreamResult<(NativeBuffer, Option<SyncFd>)> {
        let mut state = self.lock();
        if state.abandoned {
            return Err(GfxstreamError::BadNativeWindow);
        }
        state.dequeued += 1;
        if let Some(buffer) = state.free.pop() {
            return Ok((buffer, None));
        }

        let (width, height) = (state.width, state.height);
        let host_handle = self
            .renderer
            .state()
            .allocate_color_buffer(width, height, GL_RGBA);
        let buffer = NativeBuffer {
            width,
            height,
            stride: width,
            format: HAL_PIXEL_FORMAT_RGBA_8888,
            host_handle,
        };
        Ok((buffer, None))
    }

    fn queue_buffer(&self, buffer: NativeBuffer, fence: Option<SyncFd>) -> GfxstreamResult<()> {
        let mut state = self.lock();
        state.queued.push(QueuedFrame {
            host_handle: buffer.host_handle,
            width: buffer.width,
            height: buffer.height,
            fence,
        });
        self.recycle(&mut state, buffer);
        Ok(())
    }

    fn cancel_buffer(&self, buffer: NativeBuffer) -> GfxstreamResult<()> {
        let mut state = self.lock();
        state.cancelled += 1;
        self.recycle(&mut state, buffer);
        Ok(())
    }

    fn query(&self, what: NativeWindowQuery) -> GfxstreamResult<i32> {
        let state = self.lock();
        let value = match what {
            NativeWindowQuery::Width => state.width.try_into()?,
            NativeWindowQuery::Height => state.height.try_into()?,
            NativeWindowQuery::Format => HAL_PIXEL_FORMAT_RGBA_8888 as i32,
            NativeWindowQuery::MinUndequeuedBuffers => 1,
        };
        Ok(value)
    }

    fn set_swap_interval(&self, interval: i32) -> GfxstreamResult<()> {
        self.lock().swap_interval = interval;
        Ok(())
    }

    fn inc_ref(&self) {
        self.lock().refs += 1;
    }

    fn dec_ref(&self) {
        self.lock().refs -= 1;
    }
}

impl StubNativeWindow {
    /// Puts `buffer` back in the free list, unless the window has been resized since it was
    /// allocated.
    fn recycle(&self, state: &mut WindowState, buffer: NativeBuffer) {
        match buffer.width == state.width && buffer.height == state.height {
            true => state.free.push(buffer),
            false => self.renderer.state().release_color_buffer(buffer.host_handle),
        }
    }
}

impl Drop for StubNativeWindow {
    fn drop(&mut self) {
        let free = std::mem::take(&mut self.lock().free);
        let mut renderer = self.renderer.state();
        for buffer in free {
            renderer.release_color_buffer(buffer.host_handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubConfig;

    #[test]
    fn buffers_are_reused_until_resize() {
        let renderer = StubRenderer::new(StubConfig::default());
        let window = StubNativeWindow::new(&renderer, 64, 32);

        let (first, _) = window.dequeue_buffer().unwrap();
        window.queue_buffer(first.clone(), None).unwrap();
        let (second, _) = window.dequeue_buffer().unwrap();
        assert_eq!(first.host_handle, second.host_handle);

        window.resize(128, 64);
        window.cancel_buffer(second).unwrap();
        assert!(!renderer.state().color_buffers().contains_key(&first.host_handle));

        let (third, _) = window.dequeue_buffer().unwrap();
        assert_eq!((third.width, third.height), (128, 64));
        assert_eq!(window.cancelled_count(), 1);
        assert_eq!(window.take_queued().len(), 1);
    }

    #[test]
    fn abandoned_window_refuses_dequeue() {
        let renderer = StubRenderer::new(StubConfig::default());
        let window = StubNativeWindow::new(&renderer, 8, 8);
        window.abandon();
        assert!(!window.is_valid());
        assert!(matches!(
            window.dequeue_buffer(),
            Err(GfxstreamError::BadNativeWindow)
        ));
    }
}
