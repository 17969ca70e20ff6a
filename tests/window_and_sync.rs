// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::test_parameters;
use common::Fixture;
use gfxstream_guest::egl::ContextHandle;
use gfxstream_guest::egl::SurfaceHandle;
use gfxstream_guest::egl::SyncHandle;
use gfxstream_guest::egl_defines::*;
use gfxstream_guest::guest_utils::GfxstreamError;
use gfxstream_guest::ipc::*;
use gfxstream_guest::native_window::NativeWindow;
use gfxstream_guest::stub::StubConfig;
use gfxstream_guest::stub::StubNativeWindow;

fn window_surface(f: &mut Fixture, window: &Arc<StubNativeWindow>) -> SurfaceHandle {
    let config = f.config(EGL_WINDOW_BIT);
    let native: Arc<dyn NativeWindow> = window.clone();
    f.display
        .create_window_surface(&mut f.thread, config, Some(native), &[EGL_NONE])
        .unwrap()
}

fn release(f: &mut Fixture) {
    f.display
        .make_current(
            &mut f.thread,
            SurfaceHandle::NONE,
            SurfaceHandle::NONE,
            ContextHandle::NONE,
        )
        .unwrap();
}

#[test]
fn window_swap_queues_fenced_frames() {
    let mut f = Fixture::new();
    let window = Arc::new(StubNativeWindow::new(&f.renderer, 32, 32));
    let surface = window_surface(&mut f, &window);
    assert_eq!(window.ref_count(), 1);
    assert_eq!(f.display.query_surface(surface, EGL_WIDTH).unwrap(), 32);

    let ctx = f.context(2);
    f.make_current(surface, ctx);
    f.display.swap_buffers(&mut f.thread, surface).unwrap();

    let frames = window.take_queued();
    assert_eq!(frames.len(), 1);
    let fence = frames[0].fence.as_ref().unwrap();
    assert!(fence.wait(Some(Duration::ZERO)).unwrap());
    assert_eq!(f.opcode_count(RC_CREATE_SYNC_KHR), 1);
    assert_eq!(f.opcode_count(RC_FLUSH_WINDOW_COLOR_BUFFER), 0);

    // The presented fence frees itself on the host once signaled.
    f.flush();
    assert_eq!(f.renderer.state().live_syncs(), 0);
    assert_eq!(f.opcode_count(RC_FLUSH_WINDOW_COLOR_BUFFER_ASYNC), 1);

    window.resize(64, 32);
    f.display.swap_buffers(&mut f.thread, surface).unwrap();
    let frames = window.take_queued();
    assert_eq!((frames[0].width, frames[0].height), (32, 32));
    assert_eq!(f.display.query_surface(surface, EGL_WIDTH).unwrap(), 64);
    assert_eq!(f.display.query_surface(surface, EGL_HEIGHT).unwrap(), 32);
}

#[test]
fn destroying_a_current_window_surface_returns_its_buffer() {
    let mut f = Fixture::new();
    let window = Arc::new(StubNativeWindow::new(&f.renderer, 16, 16));
    let surface = window_surface(&mut f, &window);
    let ctx = f.context(2);
    f.make_current(surface, ctx);

    f.display.destroy_surface(&mut f.thread, surface).unwrap();
    assert_eq!(window.ref_count(), 1);
    assert_eq!(window.cancelled_count(), 0);

    release(&mut f);
    f.flush();
    assert_eq!(window.ref_count(), 0);
    assert_eq!(window.cancelled_count(), 1);
    assert!(f.renderer.state().surfaces().is_empty());
    assert!(f.display.is_context(ctx));
}

#[test]
fn abandoned_window_is_rejected() {
    let mut f = Fixture::new();
    let window = Arc::new(StubNativeWindow::new(&f.renderer, 16, 16));
    window.abandon();
    let config = f.config(EGL_WINDOW_BIT);
    let native: Arc<dyn NativeWindow> = window.clone();

    assert!(matches!(
        f.display
            .create_window_surface(&mut f.thread, config, Some(native), &[EGL_NONE]),
        Err(GfxstreamError::BadNativeWindow)
    ));
    assert!(matches!(
        f.display
            .create_window_surface(&mut f.thread, config, None, &[EGL_NONE]),
        Err(GfxstreamError::BadNativeWindow)
    ));
    assert_eq!(f.opcode_count(RC_CREATE_WINDOW_SURFACE), 0);
}

#[test]
fn swap_interval_reaches_window_and_host() {
    let mut f = Fixture::new();
    assert!(matches!(
        f.display.swap_interval(&mut f.thread, 0),
        Err(GfxstreamError::BadContext)
    ));

    let window = Arc::new(StubNativeWindow::new(&f.renderer, 16, 16));
    let surface = window_surface(&mut f, &window);
    let ctx = f.context(2);
    f.make_current(surface, ctx);

    f.display.swap_interval(&mut f.thread, 0).unwrap();
    f.flush();
    assert_eq!(window.swap_interval(), 0);
    assert_eq!(f.renderer.state().swap_interval(), 0);
}

#[test]
fn without_native_sync_swaps_and_fences_finish_on_the_spot() {
    let mut f = Fixture::with(StubConfig::without_native_sync(), test_parameters());
    let extensions = f.display.query_string(EGL_EXTENSIONS).unwrap();
    assert!(extensions.contains("EGL_KHR_fence_sync"));
    assert!(!extensions.contains("EGL_ANDROID_native_fence_sync"));
    assert!(!extensions.contains("EGL_KHR_wait_sync"));

    let window = Arc::new(StubNativeWindow::new(&f.renderer, 16, 16));
    let surface = window_surface(&mut f, &window);
    let ctx = f.context(2);
    f.make_current(surface, ctx);

    f.display.swap_buffers(&mut f.thread, surface).unwrap();
    let frames = window.take_queued();
    assert!(frames[0].fence.is_none());
    assert_eq!(f.opcode_count(RC_FLUSH_WINDOW_COLOR_BUFFER), 1);

    let finishes = f.opcode_count(GLES2_OP_FINISH);
    let sync = f
        .display
        .create_sync(&mut f.thread, EGL_SYNC_FENCE_KHR, &[EGL_NONE])
        .unwrap();
    assert_eq!(f.opcode_count(GLES2_OP_FINISH), finishes + 1);
    assert_eq!(
        f.display
            .get_sync_attrib(&mut f.thread, sync, EGL_SYNC_STATUS_KHR)
            .unwrap(),
        EGL_SIGNALED_KHR
    );
    assert_eq!(f.opcode_count(RC_CREATE_SYNC_KHR), 0);

    assert!(matches!(
        f.display
            .create_sync(&mut f.thread, EGL_SYNC_NATIVE_FENCE_ANDROID, &[EGL_NONE]),
        Err(GfxstreamError::BadAttribute(_))
    ));
}

#[test]
fn native_fence_exports_a_descriptor() {
    let mut f = Fixture::new();
    let ctx = f.context(2);
    let surface = f.pbuffer(8, 8);
    f.make_current(surface, ctx);

    let sync = f
        .display
        .create_sync(&mut f.thread, EGL_SYNC_NATIVE_FENCE_ANDROID, &[EGL_NONE])
        .unwrap();
    assert_eq!(
        f.display
            .get_sync_attrib(&mut f.thread, sync, EGL_SYNC_TYPE_KHR)
            .unwrap(),
        EGL_SYNC_NATIVE_FENCE_ANDROID
    );
    let fd = f.display.dup_native_fence_fd(sync).unwrap();
    assert!(fd.wait(Some(Duration::ZERO)).unwrap());
    assert_eq!(f.renderer.state().live_syncs(), 1);

    f.display.destroy_sync(&mut f.thread, sync).unwrap();
    assert_eq!(f.opcode_count(RC_DESTROY_SYNC_KHR), 1);
    assert_eq!(f.renderer.state().live_syncs(), 0);
    // The exported descriptor outlives the sync.
    assert!(fd.wait(None).unwrap());
}

#[test]
fn native_fence_rejects_negative_descriptors() {
    let mut f = Fixture::new();
    let syncs = f.opcode_count(RC_CREATE_SYNC_KHR);
    for fd in [-5, -2, i32::MIN] {
        assert!(matches!(
            f.display.create_sync(
                &mut f.thread,
                EGL_SYNC_NATIVE_FENCE_ANDROID,
                &[EGL_SYNC_NATIVE_FENCE_FD_ANDROID, fd, EGL_NONE]
            ),
            Err(GfxstreamError::BadAttribute(EGL_SYNC_NATIVE_FENCE_FD_ANDROID))
        ));
    }
    assert_eq!(f.opcode_count(RC_CREATE_SYNC_KHR), syncs);
}

#[test]
fn native_fence_without_current_context_has_no_descriptor() {
    let mut f = Fixture::new();
    let sync = f
        .display
        .create_sync(&mut f.thread, EGL_SYNC_NATIVE_FENCE_ANDROID, &[EGL_NONE])
        .unwrap();
    assert!(matches!(
        f.display.dup_native_fence_fd(sync),
        Err(GfxstreamError::BadParameter(_))
    ));
}

#[test]
fn fence_status_follows_the_host() {
    let config = StubConfig {
        signal_syncs: false,
        ..Default::default()
    };
    let mut f = Fixture::with(config, test_parameters());
    let ctx = f.context(2);
    let surface = f.pbuffer(8, 8);
    f.make_current(surface, ctx);

    let sync = f
        .display
        .create_sync(&mut f.thread, EGL_SYNC_FENCE_KHR, &[EGL_NONE])
        .unwrap();
    assert_eq!(
        f.display
            .get_sync_attrib(&mut f.thread, sync, EGL_SYNC_STATUS_KHR)
            .unwrap(),
        EGL_UNSIGNALED_KHR
    );
    assert_eq!(
        f.display
            .client_wait_sync(&mut f.thread, sync, 0, 0)
            .unwrap(),
        EGL_TIMEOUT_EXPIRED_KHR
    );

    f.display.wait_sync(&mut f.thread, sync, 0).unwrap();
    f.flush();
    assert_eq!(f.opcode_count(RC_WAIT_SYNC_KHR), 1);

    f.renderer.state().signal_all_syncs();
    assert_eq!(
        f.display
            .get_sync_attrib(&mut f.thread, sync, EGL_SYNC_STATUS_KHR)
            .unwrap(),
        EGL_SIGNALED_KHR
    );
    let waits = f.opcode_count(RC_CLIENT_WAIT_SYNC_KHR);
    assert_eq!(
        f.display
            .client_wait_sync(&mut f.thread, sync, 0, EGL_FOREVER_KHR)
            .unwrap(),
        EGL_CONDITION_SATISFIED_KHR
    );
    // A signaled fence is answered without asking the host.
    assert_eq!(f.opcode_count(RC_CLIENT_WAIT_SYNC_KHR), waits);
}

#[test]
fn forever_wait_completes_pending_fence() {
    let config = StubConfig {
        signal_syncs: false,
        ..Default::default()
    };
    let mut f = Fixture::with(config, test_parameters());
    let sync = f
        .display
        .create_sync(&mut f.thread, EGL_SYNC_FENCE_KHR, &[EGL_NONE])
        .unwrap();
    assert_eq!(
        f.display
            .client_wait_sync(&mut f.thread, sync, 0, EGL_FOREVER_KHR)
            .unwrap(),
        EGL_CONDITION_SATISFIED_KHR
    );
    assert_eq!(
        f.display
            .get_sync_attrib(&mut f.thread, sync, EGL_SYNC_STATUS_KHR)
            .unwrap(),
        EGL_SIGNALED_KHR
    );
}

#[test]
fn null_sync_is_already_signaled() {
    let mut f = Fixture::new();
    assert_eq!(
        f.display
            .client_wait_sync(&mut f.thread, SyncHandle::NONE, 0, EGL_FOREVER_KHR)
            .unwrap(),
        EGL_CONDITION_SATISFIED_KHR
    );
    f.display
        .wait_sync(&mut f.thread, SyncHandle::NONE, 0)
        .unwrap();
    f.display
        .destroy_sync(&mut f.thread, SyncHandle::NONE)
        .unwrap();
    assert!(matches!(
        f.display
            .get_sync_attrib(&mut f.thread, SyncHandle::NONE, EGL_SYNC_STATUS_KHR),
        Err(GfxstreamError::BadParameter(_))
    ));
}
