// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! An in-process stand-in for the host renderer, used by `TransportKind::Stub` connections, the
//! `stub_host` server and the tests.

mod native_window;
mod renderer;

pub use native_window::QueuedFrame;
pub use native_window::StubNativeWindow;
pub use renderer::StubColorBuffer;
pub use renderer::StubConfig;
pub use renderer::StubContext;
pub use renderer::StubRenderer;
pub use renderer::StubState;
pub use renderer::StubSurface;
pub use renderer::StubTransport;
