// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest side of the gfxstream render-control connection: transports, the render-control
//! encoder, and the EGL objects whose lifetimes mirror host renderer objects.

pub mod egl;
pub mod egl_defines;
pub mod features;
pub mod gles_encoder;
pub mod gralloc;
pub mod guest_utils;
pub mod host_connection;
pub mod ipc;
pub mod native_window;
pub mod parameters;
pub mod render_control;
#[cfg(any(test, feature = "stub"))]
pub mod stub;
pub mod sync_device;

pub use crate::egl::Display;
pub use crate::egl::EglThreadInfo;
pub use crate::features::HostFeatures;
pub use crate::guest_utils::GfxstreamError;
pub use crate::guest_utils::GfxstreamResult;
pub use crate::host_connection::HostConnection;
pub use crate::parameters::ConnectionParameters;
