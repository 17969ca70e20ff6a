// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod checksum;
mod render_control_protocol;
mod stream;
mod transport;

pub use checksum::ChecksumCalculator;
pub use checksum::MAX_CHECKSUM_VERSION;
pub use render_control_protocol::*;
pub use stream::Command;
pub use stream::RenderStream;
pub use stream::Reply;
pub use transport::connect;
pub use transport::IoTransport;
pub use transport::QemuPipeTransport;
pub use transport::Transport;
pub use transport::TransportKind;
pub use transport::OPENGLES_PIPE_SERVICE;
pub use transport::QEMU_PIPE_DEVICES;
pub use transport::REFCOUNT_PIPE_SERVICE;
