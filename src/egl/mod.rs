// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest EGL objects and the state machine keeping them consistent with their host counterparts.

mod api;
mod config;
mod context;
mod display;
pub mod entry;
mod object_table;
mod surface;
mod sync;
mod thread_info;

pub use config::ConfigTable;
pub use config::RenderableType;
pub use config::SurfaceType;
pub use context::gles_api_for;
pub use context::parse_context_attribs;
pub use context::BindingState;
pub use context::ClientState;
pub use context::EglContext;
pub use context::GlLimits;
pub use context::Release;
pub use context::SharedGroup;
pub use context::VertexAttrib;
pub(crate) use display::destroy_retired;
pub use display::Display;
pub(crate) use display::Retired;
pub(crate) use display::SharedContext;
pub(crate) use display::SharedSurface;
pub(crate) use object_table::lock;
pub use object_table::ConfigHandle;
pub use object_table::ContextHandle;
pub use object_table::ObjectTable;
pub use object_table::SurfaceHandle;
pub use object_table::SyncHandle;
pub use surface::PbufferSurface;
pub use surface::Surface;
pub use surface::SurfaceBase;
pub use surface::WindowSurface;
pub use sync::EglSync;
pub use thread_info::Connector;
pub use thread_info::CurrentBinding;
pub use thread_info::EglThreadInfo;
pub use thread_info::ThreadToken;
