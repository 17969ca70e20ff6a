// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! guest_utils: Error type, results and small helpers shared by every module of the crate.

use std::io::Error as IoError;
use std::num::TryFromIntError;

use nix::Error as NixError;
use remain::sorted;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::egl_defines::*;

/// An error generated while talking to the host renderer or while validating guest EGL state.
#[sorted]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GfxstreamError {
    /// The context is current on another thread.
    #[error("context is current on another thread")]
    BadAccess,
    /// The host failed to allocate the named object.
    #[error("host failed to allocate {0}")]
    BadAlloc(&'static str),
    /// An attribute or attribute value is not recognized.
    #[error("invalid attribute {0:#x}")]
    BadAttribute(EGLint),
    /// The config handle is invalid or the config cannot satisfy the request.
    #[error("invalid or unsupported config")]
    BadConfig,
    /// The context handle does not name a live context.
    #[error("invalid context")]
    BadContext,
    /// The display handle does not name the display.
    #[error("invalid display")]
    BadDisplay,
    /// Arguments are inconsistent with each other.
    #[error("arguments are inconsistent: {0}")]
    BadMatch(&'static str),
    /// The native window is missing or invalid.
    #[error("invalid native window")]
    BadNativeWindow,
    /// A parameter is out of range or names a dead object.
    #[error("invalid parameter: {0}")]
    BadParameter(&'static str),
    /// The surface handle does not name a live surface.
    #[error("invalid surface")]
    BadSurface,
    /// The checksum trailer of a reply did not match the expected one.
    #[error("checksum mismatch: expected ({expected_len}, {expected_seq}), got ({len}, {seq})")]
    ChecksumMismatch {
        expected_len: u32,
        expected_seq: u32,
        len: u32,
        seq: u32,
    },
    /// The host connection could not be established or was lost.
    #[error("host connection unavailable")]
    ConnectionUnavailable,
    /// Invalid configuration parameters.
    #[error("invalid connection parameters: {0}")]
    InvalidParameters(String),
    /// An input/output error occurred.
    #[error("an input/output error occurred: {0}")]
    IoError(IoError),
    /// Nix crate error.
    #[error("the errno is {0}")]
    NixError(NixError),
    /// The display has not been initialized.
    #[error("display is not initialized")]
    NotInitialized,
    /// The host sent something the protocol does not allow.
    #[error("host violated the render-control protocol: {0}")]
    ProtocolViolation(&'static str),
    /// Configuration could not be deserialized.
    #[error("failed to parse configuration: {0}")]
    SerdeJsonError(SerdeJsonError),
    /// An integer conversion failed.
    #[error("integer conversion failed: {0}")]
    TryFromIntError(TryFromIntError),
    /// The negotiated host capabilities do not support the operation.
    #[error("the operation is not supported by the host")]
    Unsupported,
}

impl GfxstreamError {
    /// Returns the EGL error code reported to the guest for this error.
    pub fn egl_error(&self) -> EGLint {
        use self::GfxstreamError::*;

        match self {
            BadAccess => EGL_BAD_ACCESS,
            BadAlloc(_) => EGL_BAD_ALLOC,
            BadAttribute(_) => EGL_BAD_ATTRIBUTE,
            BadConfig | Unsupported => EGL_BAD_CONFIG,
            BadContext => EGL_BAD_CONTEXT,
            BadDisplay => EGL_BAD_DISPLAY,
            BadMatch(_) => EGL_BAD_MATCH,
            BadNativeWindow => EGL_BAD_NATIVE_WINDOW,
            BadParameter(_) | TryFromIntError(_) => EGL_BAD_PARAMETER,
            BadSurface => EGL_BAD_SURFACE,
            NotInitialized => EGL_NOT_INITIALIZED,
            // Everything below means the host is unreachable or misbehaving.
            ChecksumMismatch { .. }
            | ConnectionUnavailable
            | InvalidParameters(_)
            | IoError(_)
            | NixError(_)
            | ProtocolViolation(_)
            | SerdeJsonError(_) => EGL_BAD_ALLOC,
        }
    }

    /// True if the error means the connection to the host can no longer be used.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            GfxstreamError::ChecksumMismatch { .. }
                | GfxstreamError::ConnectionUnavailable
                | GfxstreamError::IoError(_)
                | GfxstreamError::ProtocolViolation(_)
        )
    }
}

impl From<IoError> for GfxstreamError {
    fn from(e: IoError) -> GfxstreamError {
        GfxstreamError::IoError(e)
    }
}

impl From<NixError> for GfxstreamError {
    fn from(e: NixError) -> GfxstreamError {
        GfxstreamError::NixError(e)
    }
}

impl From<SerdeJsonError> for GfxstreamError {
    fn from(e: SerdeJsonError) -> GfxstreamError {
        GfxstreamError::SerdeJsonError(e)
    }
}

impl From<TryFromIntError> for GfxstreamError {
    fn from(e: TryFromIntError) -> GfxstreamError {
        GfxstreamError::TryFromIntError(e)
    }
}

/// The result of an operation in this crate.
pub type GfxstreamResult<T> = std::result::Result<T, GfxstreamError>;

/// Iterates over an `EGL_NONE` terminated attribute list as (attribute, value) pairs.
///
/// A trailing attribute without a value is ignored.
pub fn attrib_pairs(attribs: &[EGLint]) -> impl Iterator<Item = (EGLint, EGLint)> + '_ {
    attribs
        .chunks_exact(2)
        .take_while(|pair| pair[0] != EGL_NONE)
        .map(|pair| (pair[0], pair[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attrib_pairs_stop_at_none() {
        let attribs = [EGL_WIDTH, 16, EGL_HEIGHT, 32, EGL_NONE, EGL_WIDTH, 99];
        let pairs: Vec<_> = attrib_pairs(&attribs).collect();
        assert_eq!(pairs, vec![(EGL_WIDTH, 16), (EGL_HEIGHT, 32)]);
    }

    #[test]
    fn connection_errors_map_to_bad_alloc() {
        assert_eq!(GfxstreamError::ConnectionUnavailable.egl_error(), EGL_BAD_ALLOC);
        assert!(GfxstreamError::ConnectionUnavailable.is_connection_failure());
        assert!(!GfxstreamError::BadContext.is_connection_failure());
        assert_eq!(GfxstreamError::BadAccess.egl_error(), EGL_BAD_ACCESS);
    }
}
