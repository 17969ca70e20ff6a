// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Definitions and utilities for host connection parameters.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::TransportKind;

/// Names a JSON file holding the `ConnectionParameters` of the process.
pub const CONFIG_ENV_VAR: &str = "GFXSTREAM_GUEST_CONFIG";

/// Kernel synchronization device used to turn host fences into signal descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncDeviceKind {
    /// The goldfish sync driver. `path` overrides `/dev/goldfish_sync`.
    Goldfish {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Pipe-backed descriptors that are signaled as soon as they are created.
    Pipe,
    /// No device: native fences are unavailable and waits are always satisfied.
    None,
}

impl Default for SyncDeviceKind {
    fn default() -> Self {
        SyncDeviceKind::Goldfish { path: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct ConnectionParameters {
    pub transport: TransportKind,
    pub sync_device: SyncDeviceKind,
    /// Skip host traffic when a thread rebinds the context and surfaces it already has current.
    pub fast_rebind: bool,
    /// Hold pbuffer color buffers through the refcount channel when the host offers one.
    pub refcount_pipe: bool,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        ConnectionParameters {
            transport: Default::default(),
            sync_device: Default::default(),
            fast_rebind: true,
            refcount_pipe: true,
        }
    }
}

static GLOBAL_PARAMETERS: RwLock<Option<ConnectionParameters>> = RwLock::new(None);

impl ConnectionParameters {
    pub fn from_json(json: &str) -> GfxstreamResult<ConnectionParameters> {
        let params: ConnectionParameters = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> GfxstreamResult<ConnectionParameters> {
        let json = fs::read_to_string(path)?;
        ConnectionParameters::from_json(&json)
    }

    pub fn validate(&self) -> GfxstreamResult<()> {
        match &self.transport {
            TransportKind::Unix { path } if path.as_os_str().is_empty() => Err(
                GfxstreamError::InvalidParameters("unix transport needs a socket path".to_string()),
            ),
            TransportKind::Tcp { address } if address.is_empty() => Err(
                GfxstreamError::InvalidParameters("tcp transport needs an address".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Replaces the parameters used by connections created after this call.
    pub fn set_global(params: ConnectionParameters) {
        let mut global = GLOBAL_PARAMETERS
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *global = Some(params);
    }

    /// Returns the process-wide parameters.
    ///
    /// Unless set explicitly they are loaded once from the file named by `GFXSTREAM_GUEST_CONFIG`,
    /// falling back to the defaults when the variable is unset or the file is unusable.
    pub fn global() -> ConnectionParameters {
        if let Some(params) = GLOBAL_PARAMETERS
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return params.clone();
        }

        let params = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => ConnectionParameters::from_file(&path).unwrap_or_else(|e| {
                warn!("ignoring {:?} from {}: {}", path, CONFIG_ENV_VAR, e);
                Default::default()
            }),
            None => Default::default(),
        };

        let mut global = GLOBAL_PARAMETERS
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        global.get_or_insert(params).clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_enable_fast_rebind() {
        let params = ConnectionParameters::from_json("{}").unwrap();
        assert!(params.fast_rebind);
        assert!(params.refcount_pipe);
        assert_eq!(params.transport, TransportKind::QemuPipe { device: None });
        assert_eq!(params.sync_device, SyncDeviceKind::Goldfish { path: None });
    }

    #[test]
    fn parse_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "transport": {{"type": "stub"}},
                "sync-device": {{"type": "pipe"}},
                "fast-rebind": false
            }}"#
        )
        .unwrap();

        let params = ConnectionParameters::from_file(file.path()).unwrap();
        assert_eq!(params.transport, TransportKind::Stub);
        assert_eq!(params.sync_device, SyncDeviceKind::Pipe);
        assert!(!params.fast_rebind);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            ConnectionParameters::from_json(r#"{"fast-rebnd": false}"#),
            Err(GfxstreamError::SerdeJsonError(_))
        ));
    }

    #[test]
    fn empty_socket_path_is_invalid() {
        assert!(matches!(
            ConnectionParameters::from_json(r#"{"transport": {"type": "unix", "path": ""}}"#),
            Err(GfxstreamError::InvalidParameters(_))
        ));
    }
}
