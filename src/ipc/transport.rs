// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Byte channels to the host renderer.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
#[cfg(any(test, feature = "stub"))]
use crate::stub::StubRenderer;

/// Device nodes probed, in order, for the goldfish pipe.
pub const QEMU_PIPE_DEVICES: [&str; 2] = ["/dev/qemu_pipe", "/dev/goldfish_pipe"];
/// Service name written to a fresh pipe to reach the render-control decoder.
pub const OPENGLES_PIPE_SERVICE: &[u8] = b"pipe:opengles\0";
/// Service name of the side channel used to hold color buffer references.
pub const REFCOUNT_PIPE_SERVICE: &[u8] = b"pipe:refcount\0";

/// An ordered, reliable byte channel to the host.
///
/// Retries and backoff are the transport's business; any error returned here is final for the
/// connection that owns the transport.
pub trait Transport: Send {
    fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()>;
    fn flush(&mut self) -> GfxstreamResult<()>;
    /// Blocks until exactly `data.len()` bytes of reply have been read.
    fn read_exact(&mut self, data: &mut [u8]) -> GfxstreamResult<()>;

    /// Opens a side channel whose lifetime tells the host the guest still holds a color buffer.
    /// Transports without such a channel return `None`.
    fn open_refcount_channel(&self) -> GfxstreamResult<Option<Box<dyn Transport>>> {
        Ok(None)
    }
}

/// Selects how a host connection reaches the renderer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportKind {
    /// Goldfish pipe device. `device` overrides the probed device nodes.
    QemuPipe {
        #[serde(default)]
        device: Option<PathBuf>,
    },
    /// Stream socket served by a host renderer (or by the `stub_host` binary).
    Unix { path: PathBuf },
    /// TCP address of a host renderer.
    Tcp { address: String },
    /// In-process stub renderer.
    #[cfg(any(test, feature = "stub"))]
    Stub,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::QemuPipe { device: None }
    }
}

/// A transport over any blocking `Read + Write` stream.
pub struct IoTransport<S> {
    stream: S,
}

impl<S: Read + Write + Send> IoTransport<S> {
    pub fn new(stream: S) -> IoTransport<S> {
        IoTransport { stream }
    }
}

impl<S: Read + Write + Send> Transport for IoTransport<S> {
    fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> GfxstreamResult<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, data: &mut [u8]) -> GfxstreamResult<()> {
        self.stream.read_exact(data)?;
        Ok(())
    }
}

/// A goldfish pipe connected to a named host service.
pub struct QemuPipeTransport {
    device: PathBuf,
    inner: IoTransport<File>,
}

impl QemuPipeTransport {
    pub fn open(device: Option<&Path>) -> GfxstreamResult<QemuPipeTransport> {
        let (device, file) = open_pipe_device(device, OPENGLES_PIPE_SERVICE)?;
        Ok(QemuPipeTransport {
            device,
            inner: IoTransport::new(file),
        })
    }
}

impl Transport for QemuPipeTransport {
    fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()> {
        self.inner.write_all(data)
    }

    fn flush(&mut self) -> GfxstreamResult<()> {
        self.inner.flush()
    }

    fn read_exact(&mut self, data: &mut [u8]) -> GfxstreamResult<()> {
        self.inner.read_exact(data)
    }

    fn open_refcount_channel(&self) -> GfxstreamResult<Option<Box<dyn Transport>>> {
        let (_, file) = open_pipe_device(Some(&self.device), REFCOUNT_PIPE_SERVICE)?;
        Ok(Some(Box::new(IoTransport::new(file))))
    }
}

fn open_pipe_device(device: Option<&Path>, service: &[u8]) -> GfxstreamResult<(PathBuf, File)> {
    let candidates: Vec<PathBuf> = match device {
        Some(path) => vec![path.to_path_buf()],
        None => QEMU_PIPE_DEVICES.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(mut file) => {
                file.write_all(service)?;
                debug!("opened {:?} for {:?}", path, String::from_utf8_lossy(service));
                return Ok((path, file));
            }
            Err(e) => warn!("failed to open pipe device {:?}: {}", path, e),
        }
    }

    Err(GfxstreamError::ConnectionUnavailable)
}

/// Opens the transport described by `kind`.
pub fn connect(kind: &TransportKind) -> GfxstreamResult<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match kind {
        TransportKind::QemuPipe { device } => Box::new(QemuPipeTransport::open(device.as_deref())?),
        TransportKind::Unix { path } => Box::new(IoTransport::new(UnixStream::connect(path)?)),
        TransportKind::Tcp { address } => {
            let stream = TcpStream::connect(address.as_str())?;
            stream.set_nodelay(true)?;
            Box::new(IoTransport::new(stream))
        }
        #[cfg(any(test, feature = "stub"))]
        TransportKind::Stub => Box::new(StubRenderer::shared().transport()),
    };

    Ok(transport)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct Loopback(Cursor<Vec<u8>>);

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.get_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn io_transport_reads_back_writes() {
        let mut transport = IoTransport::new(Loopback(Cursor::new(Vec::new())));
        transport.write_all(&[1, 2, 3, 4]).unwrap();
        let mut data = [0u8; 4];
        transport.read_exact(&mut data).unwrap();
        assert_eq!(data, [1, 2, 3, 4]);

        // Nothing left: a short read is an error, not a partial success.
        assert!(transport.read_exact(&mut data).is_err());
        assert!(transport.open_refcount_channel().unwrap().is_none());
    }

    #[test]
    fn missing_pipe_device_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let kind = TransportKind::QemuPipe {
            device: Some(dir.path().join("no_such_pipe")),
        };
        assert!(matches!(
            connect(&kind),
            Err(GfxstreamError::ConnectionUnavailable)
        ));
    }

    #[test]
    fn transport_kind_from_json() {
        let kind: TransportKind =
            serde_json::from_str(r#"{"type": "unix", "path": "/tmp/gfxstream-0"}"#).unwrap();
        assert_eq!(
            kind,
            TransportKind::Unix {
                path: PathBuf::from("/tmp/gfxstream-0")
            }
        );
        let kind: TransportKind = serde_json::from_str(r#"{"type": "qemu-pipe"}"#).unwrap();
        assert_eq!(kind, TransportKind::default());
    }
}
