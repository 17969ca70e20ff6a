// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! sync_device: Kernel synchronization devices and the signal descriptors they hand out.

use std::io::Error as IoError;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::time::Duration;

use log::warn;
use nix::unistd::pipe;
use nix::unistd::write;

use crate::guest_utils::GfxstreamResult;
use crate::parameters::SyncDeviceKind;
use crate::render_control::HostSync;

/// Converts a wait timeout to `poll` milliseconds, rounding up so short waits still block.
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        Some(timeout) => timeout
            .as_nanos()
            .div_ceil(1_000_000)
            .try_into()
            .unwrap_or(libc::c_int::MAX),
        None => -1,
    }
}

/// A guest-visible signal: a descriptor that becomes readable once host work completes.
#[derive(Debug)]
pub struct SyncFd {
    fd: OwnedFd,
}

impl SyncFd {
    pub fn new(fd: OwnedFd) -> SyncFd {
        SyncFd { fd }
    }

    /// Waits until the descriptor is signaled. Returns false if `timeout` expired first; `None`
    /// waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> GfxstreamResult<bool> {
        let timeout_ms = poll_timeout_ms(timeout);

        let mut pollfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY:
            // Safe because `pollfd` is a valid, initialized pollfd and the count is 1.
            let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if ret >= 0 {
                return Ok(ret > 0 && (pollfd.revents & (libc::POLLIN | libc::POLLHUP)) != 0);
            }

            let err = IoError::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }

    /// Returns a descriptor for the same signal whose lifetime is independent of this one.
    pub fn try_clone(&self) -> GfxstreamResult<SyncFd> {
        Ok(SyncFd {
            fd: self.fd.try_clone()?,
        })
    }
}

impl AsFd for SyncFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for SyncFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<SyncFd> for OwnedFd {
    fn from(sync_fd: SyncFd) -> OwnedFd {
        sync_fd.fd
    }
}

/// Turns a host fence into a guest signal descriptor. Closing the device is dropping it.
pub trait SyncDevice: Send {
    fn queue_work(&self, host_sync: HostSync) -> GfxstreamResult<SyncFd>;
}

/// Hands out descriptors that are readable from the start: the host has already finished by the
/// time anything on the guest can observe them.
pub struct PipeSyncDevice;

impl SyncDevice for PipeSyncDevice {
    fn queue_work(&self, _host_sync: HostSync) -> GfxstreamResult<SyncFd> {
        let (read_end, write_end) = pipe()?;
        write(write_end.as_fd(), &[1u8])?;
        Ok(SyncFd::new(read_end))
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "android", target_os = "linux"))] {
        use std::fs::File;
        use std::fs::OpenOptions;
        use std::os::fd::FromRawFd;
        use std::path::Path;

        pub const GOLDFISH_SYNC_DEVICE: &str = "/dev/goldfish_sync";

        const GOLDFISH_SYNC_IOC_MAGIC: u8 = b'@';

        #[repr(C)]
        #[derive(Default)]
        struct GoldfishSyncIoctlInfo {
            host_glsync_handle_in: u64,
            host_syncthread_handle_in: u64,
            fence_fd_out: i32,
        }

        nix::ioctl_readwrite!(
            goldfish_sync_queue_work,
            GOLDFISH_SYNC_IOC_MAGIC,
            0,
            GoldfishSyncIoctlInfo
        );

        /// The goldfish sync driver: each queued work item yields a sync file that the host signals
        /// through the virtual device.
        pub struct GoldfishSyncDevice {
            file: File,
        }

        impl GoldfishSyncDevice {
            pub fn open(path: &Path) -> GfxstreamResult<GoldfishSyncDevice> {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                Ok(GoldfishSyncDevice { file })
            }
        }

        impl SyncDevice for GoldfishSyncDevice {
            fn queue_work(&self, host_sync: HostSync) -> GfxstreamResult<SyncFd> {
                let mut info = GoldfishSyncIoctlInfo {
                    host_glsync_handle_in: host_sync.sync_handle,
                    host_syncthread_handle_in: host_sync.thread_handle,
                    fence_fd_out: -1,
                };

                // SAFETY:
                // Safe because the device descriptor is open and `info` outlives the call.
                unsafe { goldfish_sync_queue_work(self.file.as_raw_fd(), &mut info) }?;

                // SAFETY:
                // Safe because the driver returned a fresh descriptor that nothing else owns.
                let fd = unsafe { OwnedFd::from_raw_fd(info.fence_fd_out) };
                Ok(SyncFd::new(fd))
            }
        }

        fn open_goldfish(path: Option<&Path>) -> GfxstreamResult<Box<dyn SyncDevice>> {
            let path = path.unwrap_or_else(|| Path::new(GOLDFISH_SYNC_DEVICE));
            Ok(Box::new(GoldfishSyncDevice::open(path)?))
        }
    } else {
        fn open_goldfish(_path: Option<&std::path::Path>) -> GfxstreamResult<Box<dyn SyncDevice>> {
            Err(crate::guest_utils::GfxstreamError::Unsupported)
        }
    }
}

/// Opens the sync device named by `kind`. A device that cannot be opened is reported as absent,
/// which makes native fences unavailable rather than failing the caller.
pub fn open_sync_device(kind: &SyncDeviceKind) -> Option<Box<dyn SyncDevice>> {
    match kind {
        SyncDeviceKind::Goldfish { path } => match open_goldfish(path.as_deref()) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("sync device unavailable: {}", e);
                None
            }
        },
        SyncDeviceKind::Pipe => Some(Box::new(PipeSyncDevice)),
        SyncDeviceKind::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_timeouts_round_up() {
        assert_eq!(poll_timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout_ms(Some(Duration::from_nanos(500_000))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(1_001))), 2);
        assert_eq!(poll_timeout_ms(Some(Duration::MAX)), libc::c_int::MAX);
        assert_eq!(poll_timeout_ms(None), -1);
    }

    #[test]
    fn pipe_device_fd_is_signaled() {
        let sync_fd = PipeSyncDevice.queue_work(HostSync::default()).unwrap();
        assert!(sync_fd.wait(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn pending_fd_times_out() {
        let (read_end, _write_end) = pipe().unwrap();
        let sync_fd = SyncFd::new(read_end);
        assert!(!sync_fd.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn clone_outlives_original() {
        let sync_fd = PipeSyncDevice.queue_work(HostSync::default()).unwrap();
        let clone = sync_fd.try_clone().unwrap();
        assert_ne!(clone.as_raw_fd(), sync_fd.as_raw_fd());
        drop(sync_fd);
        assert!(clone.wait(None).unwrap());
    }

    #[test]
    fn missing_goldfish_device_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let kind = SyncDeviceKind::Goldfish {
            path: Some(dir.path().join("goldfish_sync")),
        };
        assert!(open_sync_device(&kind).is_none());
        assert!(open_sync_device(&SyncDeviceKind::None).is_none());
    }
}
