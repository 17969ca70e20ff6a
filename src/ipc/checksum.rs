// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use zerocopy::FromBytes;
use zerocopy::IntoBytes;

use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::render_control_protocol::ChecksumTrailerV1;

/// Highest checksum version the guest knows how to produce.
pub const MAX_CHECKSUM_VERSION: u32 = 1;

/// Appends and validates the per-packet checksum trailer.
///
/// Version 0 carries no trailer. Version 1 appends the packet length (excluding the trailer) and
/// a sequence number, separately counted for each direction.
#[derive(Debug, Default)]
pub struct ChecksumCalculator {
    version: u32,
    write_sequence: u32,
    read_sequence: u32,
}

impl ChecksumCalculator {
    pub fn new() -> ChecksumCalculator {
        Default::default()
    }

    /// Switches to `version`. Sequence numbers restart so both ends agree.
    pub fn set_version(&mut self, version: u32) -> bool {
        if version > MAX_CHECKSUM_VERSION {
            return false;
        }

        self.version = version;
        self.write_sequence = 0;
        self.read_sequence = 0;
        true
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn trailer_size(&self) -> usize {
        match self.version {
            0 => 0,
            _ => std::mem::size_of::<ChecksumTrailerV1>(),
        }
    }

    /// Appends the trailer for a packet whose bytes (without trailer) are `packet_len` long.
    pub fn add_trailer(&mut self, packet: &mut Vec<u8>, packet_len: usize) -> GfxstreamResult<()> {
        if self.version == 0 {
            return Ok(());
        }

        let trailer = ChecksumTrailerV1 {
            length: packet_len.try_into()?,
            sequence: self.write_sequence,
        };
        self.write_sequence = self.write_sequence.wrapping_add(1);
        packet.extend_from_slice(trailer.as_bytes());
        Ok(())
    }

    /// Validates the trailer of a reply carrying `payload_len` bytes before the trailer.
    pub fn validate_trailer(&mut self, payload_len: usize, trailer: &[u8]) -> GfxstreamResult<()> {
        if self.version == 0 {
            return Ok(());
        }

        let received = ChecksumTrailerV1::read_from_bytes(trailer)
            .map_err(|_| GfxstreamError::ProtocolViolation("short checksum trailer"))?;
        let expected_len: u32 = payload_len.try_into()?;
        let expected_seq = self.read_sequence;
        self.read_sequence = self.read_sequence.wrapping_add(1);

        if received.length != expected_len || received.sequence != expected_seq {
            return Err(GfxstreamError::ChecksumMismatch {
                expected_len,
                expected_seq,
                len: received.length,
                seq: received.sequence,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_zero_adds_nothing() {
        let mut checksum = ChecksumCalculator::new();
        let mut packet = vec![1, 2, 3];
        checksum.add_trailer(&mut packet, 3).unwrap();
        assert_eq!(packet.len(), 3);
        checksum.validate_trailer(12, &[]).unwrap();
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut checksum = ChecksumCalculator::new();
        assert!(!checksum.set_version(MAX_CHECKSUM_VERSION + 1));
        assert_eq!(checksum.version(), 0);
    }

    #[test]
    fn sequence_mismatch_is_detected() {
        let mut checksum = ChecksumCalculator::new();
        assert!(checksum.set_version(1));

        let good = ChecksumTrailerV1 {
            length: 4,
            sequence: 0,
        };
        checksum.validate_trailer(4, good.as_bytes()).unwrap();

        // The second reply must carry sequence 1.
        let stale = ChecksumTrailerV1 {
            length: 4,
            sequence: 0,
        };
        match checksum.validate_trailer(4, stale.as_bytes()) {
            Err(GfxstreamError::ChecksumMismatch { expected_seq, .. }) => {
                assert_eq!(expected_seq, 1)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
