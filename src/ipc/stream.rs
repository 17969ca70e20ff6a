// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem::size_of;

use log::error;
use zerocopy::IntoBytes;

use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::checksum::ChecksumCalculator;
use crate::ipc::render_control_protocol::render_control_opcode_str;
use crate::ipc::render_control_protocol::RenderControlHeader;
use crate::ipc::transport::Transport;

/// Commands are batched locally until this many bytes are pending or a reply is needed.
const MAX_PENDING_SIZE: usize = 16384;

/// One encoded command packet under construction.
pub struct Command {
    opcode: u32,
    args: Vec<u8>,
    out_len: usize,
}

impl Command {
    pub fn new(opcode: u32) -> Command {
        Command {
            opcode,
            args: Vec::new(),
            out_len: 0,
        }
    }

    pub fn u32(mut self, value: u32) -> Command {
        self.args.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(mut self, value: i32) -> Command {
        self.args.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Command {
        self.args.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends an input buffer: its length followed by its bytes.
    pub fn buffer(mut self, data: &[u8]) -> GfxstreamResult<Command> {
        let len: u32 = data.len().try_into()?;
        self.args.extend_from_slice(&len.to_le_bytes());
        self.args.extend_from_slice(data);
        Ok(self)
    }

    /// Declares an output buffer of `len` bytes. Only the length travels to the host; the bytes
    /// come back at the front of the reply.
    pub fn out_buffer(mut self, len: usize) -> GfxstreamResult<Command> {
        let wire_len: u32 = len.try_into()?;
        self.args.extend_from_slice(&wire_len.to_le_bytes());
        self.out_len += len;
        Ok(self)
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    fn encode(&self, checksum: &mut ChecksumCalculator, dst: &mut Vec<u8>) -> GfxstreamResult<()> {
        let packet_len = size_of::<RenderControlHeader>() + self.args.len();
        let header = RenderControlHeader {
            opcode: self.opcode,
            size: (packet_len + checksum.trailer_size()).try_into()?,
        };

        let start = dst.len();
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&self.args);
        // The trailer describes this packet only, not whatever was batched before it.
        let mut trailer = Vec::new();
        checksum.add_trailer(&mut trailer, dst.len() - start)?;
        dst.extend_from_slice(&trailer);
        Ok(())
    }
}

/// Cursor over the bytes of one reply.
pub struct Reply {
    data: Vec<u8>,
    offset: usize,
}

impl Reply {
    pub fn new(data: Vec<u8>) -> Reply {
        Reply { data, offset: 0 }
    }

    pub fn bytes(&mut self, len: usize) -> GfxstreamResult<&[u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(GfxstreamError::ProtocolViolation("reply shorter than expected"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn u32(&mut self) -> GfxstreamResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn i32(&mut self) -> GfxstreamResult<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    pub fn u64(&mut self) -> GfxstreamResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

/// Packet framing over a `Transport`: batching, checksums and failure latching.
///
/// Once any transport or protocol error has been seen the stream is broken and every later call
/// fails with `ConnectionUnavailable`; a partially written packet can't be recovered from.
pub struct RenderStream {
    transport: Box<dyn Transport>,
    checksum: ChecksumCalculator,
    pending: Vec<u8>,
    broken: bool,
}

impl RenderStream {
    pub fn new(transport: Box<dyn Transport>) -> RenderStream {
        RenderStream {
            transport,
            checksum: ChecksumCalculator::new(),
            pending: Vec::with_capacity(MAX_PENDING_SIZE),
            broken: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn checksum_version(&self) -> u32 {
        self.checksum.version()
    }

    /// Switches checksum version. Pending packets are flushed first since they were framed with
    /// the previous version.
    pub fn set_checksum_version(&mut self, version: u32) -> GfxstreamResult<bool> {
        self.flush()?;
        Ok(self.checksum.set_version(version))
    }

    /// Writes raw bytes that are not a render-control packet (the connection handshake).
    pub fn write_raw(&mut self, data: &[u8]) -> GfxstreamResult<()> {
        self.check()?;
        self.pending.extend_from_slice(data);
        Ok(())
    }

    /// Queues a command that has no reply.
    pub fn send(&mut self, command: Command) -> GfxstreamResult<()> {
        self.check()?;
        let result = command.encode(&mut self.checksum, &mut self.pending);
        self.latch(result)?;
        if self.pending.len() >= MAX_PENDING_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Sends `command` and blocks for its reply: the declared output buffers followed by a return
    /// value of `ret_size` bytes.
    pub fn transact(&mut self, command: Command, ret_size: usize) -> GfxstreamResult<Reply> {
        let opcode = command.opcode();
        let reply_len = command.out_len + ret_size;
        self.send(command)?;
        self.flush()?;

        let mut data = vec![0u8; reply_len + self.checksum.trailer_size()];
        let result = self.transport.read_exact(&mut data);
        self.latch(result)?;

        let result = self
            .checksum
            .validate_trailer(reply_len, &data[reply_len..]);
        if let Err(e) = self.latch(result) {
            error!(
                "bad reply to {}: {}",
                render_control_opcode_str(opcode),
                e
            );
            return Err(e);
        }

        data.truncate(reply_len);
        Ok(Reply::new(data))
    }

    pub fn flush(&mut self) -> GfxstreamResult<()> {
        self.check()?;
        if self.pending.is_empty() {
            return Ok(());
        }

        let result = self
            .transport
            .write_all(&self.pending)
            .and_then(|_| self.transport.flush());
        self.pending.clear();
        self.latch(result)
    }

    pub fn open_refcount_channel(&self) -> GfxstreamResult<Option<Box<dyn Transport>>> {
        self.check()?;
        self.transport.open_refcount_channel()
    }

    fn check(&self) -> GfxstreamResult<()> {
        match self.broken {
            true => Err(GfxstreamError::ConnectionUnavailable),
            false => Ok(()),
        }
    }

    fn latch<T>(&mut self, result: GfxstreamResult<T>) -> GfxstreamResult<T> {
        if let Err(ref e) = result {
            if e.is_connection_failure() && !self.broken {
                error!("host connection lost: {}", e);
                self.broken = true;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        written: Arc<Mutex<Vec<u8>>>,
        reply: Arc<Mutex<Vec<u8>>>,
        fail_writes: bool,
    }

    impl Transport for Recorder {
        fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()> {
            if self.fail_writes {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
            }
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> GfxstreamResult<()> {
            Ok(())
        }

        fn read_exact(&mut self, data: &mut [u8]) -> GfxstreamResult<()> {
            let mut reply = self.reply.lock().unwrap();
            if reply.len() < data.len() {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            data.copy_from_slice(&reply[..data.len()]);
            reply.drain(..data.len());
            Ok(())
        }
    }

    #[test]
    fn packets_are_batched_until_reply() {
        let recorder = Recorder::default();
        let mut stream = RenderStream::new(Box::new(recorder.clone()));

        stream.send(Command::new(10014).u32(7)).unwrap();
        assert!(recorder.written.lock().unwrap().is_empty());

        recorder
            .reply
            .lock()
            .unwrap()
            .extend_from_slice(&5u32.to_le_bytes());
        let mut reply = stream.transact(Command::new(10000), 4).unwrap();
        assert_eq!(reply.u32().unwrap(), 5);

        let written = recorder.written.lock().unwrap();
        // Two packets: 12 bytes for the first (header + one u32), 8 for the second.
        assert_eq!(written.len(), 20);
        assert_eq!(&written[0..4], &10014u32.to_le_bytes());
        assert_eq!(&written[4..8], &12u32.to_le_bytes());
        assert_eq!(&written[12..16], &10000u32.to_le_bytes());
    }

    #[test]
    fn output_buffers_precede_return_value() {
        let recorder = Recorder::default();
        let mut stream = RenderStream::new(Box::new(recorder.clone()));
        {
            let mut reply = recorder.reply.lock().unwrap();
            reply.extend_from_slice(&3u32.to_le_bytes());
            reply.extend_from_slice(&1u32.to_le_bytes());
        }

        let command = Command::new(10001).out_buffer(4).unwrap();
        let mut reply = stream.transact(command, 4).unwrap();
        assert_eq!(reply.u32().unwrap(), 3);
        assert_eq!(reply.u32().unwrap(), 1);
        assert!(reply.u32().is_err());
    }

    #[test]
    fn transport_error_breaks_stream() {
        let recorder = Recorder {
            fail_writes: true,
            ..Default::default()
        };
        let mut stream = RenderStream::new(Box::new(recorder));

        stream.send(Command::new(10014).u32(1)).unwrap();
        assert!(matches!(stream.flush(), Err(GfxstreamError::IoError(_))));
        assert!(stream.is_broken());
        assert!(matches!(
            stream.send(Command::new(10014).u32(1)),
            Err(GfxstreamError::ConnectionUnavailable)
        ));
    }

    #[test]
    fn checksum_trailer_is_appended() {
        let recorder = Recorder::default();
        let mut stream = RenderStream::new(Box::new(recorder.clone()));
        assert!(stream.set_checksum_version(1).unwrap());

        stream.send(Command::new(10014).u32(9)).unwrap();
        stream.flush().unwrap();

        let written = recorder.written.lock().unwrap();
        assert_eq!(written.len(), 20);
        assert_eq!(&written[4..8], &20u32.to_le_bytes());
        // Trailer: length without trailer, then sequence number 0.
        assert_eq!(&written[12..16], &12u32.to_le_bytes());
        assert_eq!(&written[16..20], &0u32.to_le_bytes());
    }
}
