//! Payload reading and message reassembly
//!
//! Once a header is decoded, its payload is read from the channel, unmasked
//! as it arrives and appended to the message being assembled. A data frame
//! without FIN starts a fragmented message that continuation frames extend
//! until one carries FIN. Control frames may arrive between fragments and
//! are handed out on their own. The running total across all fragments is
//! held against the configured payload ceiling before each payload is read.

use std::time::Duration;

use log::Level;

use crate::buffer::PayloadBuffer;
use crate::channel::ByteChannel;
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameHeader, OpCode};
use crate::logging::Logger;
use crate::mask::apply_mask_offset;

/// WebSocket endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection (client)
    Initiator,
    /// Accepted the connection (server)
    Responder,
}

impl Role {
    /// The other side of the connection
    pub fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Reassembles one logical message from wire frames
///
/// A fragmented message survives control frames arriving between its
/// fragments, so the assembler outlives a single read.
#[derive(Debug)]
pub struct MessageAssembler {
    /// Message in progress, created by its first frame
    message: Option<Frame>,
    /// Payload bytes announced so far across all fragments
    total_len: u64,
    /// Ceiling for `total_len`
    max_payload_size: usize,
}

impl MessageAssembler {
    /// Create an empty assembler
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            message: None,
            total_len: 0,
            max_payload_size,
        }
    }

    /// Whether a fragmented message has started and awaits continuation frames
    #[inline]
    pub fn is_in_progress(&self) -> bool {
        self.message.is_some()
    }

    /// Payload bytes accepted so far for the message in progress
    #[inline]
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Read the payload belonging to `header` and add it to the message
    ///
    /// Returns the complete message when `header` carries FIN. Each payload
    /// read is preceded by a readiness wait bounded by `progress_timeout`.
    pub fn accept<C: ByteChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        header: FrameHeader,
        progress_timeout: Duration,
        logger: &Logger,
    ) -> Result<Option<Frame>> {
        match (header.opcode, self.message.is_some()) {
            (OpCode::Continuation, false) => {
                return Err(Error::Protocol("unexpected continuation frame"));
            }
            (opcode, true) if opcode.is_control() => {
                return self.accept_interleaved(channel, header, progress_timeout, logger);
            }
            (opcode, true) if opcode != OpCode::Continuation => {
                return Err(Error::Protocol("expected continuation frame"));
            }
            _ => {}
        }

        let total_len = self
            .total_len
            .checked_add(header.payload_len)
            .filter(|total| *total <= self.max_payload_size as u64)
            .ok_or(Error::MessageTooLarge)
            .inspect_err(|_| {
                ws_log!(
                    logger,
                    Level::Error,
                    "Payload length ({} + {}) exceeds max allowed ({})",
                    self.total_len,
                    header.payload_len,
                    self.max_payload_size
                );
            })?;
        let len = usize::try_from(header.payload_len).map_err(|_| Error::MessageTooLarge)?;
        self.total_len = total_len;

        let message = self
            .message
            .get_or_insert_with(|| Frame::new(header, PayloadBuffer::with_capacity(len)));

        read_payload(
            channel,
            &mut message.payload,
            len,
            header.mask,
            progress_timeout,
            logger,
        )?;

        ws_log!(
            logger,
            Level::Debug,
            "WebSocket {} frame received (length {}, fin {})",
            header.opcode,
            header.payload_len,
            header.fin
        );

        if !header.fin {
            return Ok(None);
        }

        let total_len = std::mem::take(&mut self.total_len);
        Ok(self.message.take().map(|mut message| {
            message.header.fin = true;
            message.header.payload_len = total_len;
            message
        }))
    }

    /// Read a control frame that arrived between two fragments
    ///
    /// The frame is returned on its own; the message in progress is left
    /// untouched and resumes with the next continuation frame.
    fn accept_interleaved<C: ByteChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        header: FrameHeader,
        progress_timeout: Duration,
        logger: &Logger,
    ) -> Result<Option<Frame>> {
        // Control payloads are at most 125 bytes, checked by the parser.
        let len = header.payload_len as usize;
        let mut payload = PayloadBuffer::with_capacity(len);
        read_payload(channel, &mut payload, len, header.mask, progress_timeout, logger)?;

        ws_log!(
            logger,
            Level::Debug,
            "WebSocket {} frame received between fragments (length {})",
            header.opcode,
            header.payload_len
        );
        Ok(Some(Frame::new(header, payload)))
    }

    /// Drop any message in progress
    pub fn reset(&mut self) {
        self.message = None;
        self.total_len = 0;
    }
}

/// Append `len` payload bytes read from `channel` to `buf`, unmasking them
///
/// Short reads are retried until the payload is complete. A stalled or
/// failing channel is a protocol violation: the peer started a frame it did
/// not finish.
pub fn read_payload<C: ByteChannel + ?Sized>(
    channel: &mut C,
    buf: &mut PayloadBuffer,
    len: usize,
    mask: Option<[u8; 4]>,
    progress_timeout: Duration,
    logger: &Logger,
) -> Result<()> {
    let tail = buf.grow(len);
    let mut filled = 0;

    while filled < len {
        match channel.wait_readable(Some(progress_timeout)) {
            Ok(true) => {}
            Ok(false) => {
                ws_log!(
                    logger,
                    Level::Error,
                    "Partial WebSocket frame received ({} of {} payload bytes)",
                    filled,
                    len
                );
                return Err(Error::Protocol("timed out in the middle of a frame payload"));
            }
            Err(e) => {
                ws_log!(logger, Level::Debug, "WebSocket channel poll failed: {}", e);
                return Err(Error::Protocol("connection lost in the middle of a frame payload"));
            }
        }

        let n = match channel.read(&mut tail[filled..]) {
            Ok(0) => {
                ws_log!(
                    logger,
                    Level::Debug,
                    "WebSocket channel closed after {} of {} payload bytes",
                    filled,
                    len
                );
                return Err(Error::Protocol("connection lost in the middle of a frame payload"));
            }
            Ok(n) => n,
            Err(e) => {
                ws_log!(logger, Level::Debug, "WebSocket channel read failed: {}", e);
                return Err(Error::Protocol("connection lost in the middle of a frame payload"));
            }
        };

        if let Some(mask) = mask {
            apply_mask_offset(&mut tail[filled..filled + n], mask, filled);
        }
        filled += n;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_FRAME_HEADER_SIZE;
    use crate::channel::MemoryChannel;
    use crate::mask::apply_mask;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
    const PROGRESS: Duration = Duration::from_millis(10);

    fn header(fin: bool, opcode: OpCode, len: usize) -> FrameHeader {
        FrameHeader {
            fin,
            opcode,
            masked: true,
            payload_len: len as u64,
            mask: Some(MASK),
        }
    }

    fn masked(payload: &[u8]) -> Vec<u8> {
        let mut data = payload.to_vec();
        apply_mask(&mut data, MASK);
        data
    }

    #[test]
    fn test_single_frame_message() {
        let mut channel = MemoryChannel::with_incoming(&masked(b"Hello"));
        let mut assembler = MessageAssembler::new(1024);

        let frame = assembler
            .accept(&mut channel, header(true, OpCode::Text, 5), PROGRESS, &Logger::default())
            .unwrap()
            .unwrap();

        assert_eq!(frame.opcode(), OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
        assert_eq!(frame.payload.as_bytes_with_nul(), b"Hello\0");
        assert!(!assembler.is_in_progress());
    }

    #[test]
    fn test_unmask_across_short_reads() {
        let original: Vec<u8> = (0..=255).collect();
        let mut channel = MemoryChannel::with_incoming(&masked(&original)).max_chunk(3);
        let mut buf = PayloadBuffer::new();

        read_payload(
            &mut channel,
            &mut buf,
            original.len(),
            Some(MASK),
            PROGRESS,
            &Logger::default(),
        )
        .unwrap();

        assert_eq!(buf.as_bytes(), &original[..]);
    }

    #[test]
    fn test_fragments_concatenate() {
        let logger = Logger::default();
        let mut channel = MemoryChannel::new();
        let mut assembler = MessageAssembler::new(1024);

        channel.push_incoming(&masked(b"Hel"));
        let first = assembler
            .accept(&mut channel, header(false, OpCode::Text, 3), PROGRESS, &logger)
            .unwrap();
        assert!(first.is_none());
        assert!(assembler.is_in_progress());

        channel.push_incoming(&masked(b"lo, "));
        let second = assembler
            .accept(&mut channel, header(false, OpCode::Continuation, 4), PROGRESS, &logger)
            .unwrap();
        assert!(second.is_none());

        channel.push_incoming(&masked(b"world"));
        let frame = assembler
            .accept(&mut channel, header(true, OpCode::Continuation, 5), PROGRESS, &logger)
            .unwrap()
            .unwrap();

        assert_eq!(frame.opcode(), OpCode::Text);
        assert!(frame.is_final());
        assert_eq!(frame.payload(), b"Hello, world");
        assert_eq!(frame.header.payload_len, 12);
        assert_eq!(assembler.total_len(), 0);
    }

    #[test]
    fn test_ceiling_counts_all_fragments() {
        let logger = Logger::default();
        let mut channel = MemoryChannel::new();
        let mut assembler = MessageAssembler::new(8);

        channel.push_incoming(&masked(b"abcd"));
        assembler
            .accept(&mut channel, header(false, OpCode::Binary, 4), PROGRESS, &logger)
            .unwrap();
        channel.push_incoming(&masked(b"efgh"));
        assembler
            .accept(&mut channel, header(false, OpCode::Continuation, 4), PROGRESS, &logger)
            .unwrap();

        channel.push_incoming(&masked(b"i"));
        let err = assembler
            .accept(&mut channel, header(true, OpCode::Continuation, 1), PROGRESS, &logger)
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge));
        // Rejected before its payload was read
        assert_eq!(channel.incoming_len(), 1);
    }

    #[test]
    fn test_sequence_violations() {
        let logger = Logger::default();
        let mut channel = MemoryChannel::new();

        let mut assembler = MessageAssembler::new(1024);
        let err = assembler
            .accept(&mut channel, header(true, OpCode::Continuation, 0), PROGRESS, &logger)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol("unexpected continuation frame")));

        let mut assembler = MessageAssembler::new(1024);
        channel.push_incoming(&masked(b"ab"));
        assembler
            .accept(&mut channel, header(false, OpCode::Binary, 2), PROGRESS, &logger)
            .unwrap();
        let err = assembler
            .accept(&mut channel, header(true, OpCode::Binary, 0), PROGRESS, &logger)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol("expected continuation frame")));
    }

    #[test]
    fn test_control_frame_between_fragments() {
        let logger = Logger::default();
        let mut channel = MemoryChannel::new();
        let mut assembler = MessageAssembler::new(1024);

        channel.push_incoming(&masked(b"Hel"));
        assembler
            .accept(&mut channel, header(false, OpCode::Text, 3), PROGRESS, &logger)
            .unwrap();

        channel.push_incoming(&masked(b"hb"));
        let ping = assembler
            .accept(&mut channel, header(true, OpCode::Ping, 2), PROGRESS, &logger)
            .unwrap()
            .unwrap();
        assert_eq!(ping.opcode(), OpCode::Ping);
        assert_eq!(ping.payload(), b"hb");
        assert!(assembler.is_in_progress());
        assert_eq!(assembler.total_len(), 3);

        channel.push_incoming(&masked(b"lo"));
        let frame = assembler
            .accept(&mut channel, header(true, OpCode::Continuation, 2), PROGRESS, &logger)
            .unwrap()
            .unwrap();
        assert_eq!(frame.as_text().unwrap(), "Hello");
        assert_eq!(frame.header.payload_len, 5);
        assert_eq!(assembler.total_len(), 0);
    }

    #[test]
    fn test_truncated_payload_is_protocol_error() {
        let mut channel = MemoryChannel::with_incoming(&masked(b"abc"));
        channel.close_incoming();
        let mut assembler = MessageAssembler::new(1024);

        let err = assembler
            .accept(&mut channel, header(true, OpCode::Binary, 10), PROGRESS, &Logger::default())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_stalled_payload_times_out() {
        let mut channel = MemoryChannel::with_incoming(&masked(b"abc"));
        let mut assembler = MessageAssembler::new(1024);

        let err = assembler
            .accept(&mut channel, header(true, OpCode::Binary, 10), PROGRESS, &Logger::default())
            .unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn test_empty_control_frame() {
        let mut channel = MemoryChannel::new();
        let mut assembler = MessageAssembler::new(1024);

        let frame = assembler
            .accept(&mut channel, header(true, OpCode::Ping, 0), PROGRESS, &Logger::default())
            .unwrap()
            .unwrap();
        assert_eq!(frame.opcode(), OpCode::Ping);
        assert_eq!(frame.payload_len(), 0);
        assert!(MAX_FRAME_HEADER_SIZE >= frame.header.header_size());
    }

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Initiator.peer(), Role::Responder);
        assert_eq!(Role::Responder.peer(), Role::Initiator);
    }
}
