//! WebSocket frame types and serialization
//!
//! This module implements the RFC 6455 frame layout:
//! - Typed opcodes validated once at decode time
//! - Decoded frames owning their reassembled payload
//! - Minimal header encoding into a fixed stack buffer
//! - Header and payload written separately (no payload copy when unmasked)

use std::fmt;
use std::io::{self, Write};

use bytes::BufMut;

use crate::buffer::PayloadBuffer;
use crate::error::{CloseReason, Error, Result};
use crate::mask::apply_mask_offset;
use crate::{MAX_FRAME_HEADER_SIZE, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// Scratch size for masking outgoing payloads
const MASK_CHUNK_SIZE: usize = 4096;

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from the low nibble of a header byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }

    /// Upper-case name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Continuation => "CONTINUE",
            OpCode::Text => "TEXT",
            OpCode::Binary => "BINARY",
            OpCode::Close => "CLOSE",
            OpCode::Ping => "PING",
            OpCode::Pong => "PONG",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        OpCode::from_u8(byte).ok_or(Error::InvalidOpCode(byte))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded WebSocket frame header
///
/// Reserved bits are rejected during decoding, so a header value never
/// carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag
    pub masked: bool,
    /// Declared payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Header for a final, unmasked frame
    pub fn new(opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            payload_len,
            mask: None,
        }
    }

    /// Get the total header size in bytes
    #[inline]
    pub fn header_size(&self) -> usize {
        let mut size = 2;

        if self.payload_len > MEDIUM_MESSAGE_THRESHOLD as u64 {
            size += 8;
        } else if self.payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            size += 2;
        }

        if self.mask.is_some() {
            size += 4;
        }

        size
    }

    /// Encode the header into `buf`, returning the number of bytes used
    #[inline]
    pub fn encode(&self, buf: &mut [u8; MAX_FRAME_HEADER_SIZE]) -> usize {
        let size = self.header_size();
        let mut out = &mut buf[..];

        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        out.put_u8(b0);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            out.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            out.put_u8(mask_bit | 126);
            out.put_u16(self.payload_len as u16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(self.payload_len);
        }

        if let Some(mask) = self.mask {
            out.put_slice(&mask);
        }

        size
    }
}

/// A decoded frame, or a complete message reassembled from fragments
#[derive(Debug)]
pub struct Frame {
    /// Frame header; for reassembled messages the opcode of the first
    /// fragment with `fin` set and the total payload length
    pub header: FrameHeader,
    /// Payload (already unmasked)
    pub payload: PayloadBuffer,
}

impl Frame {
    /// Create a frame from a header and payload
    pub fn new(header: FrameHeader, payload: PayloadBuffer) -> Self {
        Self { header, payload }
    }

    /// Frame opcode
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        self.header.opcode.is_control()
    }

    /// Check if this is the final fragment
    #[inline]
    pub fn is_final(&self) -> bool {
        self.header.fin
    }

    /// Payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// Payload length
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Take the payload, leaving an empty one behind
    pub fn take_payload(&mut self) -> PayloadBuffer {
        std::mem::take(&mut self.payload)
    }

    /// Consume the frame and return its payload
    pub fn into_payload(self) -> PayloadBuffer {
        self.payload
    }

    /// Get the payload as a string (for text frames)
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(self.payload()).map_err(|_| Error::InvalidUtf8)
    }

    /// Close status code of a close frame
    ///
    /// Returns `None` for other opcodes and [`CloseReason::NO_STATUS`] when
    /// the payload is shorter than two bytes. Bytes past the code are ignored.
    pub fn close_code(&self) -> Option<u16> {
        if self.header.opcode != OpCode::Close {
            return None;
        }
        match self.payload() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => Some(CloseReason::NO_STATUS),
        }
    }

    /// Raw reason bytes following the close code
    pub fn close_reason(&self) -> Option<&[u8]> {
        if self.header.opcode != OpCode::Close || self.payload_len() < 2 {
            return None;
        }
        Some(&self.payload()[2..])
    }

    /// Parse close frame payload
    pub fn parse_close(&self) -> Option<CloseReason> {
        let code = self.close_code()?;
        let reason = self
            .close_reason()
            .map(|text| String::from_utf8_lossy(text).into_owned())
            .unwrap_or_default();
        Some(CloseReason::new(code, reason))
    }
}

/// Serialize one final frame to `writer`
///
/// The header is written from a stack buffer and the payload straight from
/// the caller's slice. With a mask the payload is masked through a fixed
/// scratch buffer instead. Partial writes are retried until everything is
/// written; a write that makes no progress fails with
/// [`io::ErrorKind::WriteZero`].
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    opcode: OpCode,
    payload: &[u8],
    mask: Option<[u8; 4]>,
) -> io::Result<usize> {
    let header = FrameHeader {
        fin: true,
        opcode,
        masked: mask.is_some(),
        payload_len: payload.len() as u64,
        mask,
    };

    let mut header_buf = [0u8; MAX_FRAME_HEADER_SIZE];
    let header_len = header.encode(&mut header_buf);
    writer.write_all(&header_buf[..header_len])?;

    match mask {
        None => writer.write_all(payload)?,
        Some(mask) => {
            let mut scratch = [0u8; MASK_CHUNK_SIZE];
            for (i, chunk) in payload.chunks(MASK_CHUNK_SIZE).enumerate() {
                let out = &mut scratch[..chunk.len()];
                out.copy_from_slice(chunk);
                apply_mask_offset(out, mask, i * MASK_CHUNK_SIZE);
                writer.write_all(out)?;
            }
        }
    }

    writer.flush()?;
    Ok(header_len + payload.len())
}
