//! Incremental frame header decoder
//!
//! The header is decoded field by field. Each state asks for an exact
//! number of bytes, never more than the 8-byte scratch buffer holds, so a
//! header can arrive in arbitrarily small pieces without any allocation:
//!
//! ```text
//! Initial(1) -> Length(1) -> [ExtendedLength16(2) | ExtendedLength64(8)] -> Mask(4) -> Payload
//! ```
//!
//! States only ever move forward. `Payload` means the header is complete;
//! reading the payload itself is the job of [`crate::protocol`].

use std::fmt;
use std::io::{self, Read};

use crate::error::{Error, Result};
use crate::frame::{FrameHeader, OpCode};

/// Largest field decoded in one state (the 64-bit extended length)
const SCRATCH_SIZE: usize = 8;

/// Header decoding state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    /// Waiting for FIN, reserved bits and opcode
    Initial,
    /// Waiting for mask flag and 7-bit length
    Length,
    /// Waiting for extended payload length (2 bytes)
    ExtendedLength16,
    /// Waiting for extended payload length (8 bytes)
    ExtendedLength64,
    /// Waiting for mask (4 bytes)
    Mask,
    /// Header complete
    Payload,
}

impl ParseState {
    /// Bytes this state consumes
    #[inline]
    pub fn need(self) -> usize {
        match self {
            ParseState::Initial | ParseState::Length => 1,
            ParseState::ExtendedLength16 => 2,
            ParseState::ExtendedLength64 => 8,
            ParseState::Mask => 4,
            ParseState::Payload => 0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ParseState::Initial => "INITIAL",
            ParseState::Length => "LENGTH",
            ParseState::ExtendedLength16 => "XLENGTH16",
            ParseState::ExtendedLength64 => "XLENGTH64",
            ParseState::Mask => "MASK",
            ParseState::Payload => "PAYLOAD",
        }
    }
}

impl fmt::Display for ParseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame header parser state machine
///
/// One parser decodes one header. Create a fresh parser (or call
/// [`reset`](Self::reset)) for every wire frame.
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParseState,
    /// Bytes of the current field
    scratch: [u8; SCRATCH_SIZE],
    /// How much of `scratch` the current state has filled
    filled: usize,
    fin: bool,
    opcode: OpCode,
    masked: bool,
    payload_len: u64,
    mask: Option<[u8; 4]>,
    /// Reject frames without the mask bit
    require_masked: bool,
}

impl FrameParser {
    /// Create a parser positioned at the start of a frame
    pub fn new(require_masked: bool) -> Self {
        Self {
            state: ParseState::Initial,
            scratch: [0; SCRATCH_SIZE],
            filled: 0,
            fin: false,
            opcode: OpCode::Continuation,
            masked: false,
            payload_len: 0,
            mask: None,
            require_masked,
        }
    }

    /// Return to the start of a frame
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::new(self.require_masked);
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Whether any header byte has been consumed
    #[inline]
    pub fn is_started(&self) -> bool {
        self.state != ParseState::Initial || self.filled > 0
    }

    /// Whether the header is fully decoded
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Payload
    }

    /// Bytes still needed to finish the current state
    #[inline]
    pub fn remaining(&self) -> usize {
        self.state.need() - self.filled
    }

    /// Perform exactly one read of at most [`remaining`](Self::remaining) bytes
    ///
    /// Returns the header once the final field is decoded. End of stream or
    /// a read error before any byte of this header was consumed is reported
    /// as such; once the header has started, either one becomes a protocol
    /// violation.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Option<FrameHeader>> {
        if self.is_complete() {
            return Ok(Some(self.header()));
        }

        let start = self.filled;
        let end = start + self.remaining();
        debug_assert!(end <= SCRATCH_SIZE);

        let n = match reader.read(&mut self.scratch[start..end]) {
            Ok(0) => return Err(self.truncated(None)),
            Ok(n) => n,
            Err(e) => return Err(self.truncated(Some(e))),
        };
        self.advance(n)
    }

    /// Decode from an in-memory buffer
    ///
    /// Consumes bytes up to the end of the header and returns how many were
    /// used, along with the header if it completed.
    pub fn feed(&mut self, data: &[u8]) -> Result<(usize, Option<FrameHeader>)> {
        if self.is_complete() {
            return Ok((0, Some(self.header())));
        }

        let mut consumed = 0;
        while consumed < data.len() {
            let n = self.remaining().min(data.len() - consumed);
            self.scratch[self.filled..self.filled + n]
                .copy_from_slice(&data[consumed..consumed + n]);
            consumed += n;

            if let Some(header) = self.advance(n)? {
                return Ok((consumed, Some(header)));
            }
        }
        Ok((consumed, None))
    }

    fn truncated(&self, err: Option<io::Error>) -> Error {
        if self.is_started() {
            return Error::Protocol("connection lost in the middle of a frame header");
        }
        match err {
            Some(e) => Error::from(e),
            None => Error::ConnectionClosed,
        }
    }

    /// Account for `n` new bytes in `scratch` and decode a finished field
    fn advance(&mut self, n: usize) -> Result<Option<FrameHeader>> {
        self.filled += n;
        if self.filled < self.state.need() {
            return Ok(None);
        }

        match self.state {
            ParseState::Initial => {
                let b0 = self.scratch[0];

                if b0 & 0x70 != 0 {
                    return Err(Error::Protocol("RSV1, RSV2 and RSV3 must be 0"));
                }

                let opcode =
                    OpCode::from_u8(b0 & 0x0F).ok_or(Error::Protocol("invalid opcode"))?;
                let fin = b0 & 0x80 != 0;

                if opcode.is_control() && !fin {
                    return Err(Error::Protocol("control frame must not be fragmented"));
                }

                self.fin = fin;
                self.opcode = opcode;
                self.enter(ParseState::Length);
                Ok(None)
            }

            ParseState::Length => {
                let b1 = self.scratch[0];
                self.masked = b1 & 0x80 != 0;

                if self.require_masked && !self.masked {
                    return Err(Error::Protocol("frames must be masked"));
                }

                match b1 & 0x7F {
                    126 => {
                        self.enter(ParseState::ExtendedLength16);
                        Ok(None)
                    }
                    127 => {
                        self.enter(ParseState::ExtendedLength64);
                        Ok(None)
                    }
                    len => self.length_known(len as u64),
                }
            }

            ParseState::ExtendedLength16 => {
                let len = u16::from_be_bytes([self.scratch[0], self.scratch[1]]);
                self.length_known(len as u64)
            }

            ParseState::ExtendedLength64 => {
                let len = u64::from_be_bytes(self.scratch);
                if len >> 63 != 0 {
                    return Err(Error::FrameTooLarge);
                }
                self.length_known(len)
            }

            ParseState::Mask => {
                self.mask = Some([
                    self.scratch[0],
                    self.scratch[1],
                    self.scratch[2],
                    self.scratch[3],
                ]);
                self.enter(ParseState::Payload);
                Ok(Some(self.header()))
            }

            ParseState::Payload => Ok(Some(self.header())),
        }
    }

    fn length_known(&mut self, payload_len: u64) -> Result<Option<FrameHeader>> {
        if self.opcode.is_control() && payload_len > 125 {
            return Err(Error::Protocol("control frame too large"));
        }
        self.payload_len = payload_len;

        if self.masked {
            self.enter(ParseState::Mask);
            Ok(None)
        } else {
            self.enter(ParseState::Payload);
            Ok(Some(self.header()))
        }
    }

    #[inline]
    fn enter(&mut self, next: ParseState) {
        debug_assert!(next > self.state, "{} -> {}", self.state, next);
        self.state = next;
        self.filled = 0;
    }

    fn header(&self) -> FrameHeader {
        FrameHeader {
            fin: self.fin,
            opcode: self.opcode,
            masked: self.masked,
            payload_len: self.payload_len,
            mask: self.mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn masked_header(b0: u8, len: u64) -> Vec<u8> {
        let mut buf = vec![b0];
        if len <= 125 {
            buf.push(0x80 | len as u8);
        } else if len <= 0xFFFF {
            buf.push(0x80 | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(0x80 | 127);
            buf.extend_from_slice(&len.to_be_bytes());
        }
        buf.extend_from_slice(&MASK);
        buf
    }

    /// Reader that hands out one scripted chunk per call and records
    /// the buffer sizes it was asked to fill
    struct Chunked {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        requests: Vec<usize>,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.requests.push(buf.len());
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_parse_small_masked() {
        let mut parser = FrameParser::new(true);
        let bytes = masked_header(0x81, 5);

        let (consumed, header) = parser.feed(&bytes).unwrap();
        let header = header.unwrap();
        assert_eq!(consumed, 6);
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.mask, Some(MASK));
        assert!(parser.is_complete());
    }

    #[test]
    fn test_feed_stops_at_header_end() {
        let mut parser = FrameParser::new(true);
        let mut bytes = masked_header(0x82, 3);
        bytes.extend_from_slice(b"abc");

        let (consumed, header) = parser.feed(&bytes).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(header.unwrap().opcode, OpCode::Binary);
    }

    #[test]
    fn test_byte_at_a_time_visits_states_in_order() {
        for (len, expected) in [
            (
                5u64,
                vec![ParseState::Length, ParseState::Mask, ParseState::Payload],
            ),
            (
                300,
                vec![
                    ParseState::Length,
                    ParseState::ExtendedLength16,
                    ParseState::Mask,
                    ParseState::Payload,
                ],
            ),
            (
                70_000,
                vec![
                    ParseState::Length,
                    ParseState::ExtendedLength64,
                    ParseState::Mask,
                    ParseState::Payload,
                ],
            ),
        ] {
            let mut parser = FrameParser::new(true);
            let bytes = masked_header(0x02, len);
            let mut visited = Vec::new();
            let mut result = None;

            for byte in &bytes {
                let before = parser.state();
                let (consumed, header) = parser.feed(std::slice::from_ref(byte)).unwrap();
                assert_eq!(consumed, 1);
                if parser.state() != before {
                    assert!(parser.state() > before);
                    visited.push(parser.state());
                }
                result = header;
            }

            let header = result.expect("header completes on the last byte");
            assert_eq!(header.payload_len, len);
            assert!(!header.fin);
            assert_eq!(visited, expected, "len {len}");
        }
    }

    #[test]
    fn test_read_from_requests_only_remaining_bytes() {
        let bytes = masked_header(0x81, 70_000);
        let mut reader = Chunked {
            data: bytes.clone(),
            pos: 0,
            chunk: 3,
            requests: Vec::new(),
        };
        let mut parser = FrameParser::new(true);

        let header = loop {
            if let Some(header) = parser.read_from(&mut reader).unwrap() {
                break header;
            }
        };

        assert_eq!(header.payload_len, 70_000);
        assert_eq!(reader.pos, bytes.len());
        // Initial, Length, 8-byte length in chunks of 3, 4-byte mask in chunks of 3
        assert_eq!(reader.requests, vec![1, 1, 8, 5, 2, 4, 1]);
        assert!(reader.requests.iter().all(|n| *n <= SCRATCH_SIZE));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        for rsv in [0x40, 0x20, 0x10, 0x70] {
            let mut parser = FrameParser::new(true);
            let err = parser.feed(&[0x80 | rsv | 0x1, 0xFF]).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "rsv {rsv:#x}");
            assert_eq!(err.close_code(), Some(1002));
            assert_eq!(parser.state(), ParseState::Initial);
        }
    }

    #[test]
    fn test_invalid_opcode_rejected() {
        for opcode in [0x3, 0x4, 0x7, 0xB, 0xF] {
            let mut parser = FrameParser::new(true);
            let err = parser.feed(&[0x80 | opcode, 0x80]).unwrap_err();
            assert!(matches!(err, Error::Protocol("invalid opcode")));
        }
    }

    #[test]
    fn test_unmasked_frame() {
        let mut strict = FrameParser::new(true);
        let err = strict.feed(&[0x81, 0x05]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let mut lenient = FrameParser::new(false);
        let (consumed, header) = lenient.feed(&[0x81, 0x05, b'h']).unwrap();
        let header = header.unwrap();
        assert_eq!(consumed, 2);
        assert!(!header.masked);
        assert_eq!(header.mask, None);
        assert_eq!(header.payload_len, 5);
    }

    #[test]
    fn test_64bit_length_msb_rejected() {
        let mut parser = FrameParser::new(true);
        let mut bytes = vec![0x82, 0x80 | 127];
        bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());

        let err = parser.feed(&bytes).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge));
        assert_eq!(err.close_code(), Some(1009));
    }

    #[test]
    fn test_control_frame_rules() {
        // Ping without FIN
        let mut parser = FrameParser::new(true);
        assert!(parser.feed(&[0x09, 0x80]).is_err());

        // Close with 16-bit length
        let mut parser = FrameParser::new(true);
        assert!(parser.feed(&masked_header(0x88, 126)).is_err());

        // Pong at the 125 byte limit is fine
        let mut parser = FrameParser::new(true);
        let (_, header) = parser.feed(&masked_header(0x8A, 125)).unwrap();
        assert_eq!(header.unwrap().opcode, OpCode::Pong);
    }

    #[test]
    fn test_end_of_stream_before_and_during_header() {
        let mut parser = FrameParser::new(true);
        let mut empty: &[u8] = &[];
        assert!(matches!(
            parser.read_from(&mut empty),
            Err(Error::ConnectionClosed)
        ));

        let mut parser = FrameParser::new(true);
        let mut first: &[u8] = &[0x81];
        assert!(parser.read_from(&mut first).unwrap().is_none());
        assert!(parser.is_started());
        assert!(matches!(
            parser.read_from(&mut first),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_reset() {
        let mut parser = FrameParser::new(true);
        parser.feed(&[0x81, 0x85, 0x00]).unwrap();
        assert_eq!(parser.state(), ParseState::Mask);
        assert_eq!(parser.remaining(), 3);

        parser.reset();
        assert_eq!(parser.state(), ParseState::Initial);
        assert!(!parser.is_started());
        assert_eq!(parser.remaining(), 1);
    }
}
