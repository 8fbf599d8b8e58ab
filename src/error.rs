//! Error types for the framing engine

use std::io;

use thiserror::Error;

/// Result type alias for framing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Framing engine error types
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying byte channel
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
    /// Protocol violation (reserved bits, bad opcode, missing mask, truncated frame)
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
    /// Reassembled message exceeds the configured payload ceiling
    #[error("Message too large")]
    MessageTooLarge,
    /// Frame announces a length with the most significant bit set
    #[error("Frame too large")]
    FrameTooLarge,
    /// Channel reached end of stream between frames
    #[error("Connection closed")]
    ConnectionClosed,
    /// Opcode outside the RFC 6455 set
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpCode(u8),
    /// Close code that may not be sent
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),
    /// Close reason that does not fit in a control frame
    #[error("Close reason too long: {0} bytes")]
    CloseReasonTooLong(usize),
    /// Invalid UTF-8 in text payload
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,
}

impl Error {
    /// Close status the caller should echo in its close frame, if any
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::Protocol(_) => Some(CloseReason::PROTOCOL_ERROR),
            Error::MessageTooLarge | Error::FrameTooLarge => Some(CloseReason::TOO_BIG),
            Error::InvalidUtf8 => Some(CloseReason::INVALID_PAYLOAD),
            _ => None,
        }
    }

    /// Whether this error was produced before touching the channel
    #[inline]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::InvalidOpCode(_) | Error::InvalidCloseCode(_) | Error::CloseReasonTooLong(_)
        )
    }
}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Unsupported data
    pub const UNSUPPORTED: u16 = 1003;
    /// Reserved, never sent
    pub const RESERVED: u16 = 1004;
    /// No status received
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Policy violation
    pub const POLICY: u16 = 1008;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;
    /// Mandatory extension (only initiators send this)
    pub const EXTENSION: u16 = 1010;
    /// Internal server error
    pub const INTERNAL: u16 = 1011;
    /// TLS handshake failure, receive-only per RFC 6455
    pub const TLS_HANDSHAKE: u16 = 1015;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if a close code may be passed to [`Endpoint::close`](crate::Endpoint::close)
    ///
    /// Accepts 1000-1011 and 1015. The reserved codes inside that range and
    /// the receive-only 1015 are let through on purpose.
    #[inline]
    pub fn is_sendable(code: u16) -> bool {
        matches!(code, 1000..=1011 | 1015)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
            }
            Error::InvalidOpCode(_) | Error::InvalidCloseCode(_) | Error::CloseReasonTooLong(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
