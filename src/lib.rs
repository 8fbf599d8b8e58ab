//! # wsframe: blocking RFC 6455 framing engine
//!
//! Encodes and decodes WebSocket frames for a single duplex connection,
//! given nothing but a byte channel. Opening the transport and performing
//! the HTTP upgrade are left to the caller.
//!
//! ## Features
//!
//! - **Incremental header decoding**: headers are assembled across any number
//!   of short reads with a fixed 8-byte scratch buffer
//! - **Fragment reassembly**: continuation frames are merged into one message,
//!   bounded by a cumulative payload ceiling
//! - **Forward-progress timeout**: a peer that starts a frame must finish it
//!   promptly or the read fails as a protocol violation
//! - **Zero-copy writes**: unmasked payloads go straight from the caller's
//!   slice to the channel
//! - **Pluggable I/O and logging**: descriptors, callbacks, or in-memory
//!   channels; log records go to stderr, the `log` facade, or a custom sink
//!
//! ## Example
//!
//! ```no_run
//! use std::os::unix::net::UnixStream;
//! use std::time::Duration;
//! use wsframe::prelude::*;
//!
//! # fn main() -> wsframe::Result<()> {
//! let (client, server) = UnixStream::pair()?;
//!
//! let mut tx = Endpoint::with_config(
//!     FdChannel::new(&client, &client),
//!     Role::Initiator,
//!     Config::for_role(Role::Initiator),
//! );
//! let mut rx = Endpoint::with_config(
//!     FdChannel::new(&server, &server),
//!     Role::Responder,
//!     Config::for_role(Role::Responder),
//! );
//!
//! tx.write(OpCode::Text, b"Hello")?;
//! if let Some(frame) = rx.read(Some(Duration::from_secs(1)), false)? {
//!     assert_eq!(frame.payload(), b"Hello");
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod logging;

pub mod buffer;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod mask;
pub mod parser;
pub mod protocol;

use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;

pub use buffer::PayloadBuffer;
pub use channel::{ByteChannel, CallbackChannel, FdChannel, MemoryChannel};
pub use endpoint::Endpoint;
pub use error::{CloseReason, Error, Result};
pub use frame::{Frame, FrameHeader, OpCode};
pub use logging::Logger;
pub use parser::{FrameParser, ParseState};
pub use protocol::Role;

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Largest payload encoded in the 7-bit length field
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Largest payload encoded with the 16-bit extended length
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// Default ceiling for a reassembled message (25 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Default bound on waits once a frame has started arriving
pub const PROGRESS_TIMEOUT: Duration = Duration::from_millis(1000);

/// Configuration for a framing endpoint
///
/// The defaults require a mask on every incoming frame and never mask
/// outgoing frames, whatever the role. Use [`Config::for_role`] for RFC 6455
/// role-based masking.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use log::LevelFilter;
/// use wsframe::Config;
///
/// let config = Config::builder()
///     .max_payload_size(64 * 1024)
///     .progress_timeout(Duration::from_millis(250))
///     .log_level(LevelFilter::Debug)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a reassembled message (default: 25 MiB)
    pub max_payload_size: usize,
    /// Wait bound once a frame or fragmented message is in progress (default: 1s)
    pub progress_timeout: Duration,
    /// Reject incoming frames without a mask (default: true)
    pub require_masked_frames: bool,
    /// Mask outgoing frames with a fresh random key (default: false)
    pub mask_outgoing: bool,
    /// Log threshold and sink (default: disabled)
    pub logger: Logger,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            progress_timeout: PROGRESS_TIMEOUT,
            require_masked_frames: true,
            mask_outgoing: false,
            logger: Logger::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Config with RFC 6455 masking for `role`
    ///
    /// Initiators mask what they send and accept unmasked input; responders
    /// require masked input and send unmasked frames.
    pub fn for_role(role: Role) -> Self {
        let initiator = role == Role::Initiator;
        Self {
            require_masked_frames: !initiator,
            mask_outgoing: initiator,
            ..Self::default()
        }
    }
}

/// Builder for endpoint configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from the RFC 6455 masking preset for `role`
    pub fn role(mut self, role: Role) -> Self {
        let preset = Config::for_role(role);
        self.config.require_masked_frames = preset.require_masked_frames;
        self.config.mask_outgoing = preset.mask_outgoing;
        self
    }

    /// Set maximum reassembled message size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the wait bound used once a frame is in progress
    pub fn progress_timeout(mut self, timeout: Duration) -> Self {
        self.config.progress_timeout = timeout;
        self
    }

    /// Require or waive the mask bit on incoming frames
    pub fn require_masked_frames(mut self, required: bool) -> Self {
        self.config.require_masked_frames = required;
        self
    }

    /// Enable or disable masking of outgoing frames
    pub fn mask_outgoing(mut self, enabled: bool) -> Self {
        self.config.mask_outgoing = enabled;
        self
    }

    /// Set the log level threshold
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.config.logger.set_level(level);
        self
    }

    /// Route log records to `sink` instead of standard error
    pub fn log_sink(mut self, sink: Arc<dyn log::Log>) -> Self {
        self.config.logger = self.config.logger.with_sink(sink);
        self
    }

    /// Replace the logger
    pub fn logger(mut self, logger: Logger) -> Self {
        self.config.logger = logger;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::channel::{ByteChannel, CallbackChannel, FdChannel, MemoryChannel};
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{CloseReason, Error, Result};
    pub use crate::frame::{Frame, OpCode};
    pub use crate::protocol::Role;
}
