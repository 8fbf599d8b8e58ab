//! One side of a WebSocket connection
//!
//! [`Endpoint`] drives the header parser, payload reader and frame writer
//! over a [`ByteChannel`]. It owns a single frame slot holding the last
//! message read, plus the close status of the last failed read. The channel
//! is only borrowed for I/O and is never shut down by the endpoint.

use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::time::Duration;

use log::Level;

use crate::{Config, SMALL_MESSAGE_THRESHOLD};
use crate::channel::{ByteChannel, FdChannel};
use crate::error::{CloseReason, Error, Result};
use crate::frame::{Frame, OpCode, write_frame};
use crate::mask::generate_mask;
use crate::parser::FrameParser;
use crate::protocol::{MessageAssembler, Role};

/// Framing endpoint bound to a byte channel
///
/// Reads and writes are blocking. At most one read and one write may be in
/// flight at a time; callers sharing an endpoint between threads must
/// serialize access themselves.
#[derive(Debug)]
pub struct Endpoint<C> {
    channel: C,
    role: Role,
    config: Config,
    /// Last message read, until taken or released
    frame: Option<Frame>,
    /// Fragmented message interrupted by a control frame
    assembler: MessageAssembler,
    /// Close status of the last failed read
    last_close_code: Option<u16>,
}

impl<R, W> Endpoint<FdChannel<R, W>>
where
    R: Read + AsFd,
    W: Write,
{
    /// Endpoint over a pair of descriptor-backed streams with default config
    pub fn from_fds(reader: R, writer: W, role: Role) -> Self {
        Self::new(FdChannel::new(reader, writer), role)
    }
}

impl<C: ByteChannel> Endpoint<C> {
    /// Create an endpoint with default configuration
    pub fn new(channel: C, role: Role) -> Self {
        Self::with_config(channel, role, Config::default())
    }

    /// Create an endpoint with custom configuration
    pub fn with_config(channel: C, role: Role, config: Config) -> Self {
        ws_log!(
            config.logger,
            Level::Trace,
            "WebSocket endpoint created ({:?}, max payload {})",
            role,
            config.max_payload_size
        );
        Self {
            channel,
            role,
            assembler: MessageAssembler::new(config.max_payload_size),
            config,
            frame: None,
            last_close_code: None,
        }
    }

    /// Endpoint role
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Endpoint configuration
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a reference to the channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Get a mutable reference to the channel
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Consume the endpoint and return the channel
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Close status to echo after the last read failed
    ///
    /// Cleared at the start of every read.
    #[inline]
    pub fn last_close_code(&self) -> Option<u16> {
        self.last_close_code
    }

    /// Last message read, if still held
    #[inline]
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Take ownership of the last message read
    pub fn take_frame(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    /// Drop the last message read and its payload
    pub fn release_frame(&mut self) {
        self.frame = None;
    }

    /// Read the next complete message
    ///
    /// Waits up to `timeout` (`None` blocks indefinitely) for the first byte
    /// of a frame, unless `ready` says the channel is already readable. Once
    /// a frame or fragmented message has started, every further wait is
    /// bounded by [`Config::progress_timeout`] and running out of it is a
    /// protocol violation. This includes the gap between two fragments.
    ///
    /// A control frame arriving between fragments is returned on its own;
    /// the next read picks the fragmented message up where it stopped.
    ///
    /// Returns `Ok(None)` if nothing arrived in time. A message still held
    /// from the previous read is released first. On failure the message in
    /// progress is dropped and [`last_close_code`](Self::last_close_code)
    /// holds the status to send back, if the failure warrants one.
    pub fn read(&mut self, timeout: Option<Duration>, ready: bool) -> Result<Option<&Frame>> {
        self.frame = None;
        self.last_close_code = None;

        match self.read_message(timeout, ready) {
            Ok(Some(frame)) => {
                ws_log!(
                    self.config.logger,
                    Level::Debug,
                    "WebSocket {} message received (length {})",
                    frame.opcode(),
                    frame.payload_len()
                );
                Ok(Some(&*self.frame.insert(frame)))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.assembler.reset();
                self.last_close_code = err.close_code();
                match self.last_close_code {
                    Some(code) => ws_log!(
                        self.config.logger,
                        Level::Error,
                        "WebSocket read failed (close code {}): {}",
                        code,
                        err
                    ),
                    None => ws_log!(
                        self.config.logger,
                        Level::Debug,
                        "WebSocket read failed: {}",
                        err
                    ),
                }
                Err(err)
            }
        }
    }

    fn read_message(&mut self, timeout: Option<Duration>, ready: bool) -> Result<Option<Frame>> {
        let progress_timeout = self.config.progress_timeout;
        let mut parser = FrameParser::new(self.config.require_masked_frames);
        let mut skip_wait = ready;

        loop {
            let in_progress = parser.is_started() || self.assembler.is_in_progress();

            if skip_wait {
                skip_wait = false;
            } else {
                let wait = if in_progress {
                    Some(progress_timeout)
                } else {
                    timeout
                };
                match self.channel.wait_readable(wait) {
                    Ok(true) => {}
                    Ok(false) if !in_progress => return Ok(None),
                    Ok(false) => {
                        ws_log!(
                            self.config.logger,
                            Level::Error,
                            "Partial WebSocket frame received (state {})",
                            parser.state()
                        );
                        return Err(Error::Protocol("timed out in the middle of a frame"));
                    }
                    Err(e) if in_progress => {
                        ws_log!(
                            self.config.logger,
                            Level::Debug,
                            "WebSocket channel poll failed: {}",
                            e
                        );
                        return Err(Error::Protocol("connection lost in the middle of a frame"));
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let header = match parser.read_from(&mut self.channel) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    ws_log!(
                        self.config.logger,
                        Level::Trace,
                        "WebSocket header incomplete (state {}, {} bytes pending)",
                        parser.state(),
                        parser.remaining()
                    );
                    continue;
                }
                Err(e @ (Error::ConnectionClosed | Error::Io(_)))
                    if self.assembler.is_in_progress() =>
                {
                    ws_log!(
                        self.config.logger,
                        Level::Debug,
                        "WebSocket channel failed between fragments: {}",
                        e
                    );
                    return Err(Error::Protocol("connection lost in the middle of a message"));
                }
                Err(e) => return Err(e),
            };

            ws_log!(
                self.config.logger,
                Level::Trace,
                "WebSocket header decoded ({}, length {}, fin {}, masked {})",
                header.opcode,
                header.payload_len,
                header.fin,
                header.masked
            );

            if let Some(frame) = self.assembler.accept(
                &mut self.channel,
                header,
                progress_timeout,
                &self.config.logger,
            )? {
                return Ok(Some(frame));
            }
            parser.reset();
        }
    }

    /// Send `payload` as one final frame
    ///
    /// The frame is masked with a fresh key when
    /// [`Config::mask_outgoing`] is set.
    pub fn write(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mask = self.config.mask_outgoing.then(generate_mask);

        ws_log!(
            self.config.logger,
            Level::Debug,
            "Sending WebSocket {} frame (length {}, masked {})",
            opcode,
            payload.len(),
            mask.is_some()
        );

        write_frame(&mut self.channel, opcode, payload, mask).map_err(|e| {
            ws_log!(
                self.config.logger,
                Level::Error,
                "WebSocket {} frame write failed: {}",
                opcode,
                e
            );
            Error::from(e)
        })?;
        Ok(())
    }

    /// Send a frame with an untyped opcode
    ///
    /// Unknown opcodes are rejected before anything is written.
    pub fn write_raw(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        let opcode = OpCode::try_from(opcode).inspect_err(|_| {
            ws_log!(
                self.config.logger,
                Level::Error,
                "Refusing to send invalid opcode {:#x}",
                opcode
            );
        })?;
        self.write(opcode, payload)
    }

    /// Send a close frame carrying `code`
    pub fn close(&mut self, code: u16) -> Result<()> {
        self.close_with_reason(code, "")
    }

    /// Send a close frame carrying `code` and a reason
    ///
    /// `code` must be 1000-1011 or 1015 and the reason must fit in a control
    /// frame along with it. Both are checked before anything is written.
    pub fn close_with_reason(&mut self, code: u16, reason: &str) -> Result<()> {
        if !CloseReason::is_sendable(code) {
            ws_log!(
                self.config.logger,
                Level::Error,
                "Refusing to send invalid close code {}",
                code
            );
            return Err(Error::InvalidCloseCode(code));
        }

        let len = 2 + reason.len();
        if len > SMALL_MESSAGE_THRESHOLD {
            return Err(Error::CloseReasonTooLong(reason.len()));
        }

        let mut payload = [0u8; SMALL_MESSAGE_THRESHOLD];
        payload[..2].copy_from_slice(&code.to_be_bytes());
        payload[2..len].copy_from_slice(reason.as_bytes());

        ws_log!(
            self.config.logger,
            Level::Debug,
            "Closing WebSocket connection with code {}",
            code
        );
        self.write(OpCode::Close, &payload[..len])
    }
}
