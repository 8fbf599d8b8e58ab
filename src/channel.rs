//! Byte channels the engine reads frames from and writes frames to
//!
//! The engine only needs three capabilities: a blocking read, a blocking
//! write and a bounded wait for readability. Everything transport-specific
//! (sockets, pipes, TLS wrappers) lives behind [`ByteChannel`].

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

/// A duplex byte stream with readiness polling
pub trait ByteChannel: Read + Write {
    /// Block until data is available to read or `timeout` elapses
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` on timeout. End of
    /// stream counts as readable; the following read returns 0.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        (**self).wait_readable(timeout)
    }
}

/// Wait for `fd` to become readable using `poll(2)`
pub fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let timeout_ms = match timeout {
        None => -1,
        // Round up so a sub-millisecond wait does not become a busy poll.
        Some(t) => t
            .as_nanos()
            .div_ceil(1_000_000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
    };

    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and nfds is 1.
    let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(res > 0)
}

/// Descriptor-backed channel
///
/// The reader must expose a file descriptor for readiness polling. Pass
/// references (`&TcpStream`, `&UnixStream`) to keep ownership of the
/// descriptors with the caller; the same stream may serve both directions.
///
/// ```no_run
/// use std::os::unix::net::UnixStream;
/// use wsframe::channel::FdChannel;
///
/// let (sock, _peer) = UnixStream::pair().unwrap();
/// let channel = FdChannel::new(&sock, &sock);
/// ```
#[derive(Debug)]
pub struct FdChannel<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> FdChannel<R, W>
where
    R: Read + AsFd,
    W: Write,
{
    /// Create a channel reading from `reader` and writing to `writer`
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Get a reference to the reading half
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Get a reference to the writing half
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Consume the channel and return both halves
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W> Read for FdChannel<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R, W: Write> Write for FdChannel<R, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<R, W> ByteChannel for FdChannel<R, W>
where
    R: Read + AsFd,
    W: Write,
{
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        poll_readable(self.reader.as_fd().as_raw_fd(), timeout)
    }
}

/// Channel driven by caller-supplied read and write functions
///
/// Both functions receive the opaque context given at construction. Without
/// a poll descriptor the channel always reports itself readable, so waits
/// degrade to the blocking behavior of the read function.
pub struct CallbackChannel<C, R, W> {
    context: C,
    on_read: R,
    on_write: W,
    poll_fd: Option<OwnedFd>,
}

impl<C, R, W> CallbackChannel<C, R, W>
where
    R: FnMut(&mut C, &mut [u8]) -> io::Result<usize>,
    W: FnMut(&mut C, &[u8]) -> io::Result<usize>,
{
    /// Create a channel from a context and its I/O functions
    pub fn new(context: C, on_read: R, on_write: W) -> Self {
        Self {
            context,
            on_read,
            on_write,
            poll_fd: None,
        }
    }

    /// Poll `fd` for readability before reads
    ///
    /// The channel owns the descriptor and closes it when dropped. To poll a
    /// stream the caller keeps using, pass a duplicate (`try_clone`).
    pub fn with_poll_fd(mut self, fd: impl Into<OwnedFd>) -> Self {
        self.poll_fd = Some(fd.into());
        self
    }

    /// Get a reference to the context
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Get a mutable reference to the context
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Consume the channel and return the context
    pub fn into_context(self) -> C {
        self.context
    }
}

impl<C, R, W> Read for CallbackChannel<C, R, W>
where
    R: FnMut(&mut C, &mut [u8]) -> io::Result<usize>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (self.on_read)(&mut self.context, buf)
    }
}

impl<C, R, W> Write for CallbackChannel<C, R, W>
where
    W: FnMut(&mut C, &[u8]) -> io::Result<usize>,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.on_write)(&mut self.context, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C, R, W> ByteChannel for CallbackChannel<C, R, W>
where
    R: FnMut(&mut C, &mut [u8]) -> io::Result<usize>,
    W: FnMut(&mut C, &[u8]) -> io::Result<usize>,
{
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        match &self.poll_fd {
            Some(fd) => poll_readable(fd.as_raw_fd(), timeout),
            None => Ok(true),
        }
    }
}

/// In-memory channel
///
/// Reads drain `incoming`, at most `max_chunk` bytes per call; writes append
/// to `outgoing`. An empty `incoming` buffer is not readable, so waits time
/// out immediately, unless the channel was marked closed, in which case
/// reads report end of stream.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    incoming: BytesMut,
    outgoing: BytesMut,
    max_chunk: Option<usize>,
    closed: bool,
}

impl MemoryChannel {
    /// Create an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel whose reads yield `data`
    pub fn with_incoming(data: &[u8]) -> Self {
        let mut channel = Self::new();
        channel.push_incoming(data);
        channel
    }

    /// Limit every read to at most `max_chunk` bytes
    pub fn max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk.max(1));
        self
    }

    /// Queue bytes for subsequent reads
    pub fn push_incoming(&mut self, data: &[u8]) {
        self.incoming.put_slice(data);
    }

    /// Report end of stream once `incoming` is drained
    pub fn close_incoming(&mut self) {
        self.closed = true;
    }

    /// Bytes not yet read
    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Bytes written so far
    pub fn outgoing(&self) -> &[u8] {
        &self.outgoing
    }

    /// Take every byte written so far
    pub fn take_outgoing(&mut self) -> BytesMut {
        self.outgoing.split()
    }
}

impl Read for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.incoming.is_empty() {
            if self.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let mut n = buf.len().min(self.incoming.len());
        if let Some(max_chunk) = self.max_chunk {
            n = n.min(max_chunk);
        }
        buf[..n].copy_from_slice(&self.incoming[..n]);
        self.incoming.advance(n);
        Ok(n)
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteChannel for MemoryChannel {
    fn wait_readable(&mut self, _timeout: Option<Duration>) -> io::Result<bool> {
        Ok(!self.incoming.is_empty() || self.closed)
    }
}
