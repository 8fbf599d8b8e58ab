//! Owned payload storage for decoded frames
//!
//! A [`PayloadBuffer`] always keeps one zero byte after the payload so text
//! consumers can hand the bytes to NUL-terminated APIs. The terminator is
//! never part of [`len`](PayloadBuffer::len) or [`as_bytes`](PayloadBuffer::as_bytes).

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Growable payload buffer with a trailing terminator byte
///
/// Invariant: `inner.len() == len + 1` and `inner[len] == 0`.
pub struct PayloadBuffer {
    inner: BytesMut,
}

impl PayloadBuffer {
    /// Create an empty payload
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty payload with room for `capacity` bytes plus terminator
    pub fn with_capacity(capacity: usize) -> Self {
        let mut inner = BytesMut::with_capacity(capacity + 1);
        inner.put_u8(0);
        Self { inner }
    }

    /// Logical payload length (terminator excluded)
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len() - 1
    }

    /// Whether the payload is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserved room for further payload bytes
    #[inline]
    pub fn spare_capacity(&self) -> usize {
        self.inner.capacity() - self.inner.len()
    }

    /// Payload bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner[..self.len()]
    }

    /// Mutable payload bytes
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.inner[..len]
    }

    /// Payload bytes followed by the zero terminator
    #[inline]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.inner
    }

    /// Ensure room for `additional` more payload bytes
    pub fn reserve(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    /// Grow the payload by `additional` zeroed bytes and return them
    ///
    /// The terminator moves to the new end.
    pub fn grow(&mut self, additional: usize) -> &mut [u8] {
        let old_len = self.len();
        self.inner.truncate(old_len);
        self.inner.resize(old_len + additional, 0);
        self.inner.put_u8(0);
        &mut self.inner[old_len..old_len + additional]
    }

    /// Append bytes to the payload
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.grow(data.len()).copy_from_slice(data);
    }

    /// Drop payload bytes past `len`
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.inner.truncate(len);
            self.inner.put_u8(0);
        }
    }

    /// Remove every payload byte, keeping the allocation
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Take the payload as immutable `Bytes` (terminator dropped)
    pub fn into_bytes(mut self) -> Bytes {
        let len = self.len();
        self.inner.truncate(len);
        self.inner.freeze()
    }

    /// Take the payload as a vector (terminator dropped)
    pub fn into_vec(self) -> Vec<u8> {
        self.into_bytes().to_vec()
    }
}

impl Default for PayloadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for PayloadBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<&[u8]> for PayloadBuffer {
    fn from(data: &[u8]) -> Self {
        let mut buf = Self::with_capacity(data.len());
        buf.extend_from_slice(data);
        buf
    }
}

impl PartialEq<[u8]> for PayloadBuffer {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl fmt::Debug for PayloadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadBuffer")
            .field("len", &self.len())
            .field("data", &self.as_bytes())
            .finish()
    }
}
