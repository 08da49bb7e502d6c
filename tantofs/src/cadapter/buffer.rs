//! Incremental receive buffer for the RESP decoder.
//!
//! The decoder never knows how long a reply is before parsing it, so bytes are
//! pulled from the socket one chunk at a time and only when everything read so
//! far has been consumed. Unconsumed bytes stay here for the next parse step.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest amount pulled from the socket by a single `fill`.
pub const READ_CHUNK: usize = 1024;

pub struct ReadBuffer {
    buf: Box<[u8]>,
    cur: usize,
    rem: usize,
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::with_capacity(READ_CHUNK)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            cur: 0,
            rem: 0,
        }
    }

    /// Bytes received but not yet consumed.
    pub fn remaining(&self) -> usize {
        self.rem
    }

    /// Look at up to `n` buffered bytes without advancing.
    pub fn peek(&self, n: usize) -> &[u8] {
        let n = n.min(self.rem);
        &self.buf[self.cur..self.cur + n]
    }

    /// Advance past up to `n` buffered bytes, returning them.
    pub fn consume(&mut self, n: usize) -> &[u8] {
        let n = n.min(self.rem);
        let start = self.cur;
        self.cur += n;
        self.rem -= n;
        &self.buf[start..start + n]
    }

    /// Copy as many buffered bytes as fit into `dst`, returning the count.
    pub fn consume_into(&mut self, dst: &mut [u8]) -> usize {
        let taken = self.consume(dst.len());
        let n = taken.len();
        dst[..n].copy_from_slice(taken);
        n
    }

    /// Read from `reader` only if the buffer is exhausted. Returns the number
    /// of bytes available afterwards. A closed peer is reported as
    /// `UnexpectedEof`, since a reply was still expected.
    pub async fn fill<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.rem > 0 {
            return Ok(self.rem);
        }
        let n = reader.read(&mut self.buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "backend closed the connection",
            ));
        }
        self.cur = 0;
        self.rem = n;
        Ok(n)
    }
}
