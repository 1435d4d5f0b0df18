//! Pull-based byte sources.
//!
//! Every stage of a message stream (raw body, transcoder, message,
//! multipart) is a [`ByteSource`]. The consumer decides how many bytes it
//! wants on each call; a stage may return fewer, and says whether more may
//! follow.

use std::io::{self, Read};

use crate::error::Result;

/// Whether a source can produce more bytes after a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// More bytes may follow on the next pull.
    Continue,
    /// The source is exhausted; every further pull returns zero bytes.
    End,
}

/// Outcome of a successful pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Number of bytes written into the caller's buffer.
    pub written: usize,
    /// Whether more bytes may follow.
    pub status: Status,
}

impl Chunk {
    /// A chunk after which more bytes may follow.
    #[must_use]
    pub const fn more(written: usize) -> Self {
        Self {
            written,
            status: Status::Continue,
        }
    }

    /// The final chunk of a source.
    #[must_use]
    pub const fn end(written: usize) -> Self {
        Self {
            written,
            status: Status::End,
        }
    }

    /// Returns true if the source is exhausted.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self.status, Status::End)
    }
}

/// A producer of bytes pulled by its consumer.
///
/// A fault is reported as `Err`; bytes written by earlier pulls stay valid.
pub trait ByteSource {
    /// Writes at most `buf.len()` bytes into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source (or a source beneath it) fails.
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        (**self).pull(buf)
    }
}

/// Adapts any [`Read`] into a [`ByteSource`].
///
/// A zero-length read on a non-empty buffer is treated as end of stream.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
    done: bool,
}

impl<R: Read> ReaderSource<R> {
    /// Wraps a reader.
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self { inner, done: false }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        if self.done {
            return Ok(Chunk::end(0));
        }
        if buf.is_empty() {
            return Ok(Chunk::more(0));
        }

        loop {
            match self.inner.read(buf) {
                Ok(0) => {
                    tracing::trace!("body source reached end of stream");
                    self.done = true;
                    return Ok(Chunk::end(0));
                }
                Ok(n) => return Ok(Chunk::more(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
