//! Streaming transfer-encoding transcoder.
//!
//! A [`Transcoder`] pulls raw bytes from a [`ByteSource`], runs them through
//! an [`Encode`] primitive and hands out the encoded bytes in whatever
//! amounts the consumer asks for. Surplus encoded output is cached for the
//! next pull. For Base64 a line break is inserted every
//! [`MAX_LINE_LENGTH`] characters; Quoted-Printable folds its own lines.

use bytes::{Buf, BytesMut};

use crate::encoding::{
    Base64Encoder, Encode, MAX_LINE_LENGTH, QpMode, QuotedPrintableEncoder,
};
use crate::error::{Error, Result};
use crate::source::{ByteSource, Chunk};

/// Upper bound on raw bytes pulled from the source per refill.
const REFILL_LIMIT: usize = 8192;

/// Encodes a raw byte source on demand.
#[derive(Debug)]
pub struct Transcoder<S, E> {
    source: S,
    encoder: E,
    /// Encoded bytes not yet handed out.
    cache: BytesMut,
    scratch: Vec<u8>,
    eol: Vec<u8>,
    line_limit: Option<usize>,
    /// Characters written on the current output line.
    column: usize,
    /// Trailing bytes of `eol` still to be written.
    pending_eol: usize,
    source_done: bool,
    fault: Option<Error>,
    aborted: bool,
}

impl<S: ByteSource> Transcoder<S, Base64Encoder> {
    /// Creates a Base64 transcoder breaking lines every 76 characters with `eol`.
    #[must_use]
    pub fn base64(source: S, eol: &str) -> Self {
        Self::new(source, Base64Encoder::new(), eol, Some(MAX_LINE_LENGTH))
    }
}

impl<S: ByteSource> Transcoder<S, QuotedPrintableEncoder> {
    /// Creates a Quoted-Printable transcoder.
    #[must_use]
    pub fn quoted_printable(source: S, mode: QpMode, eol: &str) -> Self {
        Self::new(source, QuotedPrintableEncoder::new(mode, eol), eol, None)
    }
}

impl<S: ByteSource, E: Encode> Transcoder<S, E> {
    /// Creates a transcoder.
    ///
    /// With `line_limit` set, `eol` is written after every `line_limit`
    /// output characters, but only when more data follows.
    #[must_use]
    pub fn new(source: S, encoder: E, eol: &str, line_limit: Option<usize>) -> Self {
        Self {
            source,
            encoder,
            cache: BytesMut::new(),
            scratch: Vec::new(),
            eol: eol.as_bytes().to_vec(),
            line_limit,
            column: 0,
            pending_eol: 0,
            source_done: false,
            fault: None,
            aborted: false,
        }
    }

    /// Pulls up to `want` raw bytes and encodes them into the cache.
    ///
    /// Returns false if the source made no progress.
    fn refill(&mut self, want: usize) -> bool {
        let want = want.clamp(1, REFILL_LIMIT);
        self.scratch.resize(want, 0);

        let encoded = self.source.pull(&mut self.scratch[..want]).and_then(|chunk| {
            self.encoder
                .encode(&self.scratch[..chunk.written], &mut self.cache)?;
            if chunk.is_end() {
                self.encoder.finish(&mut self.cache)?;
                self.source_done = true;
                tracing::trace!(cached = self.cache.len(), "transcoder source exhausted");
            }
            Ok(chunk)
        });

        match encoded {
            Ok(chunk) => chunk.written > 0 || chunk.is_end(),
            Err(e) => {
                tracing::warn!(error = %e, "body source failed while transcoding");
                self.fault = Some(e);
                true
            }
        }
    }

    /// True when the current line is full and must be broken before
    /// anything else is written.
    fn at_line_end(&self) -> bool {
        self.line_limit.is_some_and(|limit| self.column >= limit)
    }

    fn is_drained(&self) -> bool {
        self.source_done && self.cache.is_empty() && self.pending_eol == 0 && !self.at_line_end()
    }
}

impl<S: ByteSource, E: Encode> ByteSource for Transcoder<S, E> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        if self.aborted {
            return Err(Error::Aborted);
        }

        let mut written = 0;
        while written < buf.len() {
            if self.pending_eol > 0 {
                let start = self.eol.len() - self.pending_eol;
                let take = self.pending_eol.min(buf.len() - written);
                buf[written..written + take].copy_from_slice(&self.eol[start..start + take]);
                self.pending_eol -= take;
                written += take;
                continue;
            }

            if self.at_line_end() {
                self.column = 0;
                self.pending_eol = self.eol.len();
                continue;
            }

            if self.cache.is_empty() {
                if self.source_done || self.fault.is_some() || !self.refill(buf.len() - written) {
                    break;
                }
                continue;
            }

            let mut take = self.cache.len().min(buf.len() - written);
            if let Some(limit) = self.line_limit {
                take = take.min(limit - self.column);
            }
            buf[written..written + take].copy_from_slice(&self.cache[..take]);
            self.cache.advance(take);
            self.column += take;
            written += take;
        }

        // A fault surfaces only once everything produced before it is delivered
        if written == 0 {
            if let Some(e) = self.fault.take() {
                self.aborted = true;
                return Err(e);
            }
        }

        if self.is_drained() {
            Ok(Chunk::end(written))
        } else {
            Ok(Chunk::more(written))
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::encoding::CRLF;
    use crate::source::ReaderSource;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use std::io::{self, Cursor};

    type CursorSource = ReaderSource<Cursor<Vec<u8>>>;

    fn source(data: &[u8]) -> CursorSource {
        ReaderSource::new(Cursor::new(data.to_vec()))
    }

    fn drain<T: ByteSource>(stream: &mut T, chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
            let chunk = stream.pull(&mut buf).unwrap();
            out.extend_from_slice(&buf[..chunk.written]);
            if chunk.is_end() {
                return out;
            }
        }
    }

    /// Yields its data, then fails.
    struct FailingSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl FailingSource {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
            }
        }
    }

    impl ByteSource for FailingSource {
        fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
            if self.pos == self.data.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated").into());
            }
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(Chunk::more(n))
        }
    }

    #[test]
    fn test_base64_short_body() {
        let mut t = Transcoder::base64(source(b"Hello, world!"), CRLF);
        assert_eq!(drain(&mut t, 1024), b"SGVsbG8sIHdvcmxkIQ==");
    }

    #[test]
    fn test_base64_full_final_line_is_terminated() {
        let raw = vec![b'x'; 57];
        let expected = format!("{}\r\n", "eHh4".repeat(19));
        for size in [1, 2, 76, 77, 78, 1024] {
            let mut t = Transcoder::base64(source(&raw), CRLF);
            assert_eq!(drain(&mut t, size), expected.as_bytes(), "chunk size {size}");
        }
    }

    #[test]
    fn test_base64_full_line_break_deferred_to_next_pull() {
        let raw = vec![b'x'; 57];
        let mut t = Transcoder::base64(source(&raw), CRLF);

        let mut buf = [0u8; 76];
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::more(76));
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::end(2));
        assert_eq!(&buf[..2], b"\r\n");
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::end(0));
    }

    #[test]
    fn test_base64_short_final_line_is_not_terminated() {
        let raw = vec![b'x'; 60];
        let mut t = Transcoder::base64(source(&raw), CRLF);
        let out = drain(&mut t, 1024);
        assert!(out.ends_with(b"eHh4"));
        assert_eq!(out.len(), 76 + 2 + 4);
    }

    #[test]
    fn test_base64_wraps_at_76() {
        let raw: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut t = Transcoder::base64(source(&raw), CRLF);
        let out = String::from_utf8(drain(&mut t, 4096)).unwrap();

        let lines: Vec<&str> = out.split("\r\n").collect();
        let (last, full) = lines.split_last().unwrap();
        assert!(full.iter().all(|line| line.len() == 76));
        assert!(!last.is_empty() && last.len() < 76);
        assert_eq!(STANDARD.decode(lines.concat()).unwrap(), raw);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let raw: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        let expected = drain(&mut Transcoder::base64(source(&raw), CRLF), 8192);
        for size in [1, 2, 3, 75, 76, 77, 78, 100] {
            let mut t = Transcoder::base64(source(&raw), CRLF);
            assert_eq!(drain(&mut t, size), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_split_line_break_resumes_first() {
        let raw = vec![b'x'; 114];
        let mut t = Transcoder::base64(source(&raw), CRLF);

        let mut buf = [0u8; 77];
        let chunk = t.pull(&mut buf).unwrap();
        assert_eq!(chunk, Chunk::more(77));
        assert_eq!(buf[76], b'\r');

        let mut buf = [0u8; 3];
        let chunk = t.pull(&mut buf).unwrap();
        assert_eq!(chunk, Chunk::more(3));
        assert_eq!(&buf, b"\neH");
    }

    #[test]
    fn test_custom_eol() {
        let raw = vec![b'x'; 60];
        let mut t = Transcoder::base64(source(&raw), "\n");
        let out = String::from_utf8(drain(&mut t, 7)).unwrap();
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
    }

    #[test]
    fn test_quoted_printable_forwards_encoder_output() {
        let mut t = Transcoder::quoted_printable(source(b"caf\xc3\xa9\nok"), QpMode::UnixText, CRLF);
        assert_eq!(drain(&mut t, 3), b"caf=C3=A9\r\nok");
    }

    #[test]
    fn test_empty_source() {
        let mut t = Transcoder::base64(source(b""), CRLF);
        let mut buf = [0u8; 16];
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::end(0));
    }

    #[test]
    fn test_end_is_permanent() {
        let mut t = Transcoder::base64(source(b"abc"), CRLF);
        assert_eq!(drain(&mut t, 16), b"YWJj");
        let mut buf = [0u8; 16];
        for _ in 0..3 {
            assert_eq!(t.pull(&mut buf).unwrap(), Chunk::end(0));
        }
    }

    #[test]
    fn test_fault_reported_after_cached_bytes() {
        let mut t = Transcoder::base64(FailingSource::new(b"abc"), CRLF);
        let mut buf = [0u8; 16];

        let chunk = t.pull(&mut buf).unwrap();
        assert_eq!(chunk, Chunk::more(4));
        assert_eq!(&buf[..4], b"YWJj");

        let err = t.pull(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));

        assert!(matches!(t.pull(&mut buf), Err(Error::Aborted)));
    }

    #[test]
    fn test_fault_masked_by_cache() {
        let mut t = Transcoder::base64(FailingSource::new(b"abcdef"), CRLF);

        let mut buf = [0u8; 2];
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::more(2));
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::more(2));
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::more(2));
        assert_eq!(t.pull(&mut buf).unwrap(), Chunk::more(2));
        assert!(t.pull(&mut buf).is_err());
    }
}
