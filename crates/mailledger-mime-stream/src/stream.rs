//! Message stream: header block followed by the (encoded) body.

use std::io::{self, Read};
use std::mem;

use bytes::{Buf, BytesMut};

use crate::encoding::{Base64Encoder, QuotedPrintableEncoder};
use crate::error::{Error, Result};
use crate::message::{Body, Message, TransferEncoding};
use crate::multipart::MultipartStream;
use crate::source::{ByteSource, Chunk, ReaderSource};
use crate::transcode::Transcoder;

type RawSource = ReaderSource<Box<dyn Read + Send>>;

/// Body stage of a message stream.
enum BodyStream {
    Empty,
    Raw(RawSource),
    Base64(Transcoder<RawSource, Base64Encoder>),
    QuotedPrintable(Transcoder<RawSource, QuotedPrintableEncoder>),
    Multipart(Box<MultipartStream>),
}

impl ByteSource for BodyStream {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        match self {
            Self::Empty => Ok(Chunk::end(0)),
            Self::Raw(source) => source.pull(buf),
            Self::Base64(transcoder) => transcoder.pull(buf),
            Self::QuotedPrintable(transcoder) => transcoder.pull(buf),
            Self::Multipart(multipart) => multipart.pull(buf),
        }
    }
}

enum State {
    /// Not pulled yet.
    Idle(Box<Message>),
    /// Writing the header block.
    Headers { block: BytesMut, body: BodyStream },
    /// Forwarding the body.
    Body(BodyStream),
    Done,
    Aborted,
}

/// Produces the MIME representation of a [`Message`].
///
/// The header block is generated on the first pull and always written in
/// full before any body byte. After the body ends, every further pull
/// returns zero bytes and [`Status::End`](crate::Status::End).
///
/// A stream is single-pass and single-consumer.
pub struct MessageStream {
    state: State,
    fault: Option<Error>,
}

impl MessageStream {
    pub(crate) fn new(message: Message) -> Self {
        Self {
            state: State::Idle(Box::new(message)),
            fault: None,
        }
    }

    /// Returns true once the stream has produced its last byte.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    fn start(&mut self) -> Result<()> {
        if let State::Idle(message) = mem::replace(&mut self.state, State::Aborted) {
            let (block, body) = prepare(*message)?;
            self.state = State::Headers { block, body };
        }
        Ok(())
    }

    fn enter_body(&mut self) {
        if let State::Headers { body, .. } = mem::replace(&mut self.state, State::Aborted) {
            self.state = State::Body(body);
        }
    }
}

/// Checks transfer encodings of a message and all of its nested parts, so
/// that an invalid tree fails before any byte is produced.
fn validate(encoding: TransferEncoding, is_part: bool, body: &Body) -> Result<()> {
    if is_part && !encoding.is_allowed_in_part() {
        return Err(Error::PartInvalidTransferEncoding(encoding));
    }
    if let Body::Multipart { parts, .. } = body {
        if !encoding.is_structural() {
            return Err(Error::MultipartInvalidTransferEncoding);
        }
        for part in parts {
            validate(part.encoding, true, &part.body)?;
        }
    }
    Ok(())
}

/// Validates the message and builds its header block and body stage.
fn prepare(message: Message) -> Result<(BytesMut, BodyStream)> {
    let Message {
        encoding,
        qp_mode,
        headers,
        body,
        is_part,
        eol,
    } = message;

    validate(encoding, is_part, &body)?;

    let mut block = BytesMut::new();
    if !is_part {
        block.extend_from_slice(b"MIME-Version: 1.0");
        block.extend_from_slice(eol.as_bytes());
    }
    if encoding != TransferEncoding::SevenBit {
        block.extend_from_slice(b"Content-Transfer-Encoding: ");
        block.extend_from_slice(encoding.as_str().as_bytes());
        block.extend_from_slice(eol.as_bytes());
    }
    headers.write_to(&mut block, &eol);
    block.extend_from_slice(eol.as_bytes());

    tracing::debug!(
        %encoding,
        is_part,
        headers = headers.len(),
        header_bytes = block.len(),
        "generated message header block"
    );

    let body = match body {
        Body::Empty => BodyStream::Empty,
        Body::Multipart { boundary, parts } => {
            BodyStream::Multipart(Box::new(MultipartStream::new(boundary, parts, eol)))
        }
        Body::Reader(reader) => {
            let source = ReaderSource::new(reader);
            match encoding {
                TransferEncoding::Base64 => BodyStream::Base64(Transcoder::base64(source, &eol)),
                TransferEncoding::QuotedPrintable => {
                    BodyStream::QuotedPrintable(Transcoder::quoted_printable(source, qp_mode, &eol))
                }
                TransferEncoding::SevenBit
                | TransferEncoding::EightBit
                | TransferEncoding::Binary => BodyStream::Raw(source),
            }
        }
    };

    Ok((block, body))
}

impl ByteSource for MessageStream {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        if let Some(e) = self.fault.take() {
            self.state = State::Aborted;
            return Err(e);
        }

        let mut written = 0;
        loop {
            match &mut self.state {
                State::Idle(_) => self.start()?,
                State::Headers { block, .. } => {
                    let take = block.len().min(buf.len() - written);
                    buf[written..written + take].copy_from_slice(&block[..take]);
                    block.advance(take);
                    written += take;
                    if !block.is_empty() {
                        break;
                    }
                    self.enter_body();
                }
                State::Body(body) => {
                    if written == buf.len() {
                        break;
                    }
                    match body.pull(&mut buf[written..]) {
                        Ok(chunk) => {
                            written += chunk.written;
                            if chunk.is_end() {
                                self.state = State::Done;
                            } else if chunk.written == 0 {
                                break;
                            }
                        }
                        // Deliver what this pull produced; report the fault next time
                        Err(e) if written > 0 => {
                            self.fault = Some(e);
                            break;
                        }
                        Err(e) => {
                            self.state = State::Aborted;
                            return Err(e);
                        }
                    }
                }
                State::Done => break,
                State::Aborted => return Err(Error::Aborted),
            }
        }

        if self.is_done() {
            Ok(Chunk::end(written))
        } else {
            Ok(Chunk::more(written))
        }
    }
}

impl Read for MessageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let chunk = self.pull(buf)?;
            if chunk.written > 0 || chunk.is_end() {
                return Ok(chunk.written);
            }
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
    use crate::encoding::QpMode;
    use std::io::Cursor;

    fn drain(stream: &mut MessageStream, chunk_size: usize) -> String {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
            let chunk = stream.pull(&mut buf).unwrap();
            out.extend_from_slice(&buf[..chunk.written]);
            if chunk.is_end() {
                return String::from_utf8(out).unwrap();
            }
        }
    }

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted"))
        }
    }

    #[test]
    fn test_seven_bit_message() {
        let message = Message::new(TransferEncoding::SevenBit, Cursor::new("Hi there"))
            .with_header("subject", "Greeting");
        let out = drain(&mut message.into_stream(), 1024);
        assert_eq!(out, "MIME-Version: 1.0\r\nSubject: Greeting\r\n\r\nHi there");
    }

    #[test]
    fn test_base64_message() {
        let message = Message::binary(Cursor::new("Hello, world!"))
            .with_header("Content-Type", "application/octet-stream");
        let out = drain(&mut message.into_stream(), 5);
        assert_eq!(
            out,
            "MIME-Version: 1.0\r\n\
             Content-Transfer-Encoding: base64\r\n\
             Content-Type: application/octet-stream\r\n\
             \r\n\
             SGVsbG8sIHdvcmxkIQ=="
        );
    }

    #[test]
    fn test_quoted_printable_message() {
        let message = Message::text(QpMode::UnixText, Cursor::new("caf\u{e9}\n"));
        let out = drain(&mut message.into_stream(), 1);
        assert_eq!(
            out,
            "MIME-Version: 1.0\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\ncaf=C3=A9\r\n"
        );
    }

    #[test]
    fn test_custom_eol() {
        let mut message = Message::new(TransferEncoding::EightBit, Cursor::new("body"));
        message.set_eol("\n").set_header("To", "a@example.com");
        let out = drain(&mut message.into_stream(), 64);
        assert_eq!(
            out,
            "MIME-Version: 1.0\nContent-Transfer-Encoding: 8bit\nTo: a@example.com\n\nbody"
        );
    }

    #[test]
    fn test_empty_body() {
        let message = Message::empty(TransferEncoding::SevenBit);
        let out = drain(&mut message.into_stream(), 64);
        assert_eq!(out, "MIME-Version: 1.0\r\n\r\n");
    }

    #[test]
    fn test_headers_before_body_with_small_reads() {
        let message = Message::new(TransferEncoding::SevenBit, Cursor::new("xyz"))
            .with_header("Subject", "A fairly long subject line");
        let whole = drain(&mut message.into_stream(), 4096);

        let message = Message::new(TransferEncoding::SevenBit, Cursor::new("xyz"))
            .with_header("Subject", "A fairly long subject line");
        assert_eq!(drain(&mut message.into_stream(), 1), whole);
    }

    #[test]
    fn test_end_is_permanent() {
        let mut stream = Message::empty(TransferEncoding::SevenBit).into_stream();
        let _ = drain(&mut stream, 64);
        assert!(stream.is_done());

        let mut buf = [0u8; 8];
        for _ in 0..3 {
            assert_eq!(stream.pull(&mut buf).unwrap(), Chunk::end(0));
        }
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_part_rejects_binary() {
        let mut message = Message::new(TransferEncoding::Binary, Cursor::new("data"));
        message.is_part = true;
        let mut stream = message.into_stream();

        let mut buf = [0u8; 64];
        let err = stream.pull(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::PartInvalidTransferEncoding(TransferEncoding::Binary)
        ));
        assert!(matches!(stream.pull(&mut buf), Err(Error::Aborted)));
    }

    #[test]
    fn test_part_omits_mime_version() {
        let mut message = Message::new(TransferEncoding::SevenBit, Cursor::new("x"));
        message.is_part = true;
        let out = drain(&mut message.into_stream(), 64);
        assert_eq!(out, "\r\nx");
    }

    #[test]
    fn test_body_fault_after_headers() {
        let message = Message::new(TransferEncoding::SevenBit, BrokenReader);
        let mut stream = message.into_stream();

        let mut buf = [0u8; 64];
        let chunk = stream.pull(&mut buf).unwrap();
        assert_eq!(&buf[..chunk.written], b"MIME-Version: 1.0\r\n\r\n");
        assert!(!chunk.is_end());

        let err = stream.pull(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::ConnectionAborted));
        assert!(matches!(stream.pull(&mut buf), Err(Error::Aborted)));
    }

    #[test]
    fn test_read_impl() {
        let message = Message::new(TransferEncoding::SevenBit, Cursor::new("abc"));
        let mut out = String::new();
        message.into_stream().read_to_string(&mut out).unwrap();
        assert_eq!(out, "MIME-Version: 1.0\r\n\r\nabc");
    }

    #[test]
    fn test_read_impl_surfaces_fault() {
        let message = Message::new(TransferEncoding::SevenBit, BrokenReader);
        let mut out = Vec::new();
        let err = message.into_stream().read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(out, b"MIME-Version: 1.0\r\n\r\n");
    }
}
