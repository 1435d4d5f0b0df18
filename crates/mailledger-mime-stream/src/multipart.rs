//! Multipart messages and their streams.

use std::vec;

use bytes::{Buf, BytesMut};

use crate::boundary::BoundaryGenerator;
use crate::error::{Error, Result};
use crate::message::{Message, TransferEncoding};
use crate::source::{ByteSource, Chunk};
use crate::stream::MessageStream;

/// A message whose body is a sequence of other messages.
///
/// Parts are transmitted in the order they were added. The message gets a
/// `Content-Type: multipart/<subtype>; boundary="..."` header at
/// construction and 7bit transfer encoding.
///
/// ```ignore
/// use std::io::Cursor;
/// use mailledger_mime_stream::{Message, MultipartMessage, QpMode};
///
/// let mut message = MultipartMessage::new("alternative");
/// message.set_header("Subject", "Hello");
/// message.add_part(
///     Message::text(QpMode::UnixText, Cursor::new("Hello, world!"))
///         .with_header("Content-Type", "text/plain"),
/// );
/// let stream = message.into_stream();
/// ```
#[derive(Debug)]
pub struct MultipartMessage {
    message: Message,
    boundary: String,
    parts: Vec<Message>,
}

impl MultipartMessage {
    /// Creates a multipart message with a boundary from the shared generator.
    #[must_use]
    pub fn new(subtype: &str) -> Self {
        Self::builder(subtype).build()
    }

    /// Creates a builder for a multipart message.
    #[must_use]
    pub fn builder(subtype: &str) -> MultipartBuilder<'static> {
        MultipartBuilder::new(subtype)
    }

    /// Returns the boundary.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Returns the parts added so far.
    #[must_use]
    pub fn parts(&self) -> &[Message] {
        &self.parts
    }

    /// Appends a part. The part inherits this message's end-of-line
    /// sequence when it is streamed.
    pub fn add_part(&mut self, part: impl Into<Message>) -> &mut Self {
        let mut part = part.into();
        part.is_part = true;
        self.parts.push(part);
        self
    }

    /// Sets a header; see [`Message::set_header`].
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.message.set_header(name, value);
        self
    }

    /// Sets a header, builder style.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.message.set_header(name, value);
        self
    }

    /// Gets a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.message.header(name)
    }

    /// Returns the transfer encoding.
    #[must_use]
    pub const fn transfer_encoding(&self) -> TransferEncoding {
        self.message.transfer_encoding()
    }

    /// Sets the transfer encoding. Only 7bit, 8bit and binary can be streamed.
    pub fn set_transfer_encoding(&mut self, encoding: TransferEncoding) -> &mut Self {
        self.message.set_transfer_encoding(encoding);
        self
    }

    /// Sets the end-of-line sequence for this message and all its parts.
    pub fn set_eol(&mut self, eol: impl Into<String>) -> &mut Self {
        self.message.set_eol(eol);
        self
    }

    /// Turns the message into a stream producing its MIME representation.
    #[must_use]
    pub fn into_stream(self) -> MessageStream {
        Message::from(self).into_stream()
    }
}

impl From<MultipartMessage> for Message {
    fn from(multipart: MultipartMessage) -> Self {
        let MultipartMessage {
            message,
            boundary,
            parts,
        } = multipart;

        let mut converted = Self::multipart(boundary, parts);
        converted.encoding = message.encoding;
        converted.headers = message.headers;
        converted.eol = message.eol;
        converted.is_part = message.is_part;
        converted
    }
}

/// Builder for [`MultipartMessage`].
#[derive(Debug, Clone)]
pub struct MultipartBuilder<'a> {
    subtype: String,
    boundary: Option<String>,
    params: Vec<(String, String)>,
    generator: Option<&'a BoundaryGenerator>,
}

impl<'a> MultipartBuilder<'a> {
    /// Creates a builder for `multipart/<subtype>`.
    #[must_use]
    pub fn new(subtype: &str) -> Self {
        Self {
            subtype: subtype.to_string(),
            boundary: None,
            params: Vec::new(),
            generator: None,
        }
    }

    /// Uses an explicit boundary instead of a generated one.
    ///
    /// The caller must make sure it is valid and not used anywhere else. An
    /// empty boundary means "generate one".
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        self.boundary = (!boundary.is_empty()).then_some(boundary);
        self
    }

    /// Adds a `Content-Type` parameter, such as `type` for multipart/related.
    ///
    /// The value is written verbatim; quoting is up to the caller.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Draws the boundary from `generator` instead of the shared one.
    #[must_use]
    pub fn generator<'b>(self, generator: &'b BoundaryGenerator) -> MultipartBuilder<'b> {
        MultipartBuilder {
            subtype: self.subtype,
            boundary: self.boundary,
            params: self.params,
            generator: Some(generator),
        }
    }

    /// Builds the multipart message.
    #[must_use]
    pub fn build(self) -> MultipartMessage {
        let boundary = match (self.boundary, self.generator) {
            (Some(boundary), _) => boundary,
            (None, Some(generator)) => generator.next(),
            (None, None) => BoundaryGenerator::shared().next(),
        };

        let mut content_type = format!("multipart/{}; boundary=\"{boundary}\"", self.subtype);
        for (name, value) in &self.params {
            content_type.push_str("; ");
            content_type.push_str(name);
            content_type.push('=');
            content_type.push_str(value);
        }

        let mut message = Message::empty(TransferEncoding::SevenBit);
        message.set_header("Content-Type", content_type);

        MultipartMessage {
            message,
            boundary,
            parts: Vec::new(),
        }
    }
}

enum State {
    Start,
    InPart(Box<MessageStream>),
    Closing,
    Done,
    Aborted,
}

/// Body stream of a multipart message: boundary lines interleaved with
/// the streams of its parts.
pub(crate) struct MultipartStream {
    boundary: String,
    eol: String,
    parts: vec::IntoIter<Message>,
    /// Boundary bytes not yet handed out; always drained before part bytes.
    structural: BytesMut,
    state: State,
    fault: Option<Error>,
}

impl MultipartStream {
    pub(crate) fn new(boundary: String, parts: Vec<Message>, eol: String) -> Self {
        Self {
            boundary,
            eol,
            parts: parts.into_iter(),
            structural: BytesMut::new(),
            state: State::Start,
            fault: None,
        }
    }

    fn put(&mut self, s: &str) {
        self.structural.extend_from_slice(s.as_bytes());
    }

    fn put_delimiter(&mut self) {
        let delimiter = format!("{}--{}", self.eol, self.boundary);
        self.put(&delimiter);
    }

    fn put_close(&mut self) {
        let close = format!("--{}", self.eol);
        self.put(&close);
        self.state = State::Closing;
    }

    /// Starts streaming the next part; the part inherits this stream's EOL.
    fn open_part(&mut self, mut part: Message) {
        let eol = self.eol.clone();
        self.put(&eol);
        part.eol = eol;
        part.is_part = true;
        tracing::debug!(
            boundary = %self.boundary,
            remaining = self.parts.len(),
            "streaming multipart part"
        );
        self.state = State::InPart(Box::new(part.into_stream()));
    }

    fn begin(&mut self) {
        let opening = format!("--{}", self.boundary);
        self.put(&opening);
        match self.parts.next() {
            Some(part) => self.open_part(part),
            None => {
                let eol = self.eol.clone();
                self.put(&eol);
                self.state = State::Closing;
            }
        }
    }

    fn finish_part(&mut self) {
        self.put_delimiter();
        match self.parts.next() {
            Some(part) => self.open_part(part),
            None => self.put_close(),
        }
    }
}

impl ByteSource for MultipartStream {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Chunk> {
        if let Some(e) = self.fault.take() {
            self.state = State::Aborted;
            return Err(e);
        }

        let mut written = 0;
        loop {
            if !self.structural.is_empty() {
                if written == buf.len() {
                    break;
                }
                let take = self.structural.len().min(buf.len() - written);
                buf[written..written + take].copy_from_slice(&self.structural[..take]);
                self.structural.advance(take);
                written += take;
                continue;
            }

            match &mut self.state {
                State::Start => self.begin(),
                State::InPart(part) => {
                    if written == buf.len() {
                        break;
                    }
                    match part.pull(&mut buf[written..]) {
                        Ok(chunk) => {
                            written += chunk.written;
                            if chunk.is_end() {
                                self.finish_part();
                            } else if chunk.written == 0 {
                                break;
                            }
                        }
                        Err(e) if written > 0 => {
                            self.fault = Some(e);
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, boundary = %self.boundary, "multipart part failed");
                            self.state = State::Aborted;
                            return Err(e);
                        }
                    }
                }
                State::Closing => self.state = State::Done,
                State::Done => break,
                State::Aborted => return Err(Error::Aborted),
            }
        }

        if matches!(self.state, State::Done) {
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
    use std::io::Cursor;

    fn part(body: &str) -> Message {
        Message::new(TransferEncoding::SevenBit, Cursor::new(body.to_string()))
    }

    fn drain<S: ByteSource>(stream: &mut S, chunk_size: usize) -> String {
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

    #[test]
    fn test_builder_content_type() {
        let message = MultipartMessage::builder("related")
            .boundary("XYZ")
            .param("type", "\"text/html\"")
            .build();
        assert_eq!(message.boundary(), "XYZ");
        assert_eq!(
            message.header("Content-Type"),
            Some("multipart/related; boundary=\"XYZ\"; type=\"text/html\"")
        );
        assert_eq!(message.transfer_encoding(), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_builder_uses_generator() {
        let generator = BoundaryGenerator::new("Unit");
        let first = MultipartMessage::builder("mixed").generator(&generator).build();
        let second = MultipartMessage::builder("mixed")
            .boundary("")
            .generator(&generator)
            .build();
        assert_eq!(first.boundary(), "==UnitBoundary:0.");
        assert_eq!(second.boundary(), "==UnitBoundary:1.");
    }

    #[test]
    fn test_shared_generator_default() {
        let message = MultipartMessage::new("mixed");
        assert!(message.boundary().starts_with("==MailledgerBoundary:"));
        assert!(message.boundary().ends_with('.'));
    }

    #[test]
    fn test_add_part_marks_child() {
        let mut message = MultipartMessage::builder("mixed").boundary("b").build();
        message.add_part(part("one"));
        assert_eq!(message.parts().len(), 1);
        assert!(message.parts()[0].is_part());
    }

    #[test]
    fn test_stream_layout() {
        let mut stream = MultipartStream::new(
            "b".to_string(),
            vec![part("one"), part("two")],
            "\r\n".to_string(),
        );
        assert_eq!(
            drain(&mut stream, 1024),
            "--b\r\n\r\none\r\n--b\r\n\r\ntwo\r\n--b--\r\n"
        );
    }

    #[test]
    fn test_stream_without_parts() {
        let mut stream = MultipartStream::new("b".to_string(), Vec::new(), "\r\n".to_string());
        assert_eq!(drain(&mut stream, 3), "--b\r\n");
    }

    #[test]
    fn test_stream_inherits_eol() {
        let mut message = MultipartMessage::builder("mixed").boundary("b").build();
        message.set_eol("\n");
        message.add_part(part("x"));
        assert_eq!(
            drain(&mut message.into_stream(), 1),
            "MIME-Version: 1.0\nContent-Type: multipart/mixed; boundary=\"b\"\n\n--b\n\nx\n--b--\n"
        );
    }

    #[test]
    fn test_multipart_rejects_base64() {
        let mut message = MultipartMessage::builder("mixed").boundary("b").build();
        message.add_part(part("x"));
        message.set_transfer_encoding(TransferEncoding::Base64);

        let mut stream = message.into_stream();
        let mut buf = [0u8; 64];
        assert!(matches!(
            stream.pull(&mut buf),
            Err(Error::MultipartInvalidTransferEncoding)
        ));
    }

    #[test]
    fn test_end_is_permanent() {
        let mut stream = MultipartStream::new("b".to_string(), Vec::new(), "\r\n".to_string());
        let _ = drain(&mut stream, 64);
        let mut buf = [0u8; 8];
        assert_eq!(stream.pull(&mut buf).unwrap(), Chunk::end(0));
        assert_eq!(stream.pull(&mut buf).unwrap(), Chunk::end(0));
    }
}
