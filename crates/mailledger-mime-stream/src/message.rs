//! Outgoing MIME message description.

use std::fmt;
use std::io::Read;

use crate::encoding::{CRLF, QpMode};
use crate::header::Headers;
use crate::stream::MessageStream;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "7bit"))]
    SevenBit,
    /// 8-bit data with line structure.
    #[cfg_attr(feature = "serde", serde(rename = "8bit"))]
    EightBit,
    /// Binary (no encoding).
    #[cfg_attr(feature = "serde", serde(rename = "binary"))]
    Binary,
    /// Base64 encoding.
    #[cfg_attr(feature = "serde", serde(rename = "base64"))]
    Base64,
    /// Quoted-Printable encoding.
    #[cfg_attr(feature = "serde", serde(rename = "quoted-printable"))]
    QuotedPrintable,
}

impl TransferEncoding {
    /// Returns the header token for this encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Binary => "binary",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
        }
    }

    /// Returns true if a multipart body may use this encoding.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::SevenBit | Self::EightBit | Self::Binary)
    }

    /// Returns true if a part of a multipart message may use this encoding.
    #[must_use]
    pub const fn is_allowed_in_part(self) -> bool {
        !matches!(self, Self::EightBit | Self::Binary)
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an outgoing message.
pub(crate) enum Body {
    Empty,
    Reader(Box<dyn Read + Send>),
    Multipart {
        boundary: String,
        parts: Vec<Message>,
    },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Multipart { boundary, parts } => f
                .debug_struct("Multipart")
                .field("boundary", boundary)
                .field("parts", parts)
                .finish(),
        }
    }
}

/// An outgoing MIME message (or part of a multipart message).
///
/// A message is configured first, then turned into a [`MessageStream`] with
/// [`Message::into_stream`], which produces its wire form on demand. The
/// body is never read until the stream is pulled.
///
/// ```ignore
/// use std::io::{self, Cursor};
/// use mailledger_mime_stream::{Message, QpMode, encoding::encode_word};
///
/// let mut message = Message::text(QpMode::UnixText, Cursor::new("Hello!\n"));
/// message
///     .set_header("Content-Type", "text/plain; charset=utf-8")
///     .set_header("Subject", encode_word("昨日の会議"));
///
/// io::copy(&mut message.into_stream(), &mut io::stdout())?;
/// ```
#[derive(Debug)]
pub struct Message {
    pub(crate) encoding: TransferEncoding,
    pub(crate) qp_mode: QpMode,
    pub(crate) headers: Headers,
    pub(crate) body: Body,
    pub(crate) is_part: bool,
    pub(crate) eol: String,
}

impl Message {
    fn with_body(encoding: TransferEncoding, body: Body) -> Self {
        Self {
            encoding,
            qp_mode: QpMode::default(),
            headers: Headers::new(),
            body,
            is_part: false,
            eol: CRLF.to_string(),
        }
    }

    /// Creates a message with the given transfer encoding and body.
    ///
    /// For 7bit, 8bit and binary it is up to the caller to make sure the body
    /// conforms to the encoding and never contains an enclosing multipart
    /// boundary.
    pub fn new(encoding: TransferEncoding, body: impl Read + Send + 'static) -> Self {
        Self::with_body(encoding, Body::Reader(Box::new(body)))
    }

    /// Creates a message without a body.
    #[must_use]
    pub fn empty(encoding: TransferEncoding) -> Self {
        Self::with_body(encoding, Body::Empty)
    }

    /// Creates a Quoted-Printable encoded message; use this for `text/*` bodies.
    pub fn text(mode: QpMode, body: impl Read + Send + 'static) -> Self {
        let mut message = Self::new(TransferEncoding::QuotedPrintable, body);
        message.qp_mode = mode;
        message
    }

    /// Creates a Base64 encoded message; use this for non-text bodies.
    pub fn binary(body: impl Read + Send + 'static) -> Self {
        Self::new(TransferEncoding::Base64, body)
    }

    pub(crate) fn multipart(boundary: String, parts: Vec<Self>) -> Self {
        Self::with_body(TransferEncoding::SevenBit, Body::Multipart { boundary, parts })
    }

    /// Sets a header. The value is written verbatim; see
    /// [`encode_word`](crate::encoding::encode_word) for non-ASCII phrases.
    ///
    /// `MIME-Version` and `Content-Transfer-Encoding` are generated by the
    /// stream and are ignored if set here.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Sets a header, builder style.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Gets a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the transfer encoding.
    #[must_use]
    pub const fn transfer_encoding(&self) -> TransferEncoding {
        self.encoding
    }

    /// Sets the transfer encoding.
    pub fn set_transfer_encoding(&mut self, encoding: TransferEncoding) -> &mut Self {
        self.encoding = encoding;
        self
    }

    /// Returns the line break handling used for Quoted-Printable bodies.
    #[must_use]
    pub const fn qp_mode(&self) -> QpMode {
        self.qp_mode
    }

    /// Sets the line break handling used for Quoted-Printable bodies.
    pub fn set_qp_mode(&mut self, mode: QpMode) -> &mut Self {
        self.qp_mode = mode;
        self
    }

    /// Returns the end-of-line sequence.
    #[must_use]
    pub fn eol(&self) -> &str {
        &self.eol
    }

    /// Sets the end-of-line sequence used for headers, encoded line breaks
    /// and boundaries. Parts of a multipart message inherit the sequence of
    /// their parent when they are streamed.
    pub fn set_eol(&mut self, eol: impl Into<String>) -> &mut Self {
        self.eol = eol.into();
        self
    }

    /// Returns true if this message is a part of a multipart message.
    #[must_use]
    pub const fn is_part(&self) -> bool {
        self.is_part
    }

    /// Returns true if this message has a multipart body.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart { .. })
    }

    /// Turns the message into a stream producing its MIME representation.
    #[must_use]
    pub fn into_stream(self) -> MessageStream {
        MessageStream::new(self)
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

    #[test]
    fn test_transfer_encoding_display() {
        assert_eq!(TransferEncoding::EightBit.to_string(), "8bit");
        assert_eq!(
            TransferEncoding::QuotedPrintable.to_string(),
            "quoted-printable"
        );
    }

    #[test]
    fn test_transfer_encoding_rules() {
        assert!(TransferEncoding::Binary.is_structural());
        assert!(!TransferEncoding::Base64.is_structural());
        assert!(TransferEncoding::Base64.is_allowed_in_part());
        assert!(!TransferEncoding::EightBit.is_allowed_in_part());
    }

    #[test]
    fn test_text_message_defaults() {
        let message = Message::text(QpMode::WindowsText, Cursor::new("hi"));
        assert_eq!(message.transfer_encoding(), TransferEncoding::QuotedPrintable);
        assert_eq!(message.qp_mode(), QpMode::WindowsText);
        assert_eq!(message.eol(), "\r\n");
        assert!(!message.is_part());
        assert!(!message.is_multipart());
    }

    #[test]
    fn test_binary_message_headers() {
        let mut message = Message::binary(Cursor::new(vec![0u8, 1, 2]));
        message
            .set_header("content-type", "application/octet-stream")
            .set_eol("\n");

        assert_eq!(message.transfer_encoding(), TransferEncoding::Base64);
        assert_eq!(message.header("Content-Type"), Some("application/octet-stream"));
        assert_eq!(message.eol(), "\n");
    }

    #[test]
    fn test_with_header() {
        let message = Message::empty(TransferEncoding::SevenBit)
            .with_header("subject", "Hi")
            .with_header("to", "bob@example.com");
        let names: Vec<_> = message.headers().iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Subject", "To"]);
    }
}
