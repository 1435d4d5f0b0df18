//! MIME encoding primitives.
//!
//! Incremental Base64 and Quoted-Printable encoders (RFC 2045) used by the
//! transcoding stream, plus RFC 2047 encoded-word generation for header
//! phrases.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::GeneralPurpose;
use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use bytes::BytesMut;

/// Maximum length of an encoded line, excluding the line terminator.
pub const MAX_LINE_LENGTH: usize = 76;

/// Default end-of-line sequence.
pub const CRLF: &str = "\r\n";

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// An incremental byte encoder.
///
/// Input may arrive in arbitrary slices; the encoder withholds whatever it
/// cannot emit yet until more input arrives or [`Encode::finish`] is called.
pub trait Encode {
    /// Encodes `input`, appending the encoded bytes to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder cannot accept more input.
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()>;

    /// Flushes any withheld bytes. Called exactly once, after the last input.
    ///
    /// # Errors
    ///
    /// Returns an error if the withheld bytes cannot be flushed.
    fn finish(&mut self, out: &mut BytesMut) -> io::Result<()>;
}

static BASE64_ENGINE: GeneralPurpose = STANDARD;

/// Output of a [`Base64Encoder`], handed to its writer and drained after
/// every call.
#[derive(Debug, Clone, Default)]
struct EncodedSink(Arc<Mutex<BytesMut>>);

impl EncodedSink {
    fn drain_into(&self, out: &mut BytesMut) {
        let mut encoded = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        out.extend_from_slice(&encoded.split());
    }
}

impl Write for EncodedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Incremental Base64 encoder (standard alphabet, padded).
///
/// Produces unbroken Base64; line wrapping is done by the transcoder.
#[derive(Debug)]
pub struct Base64Encoder {
    writer: EncoderWriter<'static, GeneralPurpose, EncodedSink>,
    sink: EncodedSink,
}

impl Base64Encoder {
    /// Creates a new encoder.
    #[must_use]
    pub fn new() -> Self {
        let sink = EncodedSink::default();
        Self {
            writer: EncoderWriter::new(sink.clone(), &BASE64_ENGINE),
            sink,
        }
    }
}

impl Default for Base64Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encode for Base64Encoder {
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()> {
        self.writer.write_all(input)?;
        self.sink.drain_into(out);
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> io::Result<()> {
        self.writer.finish()?;
        self.sink.drain_into(out);
        Ok(())
    }
}

/// How raw line breaks are treated by the Quoted-Printable encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum QpMode {
    /// No line breaks; CR and LF are escaped like any other byte.
    Binary,
    /// LF is a line break.
    #[default]
    UnixText,
    /// CRLF is a line break; lone CR and LF are escaped.
    WindowsText,
    /// CR is a line break.
    MacText,
}

/// Incremental Quoted-Printable encoder (RFC 2045 section 6.7).
///
/// Lines are folded with soft breaks so that no line exceeds
/// [`MAX_LINE_LENGTH`] characters. Raw line breaks (per [`QpMode`]) become
/// hard breaks written with the configured end-of-line sequence, and
/// whitespace before a hard break is escaped.
#[derive(Debug)]
pub struct QuotedPrintableEncoder {
    mode: QpMode,
    eol: Vec<u8>,
    column: usize,
    pending_space: Option<u8>,
    pending_cr: bool,
}

impl QuotedPrintableEncoder {
    /// Creates an encoder writing line breaks as `eol`.
    #[must_use]
    pub fn new(mode: QpMode, eol: &str) -> Self {
        Self {
            mode,
            eol: eol.as_bytes().to_vec(),
            column: 0,
            pending_space: None,
            pending_cr: false,
        }
    }

    fn push(&mut self, byte: u8, out: &mut BytesMut) {
        if self.pending_cr {
            self.pending_cr = false;
            if byte == b'\n' {
                self.hard_break(out);
                return;
            }
            self.flush_space(false, out);
            self.escaped(b'\r', out);
        }

        match (self.mode, byte) {
            (QpMode::WindowsText, b'\r') => self.pending_cr = true,
            (QpMode::UnixText, b'\n') | (QpMode::MacText, b'\r') => self.hard_break(out),
            (_, b' ' | b'\t') => {
                self.flush_space(false, out);
                self.pending_space = Some(byte);
            }
            (_, b'!'..=b'<' | b'>'..=b'~') => {
                self.flush_space(false, out);
                self.token(&[byte], out);
            }
            _ => {
                self.flush_space(false, out);
                self.escaped(byte, out);
            }
        }
    }

    fn hard_break(&mut self, out: &mut BytesMut) {
        self.flush_space(true, out);
        out.extend_from_slice(&self.eol);
        self.column = 0;
    }

    /// Writes held whitespace, escaped if it ends a line.
    fn flush_space(&mut self, line_end: bool, out: &mut BytesMut) {
        if let Some(space) = self.pending_space.take() {
            if line_end {
                self.escaped(space, out);
            } else {
                self.token(&[space], out);
            }
        }
    }

    fn escaped(&mut self, byte: u8, out: &mut BytesMut) {
        let token = [
            b'=',
            HEX[usize::from(byte >> 4)],
            HEX[usize::from(byte & 0x0f)],
        ];
        self.token(&token, out);
    }

    fn token(&mut self, token: &[u8], out: &mut BytesMut) {
        // Leave room for the trailing '=' of a soft break
        if self.column + token.len() > MAX_LINE_LENGTH - 1 {
            out.extend_from_slice(b"=");
            out.extend_from_slice(&self.eol);
            self.column = 0;
        }
        out.extend_from_slice(token);
        self.column += token.len();
    }
}

impl Encode for QuotedPrintableEncoder {
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()> {
        for &byte in input {
            self.push(byte, out);
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> io::Result<()> {
        if self.pending_cr {
            self.pending_cr = false;
            self.flush_space(false, out);
            self.escaped(b'\r', out);
        }
        self.flush_space(true, out);
        Ok(())
    }
}

const ACCEPTABLE_SPECIALS: &[u8] = b"!*+-/=";

fn is_acceptable(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || ACCEPTABLE_SPECIALS.contains(&byte)
}

/// Encodes a header phrase as an RFC 2047 encoded word if needed.
///
/// The phrase is returned unchanged when every byte is alphanumeric or one
/// of `!*+-/=`. Otherwise it is written as `=?UTF-8?Q?...?=`, with spaces as
/// `_` and every other unacceptable byte as `=XX`.
///
/// Only encode phrases, not whole structured values:
///
/// ```ignore
/// use mailledger_mime_stream::encoding::encode_word;
///
/// let to = format!("{} <tanaka@example.com>", encode_word("田中"));
/// assert_eq!(to, "=?UTF-8?Q?=E7=94=B0=E4=B8=AD?= <tanaka@example.com>");
/// ```
#[must_use]
pub fn encode_word(phrase: &str) -> String {
    if phrase.bytes().all(is_acceptable) {
        return phrase.to_string();
    }

    let mut result = String::from("=?UTF-8?Q?");
    for byte in phrase.bytes() {
        if is_acceptable(byte) {
            result.push(char::from(byte));
        } else if byte == b' ' {
            result.push('_');
        } else {
            let _ = write!(result, "={byte:02X}");
        }
    }
    result.push_str("?=");
    result
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

    fn encode_all<E: Encode>(mut encoder: E, chunks: &[&[u8]]) -> String {
        let mut out = BytesMut::new();
        for chunk in chunks {
            encoder.encode(chunk, &mut out).unwrap();
        }
        encoder.finish(&mut out).unwrap();
        String::from_utf8(out.to_vec()).unwrap()
    }

    fn qp(mode: QpMode, input: &str) -> String {
        encode_all(QuotedPrintableEncoder::new(mode, CRLF), &[input.as_bytes()])
    }

    #[test]
    fn test_acceptable_bytes() {
        assert!(is_acceptable(b'='));
        assert!(is_acceptable(b'Z'));
        assert!(!is_acceptable(b'?'));
        assert!(!is_acceptable(b' '));
    }

    #[test]
    fn test_base64_single_chunk() {
        let encoded = encode_all(Base64Encoder::new(), &[b"Hello, World!"]);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_base64_split_chunks() {
        let encoded = encode_all(
            Base64Encoder::new(),
            &[b"H", b"el", b"", b"lo, ", b"World", b"!"],
        );
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_base64_withholds_partial_group() {
        let mut encoder = Base64Encoder::new();
        let mut out = BytesMut::new();
        encoder.encode(b"ab", &mut out).unwrap();
        assert!(out.is_empty());
        encoder.encode(b"c", &mut out).unwrap();
        assert_eq!(&out[..], b"YWJj");
        encoder.finish(&mut out).unwrap();
        assert_eq!(&out[..], b"YWJj");
    }

    #[test]
    fn test_base64_empty() {
        assert_eq!(encode_all(Base64Encoder::new(), &[]), "");
    }

    #[test]
    fn test_quoted_printable_plain() {
        assert_eq!(qp(QpMode::UnixText, "Hello, World!"), "Hello, World!");
        assert_eq!(qp(QpMode::UnixText, "a=b"), "a=3Db");
        assert_eq!(qp(QpMode::UnixText, "Héllo"), "H=C3=A9llo");
    }

    #[test]
    fn test_quoted_printable_unix_line_breaks() {
        assert_eq!(qp(QpMode::UnixText, "one\ntwo\n\nend"), "one\r\ntwo\r\n\r\nend");
        assert_eq!(qp(QpMode::UnixText, "cr\rhere"), "cr=0Dhere");
    }

    #[test]
    fn test_quoted_printable_windows_line_breaks() {
        assert_eq!(qp(QpMode::WindowsText, "one\r\ntwo"), "one\r\ntwo");
        assert_eq!(qp(QpMode::WindowsText, "lone\rcr"), "lone=0Dcr");
        assert_eq!(qp(QpMode::WindowsText, "lone\nlf"), "lone=0Alf");
        assert_eq!(qp(QpMode::WindowsText, "end\r"), "end=0D");
    }

    #[test]
    fn test_quoted_printable_windows_break_across_chunks() {
        let encoded = encode_all(
            QuotedPrintableEncoder::new(QpMode::WindowsText, CRLF),
            &[b"one \r", b"\ntwo"],
        );
        assert_eq!(encoded, "one=20\r\ntwo");
    }

    #[test]
    fn test_quoted_printable_mac_line_breaks() {
        assert_eq!(qp(QpMode::MacText, "one\rtwo"), "one\r\ntwo");
        assert_eq!(qp(QpMode::MacText, "one\ntwo"), "one=0Atwo");
    }

    #[test]
    fn test_quoted_printable_binary() {
        assert_eq!(qp(QpMode::Binary, "a\r\nb"), "a=0D=0Ab");
    }

    #[test]
    fn test_quoted_printable_trailing_whitespace() {
        assert_eq!(qp(QpMode::UnixText, "a \nb"), "a=20\r\nb");
        assert_eq!(qp(QpMode::UnixText, "a\t\nb"), "a=09\r\nb");
        assert_eq!(qp(QpMode::UnixText, "end "), "end=20");
        assert_eq!(qp(QpMode::UnixText, "a  b"), "a  b");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let input = "a".repeat(80);
        let expected = format!("{}=\r\n{}", "a".repeat(75), "a".repeat(5));
        assert_eq!(qp(QpMode::UnixText, &input), expected);
    }

    #[test]
    fn test_quoted_printable_escape_not_split() {
        let input = format!("{}é", "a".repeat(74));
        let expected = format!("{}=\r\n=C3=A9", "a".repeat(74));
        assert_eq!(qp(QpMode::UnixText, &input), expected);
    }

    #[test]
    fn test_quoted_printable_custom_eol() {
        let encoded = encode_all(
            QuotedPrintableEncoder::new(QpMode::UnixText, "\n"),
            &[b"one\ntwo"],
        );
        assert_eq!(encoded, "one\ntwo");
    }

    #[test]
    fn test_encode_word() {
        let cases = [
            ("test", "test"),
            ("Bonjour à tous!", "=?UTF-8?Q?Bonjour_=C3=A0_tous!?="),
            ("Right?", "=?UTF-8?Q?Right=3F?="),
            ("田中", "=?UTF-8?Q?=E7=94=B0=E4=B8=AD?="),
        ];
        for (decoded, encoded) in cases {
            assert_eq!(encode_word(decoded), encoded, "encoding {decoded:?}");
        }
    }

    #[test]
    fn test_encode_word_empty() {
        assert_eq!(encode_word(""), "");
    }
}
