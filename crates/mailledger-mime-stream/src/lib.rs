//! # mailledger-mime-stream
//!
//! Streaming MIME message generation for outgoing email.
//!
//! A message (headers, a body reader, optional nested parts) is turned into
//! a stream that produces its RFC 2045/2046 wire form on demand, without
//! ever holding the whole message in memory.
//!
//! ## Features
//!
//! - **Pull-based**: callers drain the stream in chunks of any size
//! - **Transfer encodings**: Base64 (wrapped at 76 columns) and
//!   Quoted-Printable, encoded incrementally
//! - **Multipart**: nested multipart messages with generated boundaries
//! - **Header encoding**: RFC 2047 encoded words for non-ASCII phrases
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::io::{self, Cursor};
//! use mailledger_mime_stream::{Message, MultipartMessage, QpMode};
//! use mailledger_mime_stream::encoding::encode_word;
//!
//! let mut message = MultipartMessage::new("alternative");
//! message
//!     .set_header("Subject", encode_word("昨日の会議"))
//!     .set_header("To", format!("{} <tanaka@example.com>", encode_word("田中")));
//!
//! message.add_part(
//!     Message::text(QpMode::UnixText, Cursor::new("Hello, world!\n"))
//!         .with_header("Content-Type", "text/plain; charset=utf-8"),
//! );
//! message.add_part(
//!     Message::binary(std::fs::File::open("report.pdf")?)
//!         .with_header("Content-Type", "application/pdf"),
//! );
//!
//! let mut stream = message.into_stream();
//! io::copy(&mut stream, &mut io::stdout())?;
//! ```
//!
//! ## Pulling by hand
//!
//! Every stage implements [`ByteSource`], which reports whether more bytes
//! may follow:
//!
//! ```ignore
//! use mailledger_mime_stream::{ByteSource, Status};
//!
//! let mut buf = [0u8; 512];
//! loop {
//!     let chunk = stream.pull(&mut buf)?;
//!     sink.write_all(&buf[..chunk.written])?;
//!     if chunk.status == Status::End {
//!         break;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod boundary;
mod error;
mod header;
mod message;
mod multipart;
mod source;
mod stream;
mod transcode;

pub mod encoding;

pub use boundary::{BoundaryGenerator, DEFAULT_PREFIX};
pub use encoding::{Base64Encoder, Encode, QpMode, QuotedPrintableEncoder};
pub use error::{Error, Result};
pub use header::{Headers, canonical_name};
pub use message::{Message, TransferEncoding};
pub use multipart::{MultipartBuilder, MultipartMessage};
pub use source::{ByteSource, Chunk, ReaderSource, Status};
pub use stream::MessageStream;
pub use transcode::Transcoder;
