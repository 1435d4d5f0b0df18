//! Error types for MIME streaming operations.

use std::io;

use crate::message::TransferEncoding;

/// Result type alias for MIME streaming operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME streaming error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A multipart message declared a transfer encoding other than 7bit, 8bit or binary.
    #[error("multipart messages only support 7bit, 8bit or binary transfer encoding")]
    MultipartInvalidTransferEncoding,

    /// A part of a multipart message declared 8bit or binary transfer encoding.
    #[error("parts of a multipart message may not use {0} transfer encoding")]
    PartInvalidTransferEncoding(TransferEncoding),

    /// The body source failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream already reported a fault and cannot produce more bytes.
    #[error("stream aborted by an earlier fault")]
    Aborted,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => Self::other(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_passthrough() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_part_encoding_message() {
        let err = Error::PartInvalidTransferEncoding(TransferEncoding::Binary);
        assert_eq!(
            err.to_string(),
            "parts of a multipart message may not use binary transfer encoding"
        );

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::Other);
    }
}
