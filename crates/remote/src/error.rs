//! Remote Error Types

use derive_more::{Display, Error};

/// A remote API error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The request couldn't be built or sent, or the body couldn't be read.
    #[display("request failed")]
    Request,
    /// The server answered with a non-success status.
    #[display("server responded with status {_0}")]
    Status(#[error(not(source))] u16),
    /// The response wasn't the expected JSON document.
    #[display("failed to decode response")]
    Decode,
    /// The picture of the day has no downloadable image (e.g. an embedded
    /// interactive page, or a video without a thumbnail).
    #[display("unsupported media type: {_0}")]
    UnsupportedMedia(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
