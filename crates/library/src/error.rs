//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a failed admission or verification.
///
/// None of these leave partial state behind: no row without a file, and no
/// file written by the failed call.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The source locator can't be turned into a safe local file name.
    #[display("invalid source locator")]
    InvalidLocator,
    /// The metadata store couldn't be read or written. Fatal for this run;
    /// the whole run may be retried later.
    #[display("metadata store unavailable")]
    StoreUnavailable,
    /// The artifact file couldn't be written to the cache root (disk full,
    /// permission denied, ...).
    #[display("failed to write artifact file")]
    StorageWriteFailed,
    /// A stored file couldn't be read back.
    #[display("failed to read from the cache root")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::StorageWriteFailed | Self::Storage)
    }
}
