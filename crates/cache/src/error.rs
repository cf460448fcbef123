//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The store file could not be opened or created.
    #[display("metadata store unavailable")]
    Unavailable,
    /// The embedded schema could not be applied. Only ever seen as the cause
    /// of an [`Unavailable`](Self::Unavailable) error.
    #[display("database migration error")]
    Migration,
    /// A query or commit failed against an open store.
    #[display("database error")]
    Database,
    /// A row with this fingerprint already exists.
    #[display("duplicate fingerprint: {_0}")]
    DuplicateFingerprint(#[error(not(source))] String),
    /// Serialization/deserialization error.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
