//! Command Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A command error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    /// Neither the command line nor the configuration names a cache root.
    #[display("no cache root given; pass one or set cache_root in the configuration")]
    MissingCacheRoot,
    /// The cache root isn't an existing directory.
    #[display("non-existent directory: {}", _0.display())]
    CacheRoot(#[error(not(source))] PathBuf),
    #[display("could not open the metadata store")]
    Cache,
    #[display("cache operation failed")]
    Library,
    #[display("could not fetch the picture of the day")]
    Remote,
    /// No picture is published for this date.
    #[display("no picture of the day for {_0}")]
    InvalidDate(#[error(not(source))] String),
    /// A local input file couldn't be read.
    #[display("could not read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
    #[display("could not write output")]
    Output,
    #[display("could not set the desktop background")]
    Wallpaper,
    #[display("setting the desktop background is not supported on this platform")]
    UnsupportedPlatform,
}

impl ErrorKind {
    /// Returns `true` if running the same command again later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache | Self::Remote)
    }
}
