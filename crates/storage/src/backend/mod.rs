//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the interface the cache
//! uses to put artifact files on disk, read them back, and clean up after
//! itself when an admission has to be rolled back.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// It's a glorified CRUD interface rooted at the cache root, but in ✨Rust✨
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use apod_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_cached_image(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("cat.jpg");
///     if backend.exists(path).await? {
///         Ok(backend.read(path).await?.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Absolute root directory every relative path is resolved against.
    fn root(&self) -> &Path;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Returns metadata for all files in the storage backend as a
    /// [`Stream`], yielding results incrementally. Hidden bookkeeping files
    /// are included; filter them with [`FileInfo::is_hidden`] if needed.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, replacing any existing file.
    ///
    /// Writes are all-or-nothing: readers observe either the previous state
    /// of `path` or the complete new contents, never a partially-written
    /// file, and a failed write leaves nothing behind.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Write a new file. Same guarantees as [`write`](Self::write), except
    /// that an existing file at `path` is never replaced: the call fails with
    /// [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) instead.
    async fn create(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;
}
