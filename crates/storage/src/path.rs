//! Path validation and locator resolution.
//!
//! This module turns remote source locators into local file names and makes
//! sure that no path handed to a storage backend can escape the cache root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Number of fingerprint characters appended by [`disambiguate`].
const DISAMBIGUATION_LENGTH: usize = 12;

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use apod_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("2024/cat.jpg").is_ok());
/// assert!(validate_path("a/../cat.jpg").is_ok()); // (never leaves cache root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves cache root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./cat.jpg/").unwrap(),
///     Path::new("correct/cat.jpg")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Derive the logical name of an artifact from its source locator.
///
/// The logical name is the last `/`-separated segment of the locator, with
/// any query string or fragment removed. It doubles as the local file name,
/// so anything that isn't a plain, visible, single-component file name is
/// rejected with [`InvalidLocator`](ErrorKind::InvalidLocator). Hidden names
/// are reserved for the cache's own bookkeeping files (the metadata store
/// and in-flight temporary files).
///
/// ```
/// use apod_storage::logical_name;
/// let name = logical_name("https://apod.nasa.gov/apod/image/2401/cat.jpg?size=full").unwrap();
/// assert_eq!(name, "cat.jpg");
/// assert!(logical_name("https://apod.nasa.gov/apod/image/..").is_err());
/// ```
pub fn logical_name(locator: impl AsRef<str>) -> Result<String> {
    let locator = locator.as_ref();
    let without_fragment = locator.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    let name = without_query.rsplit('/').next().unwrap_or_default();
    let unsafe_name = name.is_empty()
        || name.starts_with('.')
        || name.chars().any(|c| c == '\\' || c.is_control())
        || !matches!(Path::new(name).components().collect::<Vec<_>>().as_slice(), [Component::Normal(_)]);
    if unsafe_name {
        exn::bail!(ErrorKind::InvalidLocator(locator.to_string()));
    }
    Ok(name.to_string())
}

/// Resolve the on-disk path for an artifact fetched from `locator`.
///
/// The result is always `cache_root` joined with the [`logical_name`], which
/// keeps every stored file directly under the cache root.
pub fn resolve_path(cache_root: impl AsRef<Path>, locator: impl AsRef<str>) -> Result<PathBuf> {
    let name = logical_name(locator)?;
    Ok(cache_root.as_ref().join(validate(&name)?))
}

/// Alternative file name for when `name` is already taken by different
/// content: the first few characters of the fingerprint are appended to the
/// file stem (`cat.jpg` becomes `cat-ba7816bf8f01.jpg`).
pub fn disambiguate(name: impl AsRef<Path>, fingerprint: &str) -> PathBuf {
    with_suffix(name.as_ref(), fingerprint.get(..DISAMBIGUATION_LENGTH).unwrap_or(fingerprint))
}

/// Last-resort file name carrying the whole fingerprint, for when the
/// [`disambiguate`]d name is taken as well.
pub fn disambiguate_fully(name: impl AsRef<Path>, fingerprint: &str) -> PathBuf {
    with_suffix(name.as_ref(), fingerprint)
}

fn with_suffix(name: &Path, suffix: &str) -> PathBuf {
    let stem = name.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match name.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    name.with_file_name(file_name)
}
