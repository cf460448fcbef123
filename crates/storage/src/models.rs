//! Storage models.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Serialize;
use std::path::PathBuf;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const CAPTURE_DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// A single cached image and the metadata recorded about it.
///
/// Rows are created exactly once, the first time a fingerprint is seen, and
/// never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Calendar date the image represents (not the date it was downloaded).
    #[serde(with = "capture_date")]
    pub capture_date: Date,
    /// Human-meaningful name derived from the source locator. Descriptive
    /// only: it does **not** identify content, the fingerprint does.
    pub logical_name: String,
    /// Byte length of the stored file.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file content; the deduplication key.
    pub fingerprint: String,
    /// Absolute path of the stored file, always inside the cache root.
    pub stored_path: PathBuf,
}

/// Parse a capture date in `YYYY-MM-DD` form.
///
/// ```
/// use apod_storage::parse_capture_date;
/// assert!(parse_capture_date("2024-01-01").is_ok());
/// assert!(parse_capture_date("2024-02-30").is_err());
/// assert!(parse_capture_date("01/01/2024").is_err());
/// ```
pub fn parse_capture_date(value: impl AsRef<str>) -> Result<Date> {
    let value = value.as_ref();
    Date::parse(value, CAPTURE_DATE_FORMAT).or_raise(|| ErrorKind::InvalidDate(value.to_string()))
}

/// Format a capture date as `YYYY-MM-DD`.
pub fn format_capture_date(date: Date) -> String {
    // The format only contains components a `Date` always has.
    date.format(CAPTURE_DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}

mod capture_date {
    use serde::Serializer;
    use time::Date;

    pub(super) fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_capture_date(*date))
    }
}

/// File metadata returned by storage backends when listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// Hidden files (leading `.`) belong to the cache itself: the metadata
    /// store, its journal, and temporary files of in-flight writes.
    pub fn is_hidden(&self) -> bool {
        self.path
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')))
    }
}
