//! Storage types and utilities for the APOD image cache.
//!
//! Everything in here is independent of the metadata store: the [`Artifact`]
//! model shared by every other crate, the content [`fingerprint`] that acts
//! as the deduplication key, the [`resolve_path`] rules that turn a remote
//! locator into a safe local file name, and the [`StorageBackend`] that
//! actually puts bytes on disk.

pub mod backend;
pub mod error;
mod hash;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::hash::{FINGERPRINT_LENGTH, fingerprint};
pub use crate::models::{Artifact, FileInfo, format_capture_date, parse_capture_date};
pub use crate::path::{disambiguate, disambiguate_fully, logical_name, resolve_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
