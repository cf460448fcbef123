//! SQLite metadata store for the image cache.
//!
//! This crate provides the durable index of every artifact that has been
//! materialized in the cache root: one row per distinct image content, keyed
//! by its fingerprint. The index and the files on disk are kept consistent by
//! the caller (`apod-library`); this crate guarantees that no two rows ever
//! share a fingerprint and that inserts are all-or-nothing.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::{DATABASE_FILE_NAME, Database};
pub use crate::repo::Repository;
