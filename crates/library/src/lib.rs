//! Content-addressed image cache.
//!
//! The [`CacheManager`] ties the [storage backend](apod_storage) and the
//! [metadata store](apod_cache) together. Every freshly downloaded image is
//! offered to it through [`CacheManager::admit`], which decides by content
//! fingerprint whether the image is new (write the file, record a row) or a
//! duplicate (touch nothing). [`CacheManager::verify`] checks after the fact
//! that the store and the files on disk still agree.

mod admit;
pub mod error;
mod manager;
mod verify;

pub use crate::admit::{AdmitResult, Status};
pub use crate::manager::CacheManager;
pub use crate::verify::{Problem, VerifyReport};
