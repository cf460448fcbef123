use apod_cache::Repository;
use apod_storage::BackendHandle;
use std::path::Path;

/// Orchestrates the cache: one storage backend rooted at the cache root, and
/// the metadata store that indexes it.
///
/// Holds no state of its own beyond the two handles, so it is cheap to clone
/// and safe to share between tasks.
#[derive(Clone)]
pub struct CacheManager {
    pub(crate) backend: BackendHandle,
    pub(crate) cache: Repository,
}

impl CacheManager {
    pub fn new(backend: BackendHandle, cache: Repository) -> Self {
        Self { backend, cache }
    }

    /// The cache root every stored file lives under.
    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    /// The metadata store this manager records artifacts in.
    pub fn repository(&self) -> &Repository {
        &self.cache
    }
}
