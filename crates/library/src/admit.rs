use crate::CacheManager;
use crate::error::{ErrorKind, Result};
use apod_cache::error::ErrorKind as CacheErrorKind;
use apod_storage::error::ErrorKind as StorageErrorKind;
use apod_storage::{Artifact, disambiguate, disambiguate_fully, fingerprint, logical_name, resolve_path};
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use serde::Serialize;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::{Span, field, instrument};

/// Whether an admission changed the cache.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// New content: the file was placed in the cache root and a row recorded.
    #[display("stored")]
    Stored,
    /// Content already known. Nothing was written and nothing was recorded.
    #[display("skipped")]
    Skipped,
}

/// The outcome of (successfully) admitting a single image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmitResult {
    pub status: Status,
    /// For [`Status::Stored`], the row that was just recorded. For
    /// [`Status::Skipped`], the row that already held this content, so the
    /// caller always learns where the bytes live on disk.
    pub artifact: Artifact,
}

/// Where the bytes of an admission ended up, relative to the cache root.
#[derive(Debug)]
pub(crate) struct Placement {
    path: PathBuf,
    /// `false` when an identical file was already sitting at `path`; it isn't
    /// ours to remove on rollback.
    written: bool,
}

impl CacheManager {
    /// Offers freshly fetched image bytes to the cache.
    ///
    /// The content fingerprint decides everything: known content is
    /// [skipped](Status::Skipped) without any write, new content is written
    /// under a name derived from `locator` and then recorded. Two concurrent
    /// admissions of the same content converge on a single row; the loser
    /// reports [`Status::Skipped`] and removes any file only it wrote.
    ///
    /// If the preferred file name is already taken by different content, the
    /// image is stored under a name suffixed with its fingerprint instead of
    /// overwriting a file another row may point at.
    ///
    /// # Errors
    /// - [`ErrorKind::InvalidLocator`] if `locator` yields no safe file name.
    ///   Nothing is written.
    /// - [`ErrorKind::StorageWriteFailed`] if the file can't be written. No
    ///   row is recorded.
    /// - [`ErrorKind::StoreUnavailable`] if the metadata store fails. Any file
    ///   written by this call is removed again.
    #[instrument(skip_all, fields(locator = %locator, capture_date = %capture_date, size = bytes.len(), fingerprint = field::Empty))]
    pub async fn admit(&self, bytes: &[u8], locator: &str, capture_date: Date) -> Result<AdmitResult> {
        let fingerprint = fingerprint(bytes);
        Span::current().record("fingerprint", fingerprint.as_str());

        if self.cache.contains(&fingerprint).await.or_raise(|| ErrorKind::StoreUnavailable)? {
            let existing = self.existing(&fingerprint).await?;
            tracing::info!(path = %existing.stored_path.display(), "content already cached; skipping");
            return Ok(AdmitResult { status: Status::Skipped, artifact: existing });
        }

        let logical_name = logical_name(locator).or_raise(|| ErrorKind::InvalidLocator)?;
        let placement = self.place(locator, &fingerprint, bytes).await?;
        let artifact = Artifact {
            capture_date,
            logical_name,
            size_bytes: bytes.len() as u64,
            fingerprint,
            stored_path: self.backend.root().join(&placement.path),
        };
        self.record(artifact, placement).await
    }

    /// Records a placed file in the metadata store, undoing the placement if
    /// the row can't be written.
    pub(crate) async fn record(&self, artifact: Artifact, placement: Placement) -> Result<AdmitResult> {
        match self.cache.insert(&artifact).await {
            Ok(()) => {
                tracing::info!(path = %artifact.stored_path.display(), "stored new artifact");
                Ok(AdmitResult { status: Status::Stored, artifact })
            },
            // Another admission of the same content committed between our
            // lookup and our insert. Its row wins.
            Err(e) if matches!(e.deref(), CacheErrorKind::DuplicateFingerprint(_)) => {
                let winner = match self.existing(&artifact.fingerprint).await {
                    Ok(winner) => winner,
                    Err(e) => {
                        // Without the winning row we can't tell whether it points at
                        // the file we just wrote, so leave the file where it is.
                        tracing::warn!(path = %placement.path.display(), "lost admission race and could not read the winning row");
                        return Err(e);
                    },
                };
                if placement.written && winner.stored_path != artifact.stored_path {
                    self.discard(&placement.path).await;
                }
                tracing::info!(path = %winner.stored_path.display(), "content cached concurrently; skipping");
                Ok(AdmitResult { status: Status::Skipped, artifact: winner })
            },
            Err(e) => {
                if placement.written {
                    self.discard(&placement.path).await;
                }
                Err(e).or_raise(|| ErrorKind::StoreUnavailable)
            },
        }
    }

    /// Puts `bytes` on disk at the path resolved from `locator`, or at one of
    /// its disambiguated forms if other content already occupies it.
    ///
    /// New files are created exclusively. The only file ever replaced is one
    /// at the last-resort name (carrying the whole fingerprint) that no row
    /// points at.
    async fn place(&self, locator: &str, fingerprint: &str, bytes: &[u8]) -> Result<Placement> {
        let root = self.backend.root();
        let resolved = resolve_path(root, locator).or_raise(|| ErrorKind::InvalidLocator)?;
        let preferred = resolved.strip_prefix(root).or_raise(|| ErrorKind::InvalidLocator)?.to_path_buf();
        let last_resort = disambiguate_fully(&preferred, fingerprint);

        let short = disambiguate(&preferred, fingerprint);
        for candidate in [preferred, short, last_resort.clone()] {
            if let Some(placement) = self.claim(candidate, fingerprint, bytes).await? {
                return Ok(placement);
            }
        }

        // Every name holds other content. The last resort can still be taken
        // over when it is an orphan no row points at.
        let stored_path = root.join(&last_resort);
        if self.cache.references(&stored_path).await.or_raise(|| ErrorKind::StoreUnavailable)? {
            tracing::error!(path = %last_resort.display(), "every candidate name belongs to other content");
            exn::bail!(ErrorKind::StorageWriteFailed);
        }
        tracing::warn!(path = %last_resort.display(), "replacing unrecorded file");
        self.write(last_resort, bytes).await
    }

    /// Takes `path` for `bytes` if it is free, or adopts it if it already
    /// holds the same content. `None` when other content is there.
    async fn claim(&self, path: PathBuf, fingerprint: &str, bytes: &[u8]) -> Result<Option<Placement>> {
        // A second pass only happens when another admission created the file
        // between our read and our write.
        for _ in 0..2 {
            match self.backend.read(&path).await {
                Err(e) if matches!(e.deref(), StorageErrorKind::NotFound(_)) => {
                    match self.backend.create(&path, bytes).await {
                        Ok(()) => return Ok(Some(Placement { path, written: true })),
                        Err(e) if matches!(e.deref(), StorageErrorKind::AlreadyExists(_)) => {
                            tracing::debug!(path = %path.display(), "name taken concurrently");
                        },
                        Err(e) => return Err(e).or_raise(|| ErrorKind::StorageWriteFailed),
                    }
                },
                // Left behind by an earlier run that never got to record it.
                Ok(existing) if apod_storage::fingerprint(&existing) == fingerprint => {
                    tracing::debug!(path = %path.display(), "identical file already on disk; adopting it");
                    return Ok(Some(Placement { path, written: false }));
                },
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "name taken by different content");
                    return Ok(None);
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::StorageWriteFailed),
            }
        }
        Ok(None)
    }

    async fn write(&self, path: PathBuf, bytes: &[u8]) -> Result<Placement> {
        self.backend.write(&path, bytes).await.or_raise(|| ErrorKind::StorageWriteFailed)?;
        Ok(Placement { path, written: true })
    }

    /// Removes a file this admission wrote. Failure leaves an orphan that
    /// [`verify`](CacheManager::verify) will report, so it is only logged.
    async fn discard(&self, path: &Path) {
        if let Err(e) = self.backend.delete(path).await {
            tracing::error!(path = %path.display(), error = %e.deref(), "failed to remove file after rollback");
        }
    }

    async fn existing(&self, fingerprint: &str) -> Result<Artifact> {
        self.cache
            .get_by_fingerprint(fingerprint)
            .await
            .or_raise(|| ErrorKind::StoreUnavailable)?
            .ok_or_raise(|| ErrorKind::StoreUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apod_cache::{Database, Repository};
    use apod_storage::backend::{LocalBackend, MockBackend};
    use apod_storage::{BackendHandle, StorageBackend, parse_capture_date};
    use rstest::rstest;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ABC_FINGERPRINT: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn date(value: &str) -> Date {
        parse_capture_date(value).unwrap()
    }

    async fn mock_manager(backend: Arc<MockBackend>) -> (CacheManager, Database) {
        let db = Database::connect_in_memory().await.unwrap();
        let manager = CacheManager::new(backend, Repository::from(&db));
        (manager, db)
    }

    #[tokio::test]
    async fn test_admit_new_content() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;

        let result = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Stored);
        assert_eq!(result.artifact.fingerprint, ABC_FINGERPRINT);
        assert_eq!(result.artifact.logical_name, "cat.jpg");
        assert_eq!(result.artifact.size_bytes, 3);
        assert_eq!(result.artifact.stored_path, PathBuf::from("/mock/cat.jpg"));

        assert_eq!(backend.read(Path::new("cat.jpg")).await.unwrap(), b"abc");
        assert_eq!(manager.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admit_known_content_is_skipped() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;

        let first = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        let second = manager.admit(b"abc", "https://y/cat-copy.jpg", date("2024-01-02")).await.unwrap();

        assert_eq!(second.status, Status::Skipped);
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(backend.paths().await, vec![PathBuf::from("cat.jpg")]);
        assert_eq!(manager.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admit_known_content_skips_before_locator_check() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;

        manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        let result = manager.admit(b"abc", "https://x/", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Skipped);
    }

    #[rstest]
    #[case("")]
    #[case("https://x/")]
    #[case("https://x/..")]
    #[case("https://x/.apod_images.db")]
    #[tokio::test]
    async fn test_admit_invalid_locator(#[case] locator: &str) {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;

        let err = manager.admit(b"abc", locator, date("2024-01-01")).await.unwrap_err();
        assert!(matches!(err.deref(), ErrorKind::InvalidLocator));
        assert!(backend.paths().await.is_empty());
        assert_eq!(manager.cache.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_admit_write_failure_records_nothing() {
        let backend = Arc::new(MockBackend::default());
        backend.fail_writes(true);
        let (manager, _db) = mock_manager(backend.clone()).await;

        let err = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap_err();
        assert!(matches!(err.deref(), ErrorKind::StorageWriteFailed));
        assert!(backend.paths().await.is_empty());
        assert_eq!(manager.cache.count().await.unwrap(), 0);
        assert!(!manager.cache.contains(ABC_FINGERPRINT).await.unwrap());
    }

    #[tokio::test]
    async fn test_admit_store_failure_removes_written_file() {
        let backend = Arc::new(MockBackend::default());
        let (manager, db) = mock_manager(backend.clone()).await;
        sqlx::query(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON artifacts BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap_err();
        assert!(matches!(err.deref(), ErrorKind::StoreUnavailable));
        assert!(backend.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_admit_store_failure_keeps_adopted_file() {
        let backend = Arc::new(MockBackend::with_files([("cat.jpg", b"abc")]));
        let (manager, db) = mock_manager(backend.clone()).await;
        sqlx::query(
            "CREATE TRIGGER reject_inserts BEFORE INSERT ON artifacts BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap_err();
        assert!(matches!(err.deref(), ErrorKind::StoreUnavailable));
        assert_eq!(backend.paths().await, vec![PathBuf::from("cat.jpg")]);
    }

    #[tokio::test]
    async fn test_admit_name_collision_is_disambiguated() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;

        let first = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        let second = manager.admit(b"xyz", "https://y/cat.jpg", date("2024-01-02")).await.unwrap();

        assert_eq!(second.status, Status::Stored);
        assert_eq!(second.artifact.logical_name, "cat.jpg");
        assert_ne!(second.artifact.stored_path, first.artifact.stored_path);
        assert_eq!(backend.read(Path::new("cat.jpg")).await.unwrap(), b"abc");
        let relative = second.artifact.stored_path.strip_prefix("/mock").unwrap();
        assert_eq!(backend.read(relative).await.unwrap(), b"xyz");
        assert_eq!(manager.cache.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_admit_adopts_identical_unrecorded_file() {
        let backend = Arc::new(MockBackend::with_files([("cat.jpg", b"abc")]));
        let (manager, _db) = mock_manager(backend.clone()).await;
        // Any write would fail, so success proves the existing file was reused.
        backend.fail_writes(true);

        let result = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Stored);
        assert_eq!(result.artifact.stored_path, PathBuf::from("/mock/cat.jpg"));
        assert_eq!(backend.paths().await, vec![PathBuf::from("cat.jpg")]);
    }

    #[tokio::test]
    async fn test_admit_never_overwrites_recorded_file() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;
        let short = disambiguate("cat.jpg", ABC_FINGERPRINT);

        // Published under a name that happens to match the short suffix of b"abc".
        let xyz = manager.admit(b"xyz", "https://x/cat-ba7816bf8f01.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(xyz.artifact.stored_path, Path::new("/mock").join(&short));
        manager.admit(b"other", "https://x/cat.jpg", date("2024-01-02")).await.unwrap();

        let abc = manager.admit(b"abc", "https://y/cat.jpg", date("2024-01-03")).await.unwrap();
        assert_eq!(abc.status, Status::Stored);
        let full = disambiguate_fully("cat.jpg", ABC_FINGERPRINT);
        assert_eq!(abc.artifact.stored_path, Path::new("/mock").join(&full));

        assert_eq!(backend.read(&short).await.unwrap(), b"xyz");
        assert_eq!(backend.read(Path::new("cat.jpg")).await.unwrap(), b"other");
        assert_eq!(backend.read(&full).await.unwrap(), b"abc");
        assert_eq!(manager.cache.count().await.unwrap(), 3);
        let report = manager.verify().await.unwrap();
        assert!(report.is_consistent(), "{:?}", report.problems);
    }

    #[tokio::test]
    async fn test_admit_replaces_unrecorded_file_at_last_resort() {
        let full = disambiguate_fully("cat.jpg", ABC_FINGERPRINT);
        let backend = Arc::new(MockBackend::with_files([
            (PathBuf::from("cat.jpg"), b"other".to_vec()),
            (disambiguate("cat.jpg", ABC_FINGERPRINT), b"xyz".to_vec()),
            (full.clone(), b"garbage".to_vec()),
        ]));
        let (manager, _db) = mock_manager(backend.clone()).await;

        let result = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Stored);
        assert_eq!(result.artifact.stored_path, Path::new("/mock").join(&full));
        assert_eq!(backend.read(&full).await.unwrap(), b"abc");
        assert_eq!(backend.read(Path::new("cat.jpg")).await.unwrap(), b"other");
    }

    #[tokio::test]
    async fn test_admit_fails_when_every_name_is_recorded() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = mock_manager(backend.clone()).await;
        let full = disambiguate_fully("cat.jpg", ABC_FINGERPRINT);
        let full_locator = format!("https://x/{}", full.display());
        manager.admit(b"zzz", &full_locator, date("2024-01-01")).await.unwrap();
        manager.admit(b"xyz", "https://x/cat-ba7816bf8f01.jpg", date("2024-01-01")).await.unwrap();
        manager.admit(b"other", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();

        let err = manager.admit(b"abc", "https://y/cat.jpg", date("2024-01-02")).await.unwrap_err();
        assert!(matches!(err.deref(), ErrorKind::StorageWriteFailed));
        assert_eq!(backend.read(&full).await.unwrap(), b"zzz");
        assert_eq!(backend.paths().await.len(), 3);
        assert!(!manager.cache.contains(ABC_FINGERPRINT).await.unwrap());
        assert!(manager.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_lost_race_discards_own_file() {
        let backend = Arc::new(MockBackend::with_files([("cat.jpg", b"abc"), ("cat-copy.jpg", b"abc")]));
        let (manager, _db) = mock_manager(backend.clone()).await;
        let winner = Artifact {
            capture_date: date("2024-01-01"),
            logical_name: "cat.jpg".into(),
            size_bytes: 3,
            fingerprint: ABC_FINGERPRINT.into(),
            stored_path: "/mock/cat.jpg".into(),
        };
        manager.cache.insert(&winner).await.unwrap();

        let ours = Artifact {
            logical_name: "cat-copy.jpg".into(),
            stored_path: "/mock/cat-copy.jpg".into(),
            ..winner.clone()
        };
        let placement = Placement { path: "cat-copy.jpg".into(), written: true };
        let result = manager.record(ours, placement).await.unwrap();

        assert_eq!(result.status, Status::Skipped);
        assert_eq!(result.artifact, winner);
        assert_eq!(backend.paths().await, vec![PathBuf::from("cat.jpg")]);
        assert_eq!(manager.cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lost_race_keeps_shared_file() {
        let backend = Arc::new(MockBackend::with_files([("cat.jpg", b"abc")]));
        let (manager, _db) = mock_manager(backend.clone()).await;
        let winner = Artifact {
            capture_date: date("2024-01-01"),
            logical_name: "cat.jpg".into(),
            size_bytes: 3,
            fingerprint: ABC_FINGERPRINT.into(),
            stored_path: "/mock/cat.jpg".into(),
        };
        manager.cache.insert(&winner).await.unwrap();

        let placement = Placement { path: "cat.jpg".into(), written: true };
        let result = manager.record(winner.clone(), placement).await.unwrap();

        assert_eq!(result.status, Status::Skipped);
        assert_eq!(backend.paths().await, vec![PathBuf::from("cat.jpg")]);
    }

    #[rstest]
    #[case("https://x/cat.jpg", "https://y/cat.jpg")]
    #[case("https://x/cat.jpg", "https://y/cat-copy.jpg")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_converge(#[case] left: &str, #[case] right: &str) {
        let dir = TempDir::new().unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let db = Database::open_in(dir.path()).await.unwrap();
        let manager = CacheManager::new(backend.clone(), Repository::from(&db));

        let (a, b) = tokio::join!(
            manager.admit(b"abc", left, date("2024-01-01")),
            manager.admit(b"abc", right, date("2024-01-01")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut statuses = [a.status, b.status];
        statuses.sort_by_key(|s| *s == Status::Skipped);
        assert_eq!(statuses, [Status::Stored, Status::Skipped]);
        assert_eq!(a.artifact, b.artifact);
        assert_eq!(manager.cache.count().await.unwrap(), 1);

        let visible: Vec<_> = backend.list(None).await.unwrap().into_iter().filter(|f| !f.is_hidden()).collect();
        assert_eq!(visible.len(), 1);
        assert_eq!(std::fs::read(&a.artifact.stored_path).unwrap(), b"abc");
        assert!(manager.verify().await.unwrap().is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_of_different_content_keep_both() {
        let dir = TempDir::new().unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let db = Database::open_in(dir.path()).await.unwrap();
        let manager = CacheManager::new(backend.clone(), Repository::from(&db));

        let (a, b) = tokio::join!(
            manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")),
            manager.admit(b"xyz", "https://y/cat.jpg", date("2024-01-02")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!((a.status, b.status), (Status::Stored, Status::Stored));
        assert_ne!(a.artifact.stored_path, b.artifact.stored_path);
        assert_eq!(std::fs::read(&a.artifact.stored_path).unwrap(), b"abc");
        assert_eq!(std::fs::read(&b.artifact.stored_path).unwrap(), b"xyz");
        assert_eq!(manager.cache.count().await.unwrap(), 2);
        assert!(manager.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_admit_on_disk_matches_example() {
        let dir = TempDir::new().unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let db = Database::open_in(dir.path()).await.unwrap();
        let manager = CacheManager::new(backend, Repository::from(&db));

        let result = manager.admit(b"abc", "https://x/cat.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Stored);
        assert_eq!(result.artifact.stored_path, dir.path().join("cat.jpg"));
        assert_eq!(std::fs::read(dir.path().join("cat.jpg")).unwrap(), b"abc");

        let result = manager.admit(b"abc", "https://x/cat-copy.jpg", date("2024-01-01")).await.unwrap();
        assert_eq!(result.status, Status::Skipped);
        assert!(!dir.path().join("cat-copy.jpg").exists());
    }
}
