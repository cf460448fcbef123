use crate::CacheManager;
use crate::error::{ErrorKind, Result};
use apod_storage::error::ErrorKind as StorageErrorKind;
use apod_storage::fingerprint;
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Deref;
use std::path::PathBuf;
use tracing::instrument;

/// A single disagreement between the metadata store and the cache root.
#[derive(Debug, Display, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum Problem {
    /// A row's stored path doesn't lie under the cache root.
    #[display("{fingerprint}: stored path {} is outside the cache root", stored_path.display())]
    OutsideRoot { fingerprint: String, stored_path: PathBuf },
    /// A row's file is gone.
    #[display("{fingerprint}: {} is missing", stored_path.display())]
    Missing { fingerprint: String, stored_path: PathBuf },
    /// A row's file has a different length than recorded.
    #[display("{fingerprint}: {} is {actual} bytes, expected {expected}", stored_path.display())]
    SizeMismatch { fingerprint: String, stored_path: PathBuf, expected: u64, actual: u64 },
    /// A row's file has the recorded length but different content.
    #[display("{fingerprint}: {} now hashes to {actual}", stored_path.display())]
    FingerprintMismatch { fingerprint: String, stored_path: PathBuf, actual: String },
    /// A visible file in the cache root that no row points at.
    #[display("{} is not recorded in the metadata store", path.display())]
    Untracked { path: PathBuf, size: u64 },
}

/// Outcome of [`CacheManager::verify`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct VerifyReport {
    /// Number of rows checked against the disk.
    pub checked: usize,
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

impl CacheManager {
    /// Checks every recorded artifact against the file it points at, and
    /// every visible file in the cache root against the recorded artifacts.
    ///
    /// Read-only: problems are reported, never repaired. Hidden files (the
    /// metadata store itself, in-flight partial writes) are ignored.
    ///
    /// # Errors
    /// [`ErrorKind::StoreUnavailable`] if the rows can't be listed, or
    /// [`ErrorKind::Storage`] if the cache root can't be read.
    #[instrument(skip(self), fields(root = %self.backend.root().display()))]
    pub async fn verify(&self) -> Result<VerifyReport> {
        let artifacts = self.cache.list().await.or_raise(|| ErrorKind::StoreUnavailable)?;
        let mut report = VerifyReport { checked: artifacts.len(), problems: vec![] };
        let mut referenced = HashSet::with_capacity(artifacts.len());

        for artifact in artifacts {
            let Ok(relative) = artifact.stored_path.strip_prefix(self.backend.root()).map(PathBuf::from) else {
                report.problems.push(Problem::OutsideRoot {
                    fingerprint: artifact.fingerprint,
                    stored_path: artifact.stored_path,
                });
                continue;
            };
            let bytes = match self.backend.read(&relative).await {
                Ok(bytes) => bytes,
                Err(e) if matches!(e.deref(), StorageErrorKind::NotFound(_)) => {
                    report.problems.push(Problem::Missing {
                        fingerprint: artifact.fingerprint,
                        stored_path: artifact.stored_path,
                    });
                    continue;
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
            };
            referenced.insert(relative);

            let actual = bytes.len() as u64;
            if actual != artifact.size_bytes {
                report.problems.push(Problem::SizeMismatch {
                    fingerprint: artifact.fingerprint,
                    stored_path: artifact.stored_path,
                    expected: artifact.size_bytes,
                    actual,
                });
                continue;
            }
            let actual = fingerprint(&bytes);
            if actual != artifact.fingerprint {
                report.problems.push(Problem::FingerprintMismatch {
                    fingerprint: artifact.fingerprint,
                    stored_path: artifact.stored_path,
                    actual,
                });
            }
        }

        let mut untracked: Vec<_> = self
            .backend
            .list(None)
            .await
            .or_raise(|| ErrorKind::Storage)?
            .into_iter()
            .filter(|file| !file.is_hidden() && !referenced.contains(&file.path))
            .map(|file| Problem::Untracked { path: file.path, size: file.size })
            .collect();
        untracked.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        report.problems.append(&mut untracked);

        tracing::info!(checked = report.checked, problems = report.problems.len(), "verified cache");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apod_cache::{Database, Repository};
    use apod_storage::backend::MockBackend;
    use apod_storage::{Artifact, parse_capture_date};
    use std::sync::Arc;

    async fn manager(backend: Arc<MockBackend>) -> (CacheManager, Database) {
        let db = Database::connect_in_memory().await.unwrap();
        (CacheManager::new(backend, Repository::from(&db)), db)
    }

    fn artifact(bytes: &[u8], stored_path: &str) -> Artifact {
        Artifact {
            capture_date: parse_capture_date("2024-01-01").unwrap(),
            logical_name: "cat.jpg".into(),
            size_bytes: bytes.len() as u64,
            fingerprint: fingerprint(bytes),
            stored_path: stored_path.into(),
        }
    }

    #[tokio::test]
    async fn test_verify_empty() {
        let (manager, _db) = manager(Arc::new(MockBackend::default())).await;
        let report = manager.verify().await.unwrap();
        assert_eq!(report.checked, 0);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_verify_after_admissions() {
        let backend = Arc::new(MockBackend::default());
        let (manager, _db) = manager(backend).await;
        let date = parse_capture_date("2024-01-01").unwrap();
        manager.admit(b"abc", "https://x/cat.jpg", date).await.unwrap();
        manager.admit(b"xyz", "https://x/cat.jpg", date).await.unwrap();
        manager.admit(b"abc", "https://x/dog.jpg", date).await.unwrap();

        let report = manager.verify().await.unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.is_consistent(), "{:?}", report.problems);
    }

    #[tokio::test]
    async fn test_verify_reports_problems() {
        let backend = Arc::new(MockBackend::with_files([
            ("resized.jpg", b"ab".to_vec()),
            ("edited.jpg", b"abd".to_vec()),
            ("stray.jpg", b"stray".to_vec()),
            (".hidden", b"ignored".to_vec()),
        ]));
        let (manager, _db) = manager(backend).await;
        for row in [
            artifact(b"one", "/elsewhere/one.jpg"),
            artifact(b"two", "/mock/gone.jpg"),
            artifact(b"abc", "/mock/resized.jpg"),
            artifact(b"abc2", "/mock/edited.jpg"),
        ] {
            manager.cache.insert(&row).await.unwrap();
        }

        let report = manager.verify().await.unwrap();
        assert_eq!(report.checked, 4);
        assert_eq!(report.problems.len(), 5);
        assert!(matches!(report.problems[0], Problem::OutsideRoot { .. }));
        assert!(matches!(report.problems[1], Problem::Missing { .. }));
        assert!(matches!(report.problems[2], Problem::SizeMismatch { expected: 3, actual: 2, .. }));
        assert!(matches!(report.problems[3], Problem::SizeMismatch { expected: 4, actual: 3, .. }));
        assert_eq!(report.problems[4], Problem::Untracked { path: "stray.jpg".into(), size: 5 });
    }

    #[tokio::test]
    async fn test_verify_detects_changed_content() {
        let backend = Arc::new(MockBackend::with_files([("cat.jpg", b"abd")]));
        let (manager, _db) = manager(backend).await;
        manager.cache.insert(&artifact(b"abc", "/mock/cat.jpg")).await.unwrap();

        let report = manager.verify().await.unwrap();
        assert_eq!(report.problems, vec![Problem::FingerprintMismatch {
            fingerprint: fingerprint(b"abc"),
            stored_path: "/mock/cat.jpg".into(),
            actual: fingerprint(b"abd"),
        }]);
    }
}
