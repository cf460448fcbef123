//! Repository for artifact rows.
//!
//! Every lookup is a point query on an indexed column; nothing here scans the
//! table and compares in application code.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::ArtifactRow;
use apod_storage::{Artifact, format_capture_date};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::path::Path;
use time::Date;
use tracing::instrument;

/// Repository for managing artifact rows in the metadata store.
///
/// The table is append-only: rows are inserted once, the first time a
/// fingerprint is seen, and never updated or deleted from here.
///
/// # Uniqueness
///
/// The fingerprint (content hash) is the identity of an artifact. The store
/// rejects a second row with an existing fingerprint regardless of its
/// logical name, capture date or path, even when the caller forgot to check
/// [`contains`](Self::contains) first or lost a race against another writer.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Append a new artifact row.
    ///
    /// The insert runs in its own transaction: the row is either durably
    /// committed or not present at all.
    ///
    /// Returns [`ErrorKind::DuplicateFingerprint`] if a row with the same
    /// fingerprint already exists, and [`ErrorKind::Database`] for any other
    /// failure.
    #[instrument(skip_all, fields(fingerprint = %artifact.fingerprint, name = %artifact.logical_name))]
    pub async fn insert(&self, artifact: &Artifact) -> Result<()> {
        let row = ArtifactRow::try_from(artifact)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let inserted = sqlx::query(include_str!("../queries/insert_artifact.sql"))
            .bind(row.capture_date.as_str())
            .bind(row.logical_name.as_str())
            .bind(row.size_bytes)
            .bind(row.fingerprint.as_str())
            .bind(row.stored_path.as_str())
            .execute(&mut *tx)
            .await;
        match inserted {
            Ok(_) => {},
            // Dropping the transaction rolls it back.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::debug!("Fingerprint already recorded");
                exn::bail!(ErrorKind::DuplicateFingerprint(row.fingerprint));
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Database),
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(size = row.size_bytes, "Artifact recorded");
        Ok(())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Whether an artifact with this exact fingerprint has been recorded.
    pub async fn contains(&self, fingerprint: impl AsRef<str>) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(include_str!("../queries/contains.sql"))
            .bind(fingerprint.as_ref())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(found != 0)
    }

    /// Whether any recorded artifact lives at `stored_path`.
    pub async fn references(&self, stored_path: impl AsRef<Path>) -> Result<bool> {
        let stored_path = stored_path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("stored path"))?;
        let found: i64 = sqlx::query_scalar(include_str!("../queries/references_path.sql"))
            .bind(stored_path)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(found != 0)
    }

    /// Get the artifact recorded for a fingerprint.
    pub async fn get_by_fingerprint(&self, fingerprint: impl AsRef<str>) -> Result<Option<Artifact>> {
        let row: Option<ArtifactRow> = sqlx::query_as(include_str!("../queries/get_by_fingerprint.sql"))
            .bind(fingerprint.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Artifact::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// List every artifact recorded for a capture date, in insertion order.
    ///
    /// Usually zero or one, but nothing stops two different images being
    /// admitted for the same date.
    pub async fn list_by_capture_date(&self, capture_date: Date) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(include_str!("../queries/list_by_capture_date.sql"))
            .bind(format_capture_date(capture_date))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Artifact::try_from).collect()
    }

    /// List all artifacts, ordered by capture date then logical name.
    pub async fn list(&self) -> Result<Vec<Artifact>> {
        let rows: Vec<ArtifactRow> = sqlx::query_as(include_str!("../queries/list_artifacts.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Artifact::try_from).collect()
    }

    /// Count the artifacts in the store.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_artifacts.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("count"))
    }
}
