//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Name of the store file inside the cache root.
///
/// Hidden, so it can never collide with an artifact's logical name.
pub const DATABASE_FILE_NAME: &str = ".apod_images.db";

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// A one-shot command rarely needs more than one, but concurrent admissions
// against the same store shouldn't queue on the pool.
const MAX_CONNECTIONS: u32 = 4;

/// Database connection pool for the metadata store.
///
/// This is the main entry point for interacting with the store. It manages
/// the SQLite connection pool and provides access to the [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // This is IMPORTANT to apply the query-based PRAGMAs to EVERY
            // connection (set by max connections) instead of only the
            // first connection returned by the pool.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Unavailable)?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Open the metadata store at the given path.
    ///
    /// Creates the store file if it doesn't exist and ensures the schema is
    /// in place, so this is safe to call on every startup. Fails with
    /// [`Unavailable`](ErrorKind::Unavailable) when the file can't be opened
    /// or created (e.g. the directory is missing or not writable).
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Opening metadata store");
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Open the metadata store that lives inside `cache_root`
    /// (see [`DATABASE_FILE_NAME`]).
    pub async fn open_in(cache_root: impl AsRef<Path>) -> Result<Self> {
        Self::connect(cache_root.as_ref().join(DATABASE_FILE_NAME)).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory database must either use the same cache `.shared_cache(true)`,
        // or be limited to one connection. Otherwise parallel connections will
        // see different databases that contain different data.
        Self::new(options, Some(1)).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // WAL lets a reader (another `apod list`) run next to a writer.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // PRAGMA synchronous = FULL: a committed row must survive a power
            // cut, otherwise it could outlive or predate its file.
            .synchronous(SqliteSynchronous::Full)
            // PRAGMA busy_timeout = 5000ms
            // Two processes admitting at the same time must queue on the write
            // lock and let the UNIQUE constraint decide, not fail with SQLITE_BUSY.
            .busy_timeout(std::time::Duration::from_millis(5000))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Create the `artifacts` table (and its indexes) if it doesn't exist.
    ///
    /// This is called automatically by [`connect`](Self::connect) and
    /// [`connect_in_memory`](Self::connect_in_memory), and is idempotent.
    /// Existing stores are opened as-is; there is no schema versioning
    /// beyond the embedded migrations.
    ///
    /// A store whose schema can't be brought up to date is as unusable as one
    /// that can't be opened, so failures surface as
    /// [`Unavailable`](ErrorKind::Unavailable) with the
    /// [`Migration`](ErrorKind::Migration) error as its cause.
    #[instrument("ensuring metadata store schema")]
    pub async fn ensure_schema(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .or_raise(|| ErrorKind::Migration)
            .or_raise(|| ErrorKind::Unavailable)
    }

    /// Get a reference to the underlying connection pool.
    ///
    /// This is useful for running custom queries or transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    ///
    /// This waits for all connections to be returned to the pool and then
    /// closes them. After calling this, the Database instance should not
    /// be used.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
