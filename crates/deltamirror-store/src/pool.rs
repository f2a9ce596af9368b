//! SQLite connection setup for the sync record store
//!
//! File databases run in WAL mode so `status` and `watch` polls from another
//! process never wait on a worker's write. The schema is versioned through
//! `PRAGMA user_version`; each entry of [`SCHEMA`] is applied once, in order.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::DatabaseError;

/// Schema steps; index `n` upgrades a database from version `n` to `n + 1`.
const SCHEMA: &[&str] = &[include_str!("migrations/20261019_sync_records.sql")];

/// Concurrent runs contend on single-row writes; this absorbs the wait.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open, migrated sync state database
pub struct StateDatabase {
    pool: SqlitePool,
}

impl StateDatabase {
    /// Opens (or creates) the database at `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// `DatabaseError::ConnectionFailed` if the file cannot be opened,
    /// `DatabaseError::MigrationFailed` if the schema cannot be brought up
    /// to date.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!("{}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let db = Self::connect(options, 5, &path.display().to_string()).await?;

        tracing::info!(path = %path.display(), "Sync state database opened");
        Ok(db)
    }

    /// A private database that lives as long as the returned value
    ///
    /// Limited to one connection: every SQLite in-memory connection is a
    /// separate database.
    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        Self::connect(options, 1, ":memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of schema steps applied to this database
    pub async fn schema_version(&self) -> Result<i64, DatabaseError> {
        Ok(sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        target: &str,
    ) -> Result<Self, DatabaseError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options.busy_timeout(BUSY_TIMEOUT))
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("{target}: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DatabaseError> {
        let current = self
            .schema_version()
            .await
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        let current = usize::try_from(current).unwrap_or(0);
        if current > SCHEMA.len() {
            return Err(DatabaseError::MigrationFailed(format!(
                "database schema version {current} is newer than this build ({})",
                SCHEMA.len()
            )));
        }

        for (step, sql) in SCHEMA.iter().enumerate().skip(current) {
            let version = step + 1;
            let failed = |e: sqlx::Error| {
                DatabaseError::MigrationFailed(format!("schema step {version}: {e}"))
            };
            let mut tx = self.pool.begin().await.map_err(failed)?;
            sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(failed)?;
            sqlx::query(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
            tx.commit().await.map_err(failed)?;
            tracing::debug!(version, "Applied schema step");
        }
        Ok(())
    }
}
