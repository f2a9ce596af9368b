//! SQLite implementation of ISyncRecordStore
//!
//! Every port operation is one SQL statement whose WHERE clause carries the
//! state machine guard, so the database's own write serialization makes it
//! atomic per collection. No read-modify-write happens in Rust.
//!
//! Statements with `RETURNING` are always read with `fetch_all`: SQLite only
//! commits the implicit transaction once the statement has been stepped to
//! completion, and other connections must see the write when the call
//! returns.
//!
//! ## Type Mapping
//!
//! | Domain Type                         | SQL Type | Strategy                          |
//! |-------------------------------------|----------|-----------------------------------|
//! | CollectionId                        | TEXT     | `.as_str()` / `CollectionId::new()` |
//! | SyncStatus                          | TEXT     | `.as_str()` / `FromStr`           |
//! | RunId                               | TEXT     | UUID string / `FromStr`           |
//! | SyncProgress                        | INTEGER ×3, TEXT | one column per counter    |
//! | BTreeMap<SourceRootId, DeltaToken>  | TEXT     | serde_json object                 |
//! | Vec<FailedItem>                     | TEXT     | serde_json array                  |
//! | DateTime<Utc>                       | TEXT     | fixed-width RFC 3339, microseconds |

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use deltamirror_core::domain::{
    CollectionId, DeltaToken, DomainError, FailedItem, ProgressOutcome, RunId, SourceRootId,
    SyncProgress, SyncRecord, SyncStatus, TerminalUpdate,
};
use deltamirror_core::ports::{ClaimOutcome, ISyncRecordStore, StoreError};

use crate::DatabaseError;

/// SQLite-backed sync record store
pub struct SqliteSyncRecordStore {
    pool: SqlitePool,
}

impl SqliteSyncRecordStore {
    /// Creates a new store over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Formats a timestamp so that string order equals time order
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            DatabaseError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_timestamp(val).map(Some),
        _ => Ok(None),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn query_failed(e: sqlx::Error) -> StoreError {
    DatabaseError::from(e).into()
}

fn serialize_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Corrupt(format!("Failed to serialize {}: {}", what, e)))
}

/// Reconstructs a SyncRecord from a `sync_records` row
fn record_from_row(row: &SqliteRow) -> Result<SyncRecord, DatabaseError> {
    let collection_str: String = row.get("collection_id");
    let status_str: String = row.get("status");
    let processed: i64 = row.get("processed");
    let failed: i64 = row.get("failed");
    let total: i64 = row.get("total");
    let current_item: String = row.get("current_item");
    let delta_tokens_str: String = row.get("delta_tokens");
    let failed_items_str: String = row.get("failed_items");
    let run_id_str: Option<String> = row.get("run_id");
    let error: Option<String> = row.get("error");
    let started_at_str: Option<String> = row.get("started_at");
    let finished_at_str: Option<String> = row.get("finished_at");
    let updated_at_str: String = row.get("updated_at");

    let collection_id = CollectionId::new(collection_str.clone()).map_err(|e| {
        DatabaseError::SerializationError(format!(
            "Invalid CollectionId '{}': {}",
            collection_str, e
        ))
    })?;

    let status = SyncStatus::from_str(&status_str)
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

    let delta_tokens: BTreeMap<SourceRootId, DeltaToken> =
        serde_json::from_str(&delta_tokens_str).map_err(|e| {
            DatabaseError::SerializationError(format!(
                "Invalid delta tokens for {}: {}",
                collection_id, e
            ))
        })?;

    let failed_items: Vec<FailedItem> = serde_json::from_str(&failed_items_str).map_err(|e| {
        DatabaseError::SerializationError(format!(
            "Invalid failed items for {}: {}",
            collection_id, e
        ))
    })?;

    let run_id = run_id_str
        .map(|s| {
            RunId::from_str(&s).map_err(|e| {
                DatabaseError::SerializationError(format!("Invalid RunId '{}': {}", s, e))
            })
        })
        .transpose()?;

    Ok(SyncRecord::from_parts(
        collection_id,
        status,
        SyncProgress {
            processed: to_u64(processed),
            failed: to_u64(failed),
            total: to_u64(total),
            current_item,
        },
        delta_tokens,
        failed_items,
        run_id,
        error,
        parse_optional_timestamp(started_at_str)?,
        parse_optional_timestamp(finished_at_str)?,
        parse_timestamp(&updated_at_str)?,
    ))
}

// ============================================================================
// ISyncRecordStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ISyncRecordStore for SqliteSyncRecordStore {
    async fn get(&self, collection: &CollectionId) -> Result<Option<SyncRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM sync_records WHERE collection_id = ?")
            .bind(collection.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

        match row {
            Some(ref r) => Ok(Some(record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn status(&self, collection: &CollectionId) -> Result<Option<SyncStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM sync_records WHERE collection_id = ?")
                .bind(collection.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(query_failed)?;

        status
            .map(|s| SyncStatus::from_str(&s).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn compare_and_set_status(
        &self,
        collection: &CollectionId,
        expected: &[SyncStatus],
        next: SyncStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if expected.is_empty() {
            return Ok(false);
        }
        if let Some(from) = expected.iter().find(|s| !s.can_transition_to(next)) {
            return Err(StoreError::Rejected(DomainError::InvalidState {
                from: from.to_string(),
                to: next.to_string(),
            }));
        }

        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            "UPDATE sync_records SET status = ?, updated_at = MAX(updated_at, ?) \
             WHERE collection_id = ? AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(next.as_str())
            .bind(format_timestamp(now))
            .bind(collection.as_str());
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(query_failed)?;
        let swapped = result.rows_affected() == 1;

        tracing::trace!(collection = %collection, to = %next, swapped, "Status compare-and-set");
        Ok(swapped)
    }

    async fn claim_run(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let now_str = format_timestamp(now);

        // The DO UPDATE guard makes the claim a single compare-and-set: when
        // the row is already syncing no row is written and none is returned.
        let claimed = sqlx::query(
            "INSERT INTO sync_records \
             (collection_id, status, processed, failed, total, current_item, \
              failed_items, run_id, error, started_at, finished_at, updated_at) \
             VALUES (?, 'syncing', 0, 0, 0, '', '[]', ?, NULL, ?, NULL, ?) \
             ON CONFLICT(collection_id) DO UPDATE SET \
               status = 'syncing', processed = 0, failed = 0, total = 0, \
               current_item = '', failed_items = '[]', run_id = excluded.run_id, \
               error = NULL, started_at = excluded.started_at, finished_at = NULL, \
               updated_at = MAX(sync_records.updated_at, excluded.updated_at) \
             WHERE sync_records.status != 'syncing' \
             RETURNING *",
        )
        .bind(collection.as_str())
        .bind(run_id.to_string())
        .bind(&now_str)
        .bind(&now_str)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        if let Some(row) = claimed.first() {
            tracing::debug!(collection = %collection, run_id = %run_id, "Claimed sync record");
            return Ok(ClaimOutcome::Claimed(record_from_row(row)?));
        }

        let current = self
            .get(collection)
            .await?
            .ok_or_else(|| StoreError::NotFound(collection.clone()))?;
        tracing::debug!(
            collection = %collection,
            owner = ?current.run_id(),
            "Claim rejected, record already syncing"
        );
        Ok(ClaimOutcome::Conflict(current))
    }

    async fn update_progress(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        progress: &SyncProgress,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE sync_records SET \
               processed = ?, failed = ?, total = ?, current_item = ?, \
               updated_at = MAX(updated_at, ?) \
             WHERE collection_id = ? AND status = 'syncing' AND run_id = ? \
               AND processed + failed <= ?",
        )
        .bind(to_i64(progress.processed))
        .bind(to_i64(progress.failed))
        .bind(to_i64(progress.total))
        .bind(&progress.current_item)
        .bind(format_timestamp(now))
        .bind(collection.as_str())
        .bind(run_id.to_string())
        .bind(to_i64(progress.settled()))
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 1 {
            Ok(ProgressOutcome::Applied)
        } else {
            tracing::trace!(collection = %collection, run_id = %run_id, "Progress write discarded");
            Ok(ProgressOutcome::Discarded)
        }
    }

    async fn set_terminal(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        update: &TerminalUpdate,
        now: DateTime<Utc>,
    ) -> Result<SyncRecord, StoreError> {
        if !update.status.is_terminal() {
            return Err(StoreError::Rejected(DomainError::InvalidState {
                from: SyncStatus::Syncing.to_string(),
                to: update.status.to_string(),
            }));
        }

        let delta_tokens = serialize_json(&update.delta_tokens, "delta tokens")?;
        let failed_items = serialize_json(&update.failed_items, "failed items")?;
        let now_str = format_timestamp(now);
        let requested = update.status.as_str();

        // A stored cancellation survives a successful outcome; the error
        // column is only kept for failed runs.
        let rows = sqlx::query(
            "UPDATE sync_records SET \
               status = CASE \
                 WHEN status = 'cancelled' AND ?1 IN ('completed', 'completed_with_errors') \
                   THEN 'cancelled' \
                 ELSE ?1 END, \
               delta_tokens = ?2, failed_items = ?3, \
               processed = ?4, failed = ?5, total = ?6, current_item = ?7, \
               error = CASE WHEN ?1 = 'failed' THEN ?8 ELSE NULL END, \
               finished_at = ?9, updated_at = MAX(updated_at, ?9) \
             WHERE collection_id = ?10 AND run_id = ?11 \
               AND status IN ('syncing', 'cancelled') \
             RETURNING *",
        )
        .bind(requested)
        .bind(&delta_tokens)
        .bind(&failed_items)
        .bind(to_i64(update.progress.processed))
        .bind(to_i64(update.progress.failed))
        .bind(to_i64(update.progress.total))
        .bind(&update.progress.current_item)
        .bind(&update.error)
        .bind(&now_str)
        .bind(collection.as_str())
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        if let Some(row) = rows.first() {
            let record = record_from_row(row)?;
            tracing::debug!(
                collection = %collection,
                run_id = %run_id,
                status = %record.status(),
                "Sync record finalized"
            );
            return Ok(record);
        }

        // Nothing was written: report why.
        let current = self
            .get(collection)
            .await?
            .ok_or_else(|| StoreError::NotFound(collection.clone()))?;
        if current.run_id() != Some(run_id) {
            return Err(StoreError::Rejected(DomainError::RunMismatch {
                collection: collection.to_string(),
                run_id: run_id.to_string(),
            }));
        }
        Err(StoreError::Rejected(DomainError::InvalidState {
            from: current.status().to_string(),
            to: update.status.to_string(),
        }))
    }

    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CollectionId>, StoreError> {
        let now_str = format_timestamp(now);
        let rows = sqlx::query(
            "UPDATE sync_records SET \
               status = 'failed', error = ?, finished_at = ?, \
               updated_at = MAX(updated_at, ?) \
             WHERE status = 'syncing' AND updated_at < ? \
             RETURNING collection_id",
        )
        .bind(reason)
        .bind(&now_str)
        .bind(&now_str)
        .bind(format_timestamp(stale_before))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let mut recovered = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("collection_id");
            let collection = CollectionId::new(id.clone()).map_err(|e| {
                StoreError::Corrupt(format!("Invalid CollectionId '{}': {}", id, e))
            })?;
            recovered.push(collection);
        }
        recovered.sort();

        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "Recovered interrupted sync runs");
        }
        Ok(recovered)
    }
}
