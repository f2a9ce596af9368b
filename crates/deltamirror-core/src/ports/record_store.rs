//! Sync record store port (driven/secondary port)
//!
//! Keyed store holding one [`SyncRecord`] per collection. Every operation is
//! atomic per collection: the session guard and the worker coordinate only
//! through these calls, never through ad-hoc locking.
//!
//! ## Contract
//!
//! - `claim_run` is a single compare-and-set from any non-`syncing` status
//!   to `syncing`. Two concurrent claims on the same collection never both
//!   succeed.
//! - `update_progress` is a no-op (`ProgressOutcome::Discarded`) unless the
//!   record is `syncing` and owned by the given run.
//! - `set_terminal` is the only operation that writes delta tokens.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::errors::DomainError;
use crate::domain::newtypes::{CollectionId, RunId};
use crate::domain::record::{ProgressOutcome, SyncProgress, SyncRecord, SyncStatus, TerminalUpdate};

/// Errors reported by a record store
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into a record
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The requested change violates the state machine or run ownership
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// No record exists for the collection
    #[error("No sync record for collection {0}")]
    NotFound(CollectionId),
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the record, returned as written
    Claimed(SyncRecord),
    /// Another run owns the record, returned as found
    Conflict(SyncRecord),
}

/// Port for the persisted sync state
#[async_trait::async_trait]
pub trait ISyncRecordStore: Send + Sync {
    /// Returns the record of a collection, if one was ever created
    async fn get(&self, collection: &CollectionId) -> Result<Option<SyncRecord>, StoreError>;

    /// Returns only the status; used by workers to poll for cancellation
    async fn status(&self, collection: &CollectionId) -> Result<Option<SyncStatus>, StoreError> {
        Ok(self.get(collection).await?.map(|record| record.status()))
    }

    /// Atomically moves the status from one of `expected` to `next`.
    ///
    /// Returns `Ok(false)` when the stored status is not in `expected` (or
    /// no record exists). Transitions the state machine forbids are
    /// rejected with `StoreError::Rejected`.
    async fn compare_and_set_status(
        &self,
        collection: &CollectionId,
        expected: &[SyncStatus],
        next: SyncStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Creates the record if needed and claims it for `run_id`
    async fn claim_run(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Writes progress counters for `run_id`
    async fn update_progress(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        progress: &SyncProgress,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome, StoreError>;

    /// Moves a `syncing` record to `cancelled`; returns false otherwise
    async fn request_cancel(
        &self,
        collection: &CollectionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.compare_and_set_status(collection, &[SyncStatus::Syncing], SyncStatus::Cancelled, now)
            .await
    }

    /// Writes the terminal status together with tokens and the failure report
    async fn set_terminal(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        update: &TerminalUpdate,
        now: DateTime<Utc>,
    ) -> Result<SyncRecord, StoreError>;

    /// Fails every `syncing` record not written since `stale_before`
    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CollectionId>, StoreError>;
}
