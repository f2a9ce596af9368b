//! In-memory implementation of ISyncRecordStore
//!
//! Records live in a [`DashMap`]; each operation holds the entry's shard
//! lock while it applies the matching `SyncRecord` method, which gives the
//! same per-collection atomicity as the SQLite statements.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use deltamirror_core::domain::{
    CollectionId, DomainError, ProgressOutcome, RunId, SyncProgress, SyncRecord, SyncStatus,
    TerminalUpdate,
};
use deltamirror_core::ports::{ClaimOutcome, ISyncRecordStore, StoreError};

/// Volatile sync record store
#[derive(Debug, Default)]
pub struct MemorySyncRecordStore {
    records: DashMap<CollectionId, SyncRecord>,
}

impl MemorySyncRecordStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record as-is (test seeding, imports)
    pub fn insert(&self, record: SyncRecord) {
        self.records.insert(record.collection_id().clone(), record);
    }

    /// Number of collections with a record
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record exists
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl ISyncRecordStore for MemorySyncRecordStore {
    async fn get(&self, collection: &CollectionId) -> Result<Option<SyncRecord>, StoreError> {
        Ok(self.records.get(collection).map(|r| r.value().clone()))
    }

    async fn status(&self, collection: &CollectionId) -> Result<Option<SyncStatus>, StoreError> {
        Ok(self.records.get(collection).map(|r| r.status()))
    }

    async fn compare_and_set_status(
        &self,
        collection: &CollectionId,
        expected: &[SyncStatus],
        next: SyncStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if let Some(from) = expected.iter().find(|s| !s.can_transition_to(next)) {
            return Err(StoreError::Rejected(DomainError::InvalidState {
                from: from.to_string(),
                to: next.to_string(),
            }));
        }

        let Some(mut record) = self.records.get_mut(collection) else {
            return Ok(false);
        };
        if !expected.contains(&record.status()) {
            return Ok(false);
        }
        record.transition_to(next, now)?;
        Ok(true)
    }

    async fn claim_run(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut record = match self.records.entry(collection.clone()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => entry.insert(SyncRecord::new_at(collection.clone(), now)),
        };

        if record.status().is_syncing() {
            return Ok(ClaimOutcome::Conflict(record.value().clone()));
        }
        record.begin_run(run_id, now)?;
        Ok(ClaimOutcome::Claimed(record.value().clone()))
    }

    async fn update_progress(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        progress: &SyncProgress,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome, StoreError> {
        match self.records.get_mut(collection) {
            Some(mut record) => Ok(record.apply_progress(run_id, progress, now)),
            None => Ok(ProgressOutcome::Discarded),
        }
    }

    async fn request_cancel(
        &self,
        collection: &CollectionId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(collection) {
            Some(mut record) => Ok(record.request_cancel(now)),
            None => Ok(false),
        }
    }

    async fn set_terminal(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        update: &TerminalUpdate,
        now: DateTime<Utc>,
    ) -> Result<SyncRecord, StoreError> {
        let mut record = self
            .records
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound(collection.clone()))?;

        // Apply on a copy so a rejected update leaves the record untouched.
        let mut next = record.value().clone();
        next.finish(run_id, update, now)?;
        *record = next.clone();
        Ok(next)
    }

    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CollectionId>, StoreError> {
        let mut recovered = Vec::new();
        for mut record in self.records.iter_mut() {
            if record.status().is_syncing()
                && record.updated_at() < stale_before
                && record.mark_interrupted(reason, now)
            {
                recovered.push(record.key().clone());
            }
        }
        recovered.sort();
        Ok(recovered)
    }
}
