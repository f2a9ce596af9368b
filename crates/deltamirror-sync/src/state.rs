//! Sync state store
//!
//! [`SyncStateStore`] wraps an [`ISyncRecordStore`] and is the single path
//! through which sync records change. Every accepted progress or terminal
//! write is published as a [`SyncEvent`] on a broadcast channel, so
//! observers never have to poll.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use deltamirror_core::domain::{
    CollectionId, ProgressOutcome, RunId, SyncProgress, SyncRecord, SyncStatus, TerminalUpdate,
};
use deltamirror_core::ports::{ClaimOutcome, ISyncRecordStore};

use crate::SyncError;

/// What kind of write produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    /// Counters or the current item changed
    Progress,
    /// The run reached a terminal status
    Terminal,
}

/// Push notification carrying the record as written
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub record: SyncRecord,
}

impl SyncEvent {
    /// Collection the event is about
    pub fn collection_id(&self) -> &CollectionId {
        self.record.collection_id()
    }
}

/// Single writer of sync records
pub struct SyncStateStore {
    store: Arc<dyn ISyncRecordStore>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncStateStore {
    /// Creates a state store publishing on a channel of `event_buffer` slots
    pub fn new(store: Arc<dyn ISyncRecordStore>, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self { store, events }
    }

    /// Subscribes to record changes.
    ///
    /// A receiver that falls more than `event_buffer` events behind gets
    /// `RecvError::Lagged` and should re-read the record with
    /// [`get_status`](Self::get_status).
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns the stored record, or an idle snapshot if none exists
    pub async fn get_status(&self, collection: &CollectionId) -> Result<SyncRecord, SyncError> {
        Ok(self
            .store
            .get(collection)
            .await?
            .unwrap_or_else(|| SyncRecord::new(collection.clone())))
    }

    /// Returns the stored record, if any
    pub async fn get(&self, collection: &CollectionId) -> Result<Option<SyncRecord>, SyncError> {
        Ok(self.store.get(collection).await?)
    }

    /// Returns only the stored status
    pub async fn status(&self, collection: &CollectionId) -> Result<Option<SyncStatus>, SyncError> {
        Ok(self.store.status(collection).await?)
    }

    /// Atomically moves the record to `syncing` for `run_id`
    pub async fn claim(
        &self,
        collection: &CollectionId,
        run_id: RunId,
    ) -> Result<ClaimOutcome, SyncError> {
        Ok(self.store.claim_run(collection, run_id, Utc::now()).await?)
    }

    /// Writes counters for the run that owns the record.
    ///
    /// Writes from a run that no longer owns the record, or that would move
    /// counters backwards, are discarded and publish nothing.
    pub async fn write_progress(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        progress: &SyncProgress,
    ) -> Result<ProgressOutcome, SyncError> {
        let outcome = self
            .store
            .update_progress(collection, run_id, progress, Utc::now())
            .await?;

        match outcome {
            ProgressOutcome::Applied => {
                if self.events.receiver_count() > 0 {
                    if let Some(record) = self.store.get(collection).await? {
                        self.publish(SyncEventKind::Progress, record);
                    }
                }
            }
            ProgressOutcome::Discarded => {
                debug!(%collection, %run_id, "Progress write discarded");
            }
        }
        Ok(outcome)
    }

    /// Flags a running sync as cancelled; returns false if none was running
    pub async fn request_cancel(&self, collection: &CollectionId) -> Result<bool, SyncError> {
        let accepted = self.store.request_cancel(collection, Utc::now()).await?;
        if accepted {
            info!(%collection, "Cancellation requested");
        }
        Ok(accepted)
    }

    /// Writes the outcome of a run and publishes it
    pub async fn finish(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        update: &TerminalUpdate,
    ) -> Result<SyncRecord, SyncError> {
        let record = self
            .store
            .set_terminal(collection, run_id, update, Utc::now())
            .await?;
        info!(
            %collection,
            %run_id,
            status = %record.status(),
            processed = record.progress().processed,
            failed = record.progress().failed,
            "Sync run finished"
        );
        self.publish(SyncEventKind::Terminal, record.clone());
        Ok(record)
    }

    /// Fails every `syncing` record last touched before `stale_before`
    pub async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<CollectionId>, SyncError> {
        let recovered = self
            .store
            .recover_interrupted(stale_before, reason, Utc::now())
            .await?;

        for collection in &recovered {
            warn!(%collection, "Marked interrupted sync run as failed");
            if let Some(record) = self.store.get(collection).await? {
                self.publish(SyncEventKind::Terminal, record);
            }
        }
        Ok(recovered)
    }

    fn publish(&self, kind: SyncEventKind, record: SyncRecord) {
        // No receivers is not an error
        let _ = self.events.send(SyncEvent { kind, record });
    }
}
