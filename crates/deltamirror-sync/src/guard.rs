//! Sync session guard
//!
//! Admits at most one run per collection. The check and the transition to
//! `syncing` are a single store operation, so two concurrent starts can
//! never both succeed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use deltamirror_core::domain::{CollectionId, RunId, SourceRoot, SyncRecord};
use deltamirror_core::ports::ClaimOutcome;

use crate::state::SyncStateStore;
use crate::SyncError;

/// A request to sync a collection from a set of source roots
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub collection_id: CollectionId,
    pub sources: Vec<SourceRoot>,
}

impl RunRequest {
    pub fn new(collection_id: CollectionId, sources: Vec<SourceRoot>) -> Self {
        Self {
            collection_id,
            sources,
        }
    }

    /// Rejects requests that cannot produce a meaningful run
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.sources.is_empty() {
            return Err(SyncError::InvalidRequest(format!(
                "no source roots given for {}",
                self.collection_id
            )));
        }

        let mut seen = HashSet::new();
        for root in &self.sources {
            if !seen.insert(&root.id) {
                return Err(SyncError::InvalidRequest(format!(
                    "source root {} listed twice",
                    root.id
                )));
            }
        }
        Ok(())
    }
}

/// An admitted run: the record as claimed, with its checkpoints
#[derive(Debug, Clone)]
pub struct RunClaim {
    pub run_id: RunId,
    pub record: SyncRecord,
}

/// Serializes runs per collection
#[derive(Clone)]
pub struct SessionGuard {
    state: Arc<SyncStateStore>,
}

impl SessionGuard {
    pub fn new(state: Arc<SyncStateStore>) -> Self {
        Self { state }
    }

    /// Claims the collection for a new run
    ///
    /// # Errors
    /// - `SyncError::InvalidRequest` if the request is malformed
    /// - `SyncError::Conflict` if a run is already `syncing`
    /// - `SyncError::StoreUnavailable` if the record cannot be written
    pub async fn start_run(&self, request: &RunRequest) -> Result<RunClaim, SyncError> {
        request.validate()?;

        let run_id = RunId::new();
        match self.state.claim(&request.collection_id, run_id).await? {
            ClaimOutcome::Claimed(record) => {
                info!(
                    collection = %request.collection_id,
                    %run_id,
                    roots = request.sources.len(),
                    "Sync run started"
                );
                Ok(RunClaim { run_id, record })
            }
            ClaimOutcome::Conflict(record) => {
                warn!(
                    collection = %request.collection_id,
                    active_run = ?record.run_id(),
                    "Sync already in progress"
                );
                Err(SyncError::Conflict {
                    collection: request.collection_id.clone(),
                    run_id: record.run_id(),
                })
            }
        }
    }
}
