//! SyncService - entry point for hosts and the CLI
//!
//! Owns the state store, the session guard and the worker, and spawns one
//! worker task per admitted run. Runs of different collections proceed
//! concurrently and share nothing but the record store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument, warn};

use deltamirror_core::config::Config;
use deltamirror_core::domain::{CollectionId, RunId, SourceRoot, SyncRecord, SyncStatus};
use deltamirror_core::ports::{AccessCredentials, IContentPipeline, IRemoteSource, ISyncRecordStore};

use crate::guard::{RunRequest, SessionGuard};
use crate::state::{SyncEvent, SyncStateStore};
use crate::worker::{SyncWorker, WorkerSettings};
use crate::SyncError;

/// Error written to records whose worker disappeared
pub const INTERRUPTED_REASON: &str = "run interrupted";

/// Answer to a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The record is now `cancelled`; the worker stops at its next check
    Requested,
    /// Nothing was running; carries the current status
    NotRunning(SyncStatus),
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct RunHandle {
    collection_id: CollectionId,
    run_id: RunId,
    join: JoinHandle<Result<SyncRecord, SyncError>>,
}

impl RunHandle {
    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Waits for the run to finish and returns its final record
    pub async fn wait(self) -> Result<SyncRecord, SyncError> {
        self.join
            .await
            .map_err(|err| SyncError::WorkerAborted(err.to_string()))?
    }
}

/// Incremental sync service
pub struct SyncService {
    state: Arc<SyncStateStore>,
    guard: SessionGuard,
    worker: SyncWorker,
    active: Arc<DashMap<CollectionId, RunId>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    stale_run_after: Duration,
}

impl SyncService {
    /// Wires a service from its ports and configuration
    pub fn new(
        store: Arc<dyn ISyncRecordStore>,
        remote: Arc<dyn IRemoteSource>,
        pipeline: Arc<dyn IContentPipeline>,
        config: &Config,
    ) -> Self {
        let state = Arc::new(SyncStateStore::new(store, config.sync.event_buffer));
        let worker = SyncWorker::new(
            remote,
            pipeline,
            Arc::clone(&state),
            WorkerSettings::from(config),
        );
        Self {
            guard: SessionGuard::new(Arc::clone(&state)),
            state,
            worker,
            active: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            stale_run_after: config.sync.stale_run_after(),
        }
    }

    /// Claims `collection_id` and starts syncing it in the background
    ///
    /// # Errors
    /// - `SyncError::Conflict` if the collection is already syncing
    /// - `SyncError::InvalidRequest` for empty or duplicate source roots,
    ///   or once the service is shutting down
    #[instrument(skip(self, sources, credentials), fields(collection = %collection_id))]
    pub async fn start_run(
        &self,
        collection_id: CollectionId,
        sources: Vec<SourceRoot>,
        credentials: AccessCredentials,
    ) -> Result<RunHandle, SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::InvalidRequest(
                "sync service is shutting down".to_string(),
            ));
        }

        let request = RunRequest::new(collection_id.clone(), sources);
        let claim = self.guard.start_run(&request).await?;
        let run_id = claim.run_id;
        self.active.insert(collection_id.clone(), run_id);

        let worker = self.worker.clone();
        let active = Arc::clone(&self.active);
        let shutdown = self.shutdown.child_token();
        let key = collection_id.clone();
        let join = self.tracker.spawn(async move {
            let result = worker.run(request, claim, credentials, shutdown).await;
            active.remove_if(&key, |_, owner| *owner == run_id);
            result
        });

        Ok(RunHandle {
            collection_id,
            run_id,
            join,
        })
    }

    /// Asks the running sync of `collection_id` to stop
    #[instrument(skip(self), fields(collection = %collection_id))]
    pub async fn request_cancel(&self, collection_id: &CollectionId) -> Result<CancelAck, SyncError> {
        if self.state.request_cancel(collection_id).await? {
            return Ok(CancelAck::Requested);
        }
        let record = self.state.get_status(collection_id).await?;
        Ok(CancelAck::NotRunning(record.status()))
    }

    /// Current record of a collection (`idle` if it never synced)
    pub async fn get_status(&self, collection_id: &CollectionId) -> Result<SyncRecord, SyncError> {
        self.state.get_status(collection_id).await
    }

    /// Receives every accepted progress and terminal write
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.state.subscribe()
    }

    /// Collections with a worker running in this process
    pub fn active_runs(&self) -> Vec<(CollectionId, RunId)> {
        self.active
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Fails `syncing` records left behind by a crashed process
    ///
    /// Records untouched for longer than `sync.stale_run_after_secs` are
    /// moved to `failed`, keeping their delta tokens. Meant to run at host
    /// startup, before any run is started.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<Vec<CollectionId>, SyncError> {
        let threshold = chrono::Duration::from_std(self.stale_run_after).map_err(|err| {
            SyncError::InvalidRequest(format!("stale run threshold out of range: {err}"))
        })?;
        let stale_before = Utc::now() - threshold;

        let recovered = self
            .state
            .recover_interrupted(stale_before, INTERRUPTED_REASON)
            .await?;
        let local: Vec<_> = recovered
            .iter()
            .filter(|collection| self.active.contains_key(*collection))
            .collect();
        if !local.is_empty() {
            warn!(?local, "Recovered runs still owned by this process; raise stale_run_after_secs");
        }

        info!(recovered = recovered.len(), "Interrupted-run recovery finished");
        Ok(recovered)
    }

    /// Stops all runs: workers observe the cancellation at their next check
    /// and finish as `cancelled`, persisting their tokens
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(active = self.active.len(), "Shutting down sync service");
        }
        self.shutdown.cancel();
        self.tracker.close();
    }

    /// Shuts down and waits up to `grace` for workers to finish.
    ///
    /// Returns true if every worker finished in time.
    pub async fn shutdown_and_wait(&self, grace: Duration) -> bool {
        self.shutdown();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    active = self.active.len(),
                    "Workers still running after shutdown grace period"
                );
                false
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
