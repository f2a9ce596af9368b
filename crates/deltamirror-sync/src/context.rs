//! Per-run shared state
//!
//! One [`RunContext`] is created per run and shared (behind an `Arc`) by
//! every item task of that run. It owns the concurrency limiter, the
//! counters and the cancellation flag, so nothing run-specific lives in
//! process-wide statics and concurrent runs for different collections
//! cannot interfere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use deltamirror_core::domain::{
    CollectionId, FailedItem, FailedItemLog, ProgressOutcome, RunId, SyncProgress, SyncStatus,
};

use crate::state::SyncStateStore;
use crate::SyncError;

#[derive(Debug)]
struct RunCounters {
    progress: SyncProgress,
    failed_items: FailedItemLog,
}

/// Shared state of one sync run
pub struct RunContext {
    collection_id: CollectionId,
    run_id: RunId,
    limiter: Arc<Semaphore>,
    counters: Mutex<RunCounters>,
    cancelled: AtomicBool,
    fatal: Mutex<Option<String>>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    state: Arc<SyncStateStore>,
}

impl RunContext {
    pub fn new(
        collection_id: CollectionId,
        run_id: RunId,
        max_concurrency: usize,
        failed_items_cap: usize,
        state: Arc<SyncStateStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            collection_id,
            run_id,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            counters: Mutex::new(RunCounters {
                progress: SyncProgress::default(),
                failed_items: FailedItemLog::new(failed_items_cap),
            }),
            cancelled: AtomicBool::new(false),
            fatal: Mutex::new(None),
            cancel: shutdown.child_token(),
            shutdown,
            state,
        }
    }

    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The semaphore bounding in-flight pipeline work for this run
    pub fn limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.limiter)
    }

    /// Returns true once cancellation has been observed locally
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fires once cancellation has been observed, or on process shutdown
    ///
    /// Long waits inside the run (retry backoff) select on this token so a
    /// cancelled run does not sit out its delays.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true if the run must stop dispatching new work
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.fatal_error().is_some()
    }

    /// Checks whether the run has been cancelled.
    ///
    /// The local flag is consulted first. Otherwise the stored record is
    /// re-read: the run counts as cancelled if the record is no longer
    /// `syncing` for this run, or if the process is shutting down. Once
    /// observed, the result is latched.
    pub async fn observe_cancelled(&self) -> Result<bool, SyncError> {
        if self.is_cancelled() {
            return Ok(true);
        }
        if self.shutdown.is_cancelled() {
            info!(collection = %self.collection_id, "Shutdown requested, cancelling run");
            self.latch();
            return Ok(true);
        }

        let owned = match self.state.get(&self.collection_id).await? {
            Some(record) => {
                record.status() == SyncStatus::Syncing && record.run_id() == Some(self.run_id)
            }
            None => false,
        };
        if !owned {
            debug!(collection = %self.collection_id, run_id = %self.run_id, "Cancellation observed");
            self.latch();
        }
        Ok(!owned)
    }

    /// Polls the stored record every `every` until cancellation is observed
    ///
    /// Runs alongside the run so that waits which never reach a
    /// cancellation checkpoint are still interrupted. Store errors are
    /// logged and polling continues; the run itself reports them.
    pub async fn watch_cancellation(&self, every: Duration) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(every) => {}
            }
            match self.observe_cancelled().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    debug!(collection = %self.collection_id, error = %err, "Cancellation poll failed");
                }
            }
        }
    }

    fn latch(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Latches the first run-fatal error; later ones are dropped
    pub fn record_fatal(&self, error: &SyncError) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            *fatal = Some(error.to_string());
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        lock(&self.fatal).clone()
    }

    /// Sets the number of items dispatched in this run
    pub fn set_total(&self, total: u64) -> SyncProgress {
        let mut counters = lock(&self.counters);
        counters.progress.total = total;
        counters.progress.clone()
    }

    /// Counts a successfully settled item and returns the new counters
    pub fn record_success(&self, name: &str) -> SyncProgress {
        let mut counters = lock(&self.counters);
        counters.progress.processed += 1;
        counters.progress.current_item = name.to_string();
        counters.progress.clone()
    }

    /// Counts a failed item and returns the new counters
    pub fn record_failure(&self, item: FailedItem) -> SyncProgress {
        let mut counters = lock(&self.counters);
        counters.progress.failed += 1;
        counters.progress.current_item = item.name().to_string();
        counters.failed_items.push(item);
        counters.progress.clone()
    }

    /// Adds a failure to the report without counting it as a settled item
    pub fn record_run_failure(&self, item: FailedItem) {
        lock(&self.counters).failed_items.push(item);
    }

    pub fn progress(&self) -> SyncProgress {
        lock(&self.counters).progress.clone()
    }

    /// The bounded failure report as it should be persisted
    pub fn failed_items(&self) -> Vec<FailedItem> {
        lock(&self.counters).failed_items.snapshot()
    }

    /// Returns true if any item or enumeration failure was reported
    pub fn has_failures(&self) -> bool {
        !lock(&self.counters).failed_items.is_empty()
    }

    /// Persists a counter snapshot through the state store
    pub async fn publish_progress(&self, progress: &SyncProgress) -> Result<ProgressOutcome, SyncError> {
        self.state
            .write_progress(&self.collection_id, self.run_id, progress)
            .await
    }
}

// Counter updates never panic while holding the lock, so a poisoned mutex
// still holds consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
