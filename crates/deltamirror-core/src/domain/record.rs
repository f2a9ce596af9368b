//! SyncRecord domain entity
//!
//! One `SyncRecord` exists per target collection. It carries the sync status
//! state machine, run progress, the per-root delta tokens and the list of
//! failed items. Stores apply the rules in this module under their own
//! atomic primitive; the in-memory store calls these methods directly and the
//! SQLite store encodes the same rules in conditional statements.
//!
//! ```text
//! idle ──▶ syncing ──▶ completed | completed_with_errors | cancelled | failed
//!             ▲                                │
//!             └──────────── next start ────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{CollectionId, DeltaToken, RunId, SourceRootId};

/// Message recorded for items short-circuited by a cancellation request
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Default maximum length of `SyncRecord::failed_items`
pub const DEFAULT_FAILED_ITEMS_CAP: usize = 200;

// ============================================================================
// SyncStatus
// ============================================================================

/// Status of the sync state machine for one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No run has ever been started
    #[default]
    Idle,
    /// A run owns the record
    Syncing,
    /// The last run finished without failed items
    Completed,
    /// The last run finished with at least one failed item
    CompletedWithErrors,
    /// Cancellation was requested for the last run
    Cancelled,
    /// The last run could not read or write its record, or was interrupted
    Failed,
}

impl SyncStatus {
    /// Every status, in state machine order
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::Idle,
        SyncStatus::Syncing,
        SyncStatus::Completed,
        SyncStatus::CompletedWithErrors,
        SyncStatus::Cancelled,
        SyncStatus::Failed,
    ];

    /// Stable string form, used for storage and display
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::CompletedWithErrors => "completed_with_errors",
            SyncStatus::Cancelled => "cancelled",
            SyncStatus::Failed => "failed",
        }
    }

    /// Returns true while a run owns the record
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }

    /// Returns true for the end states of a run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Idle | SyncStatus::Syncing)
    }

    /// Returns true if the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        match (self, next) {
            (
                SyncStatus::Syncing,
                SyncStatus::Cancelled
                | SyncStatus::Completed
                | SyncStatus::CompletedWithErrors
                | SyncStatus::Failed,
            ) => true,
            // The worker of a cancelled run still finalizes it (or fails it).
            (SyncStatus::Cancelled, SyncStatus::Cancelled | SyncStatus::Failed) => true,
            (current, SyncStatus::Syncing) => !current.is_syncing(),
            _ => false,
        }
    }

    /// Decides the status actually written when a worker finishes.
    ///
    /// A cancellation stored while the worker was finishing wins over a
    /// successful outcome; `failed` always wins.
    pub fn resolve_terminal(stored: SyncStatus, requested: SyncStatus) -> SyncStatus {
        match (stored, requested) {
            (
                SyncStatus::Cancelled,
                SyncStatus::Completed | SyncStatus::CompletedWithErrors,
            ) => SyncStatus::Cancelled,
            (_, requested) => requested,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::ValidationFailed(format!("Unknown sync status: {s}")))
    }
}

// ============================================================================
// Progress and failures
// ============================================================================

/// Progress counters of the current (or last) run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Items that settled successfully
    pub processed: u64,
    /// Items that settled as failed (including cancelled)
    pub failed: u64,
    /// Items dispatched in this run
    pub total: u64,
    /// Name of the item most recently settled
    pub current_item: String,
}

impl SyncProgress {
    /// Number of items that have settled either way
    pub fn settled(&self) -> u64 {
        self.processed + self.failed
    }

    /// Completion as a percentage (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.settled() as f64 / self.total as f64) * 100.0
    }
}

/// Why a single item did not make it into the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The content pipeline rejected or failed the item
    Processing,
    /// The remote source failed to deliver the item
    Remote,
    /// A remote or pipeline call exceeded its timeout
    Timeout,
    /// The item was short-circuited by a cancellation request
    Cancelled,
    /// A whole source root could not be enumerated
    Enumeration,
}

impl FailureKind {
    /// Stable string form
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Processing => "processing",
            FailureKind::Remote => "remote",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Enumeration => "enumeration",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the user-facing failure report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    name: String,
    error_kind: FailureKind,
    message: String,
}

impl FailedItem {
    /// Creates a new FailedItem
    pub fn new(name: impl Into<String>, error_kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_kind,
            message: message.into(),
        }
    }

    /// Creates the entry recorded for an item stopped by cancellation
    pub fn cancelled(name: impl Into<String>) -> Self {
        Self::new(name, FailureKind::Cancelled, CANCELLED_BY_USER)
    }

    /// Returns the item name (or source root, for enumeration failures)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the failure classification
    pub fn error_kind(&self) -> FailureKind {
        self.error_kind
    }

    /// Returns the human-readable error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if the item was stopped by cancellation
    pub fn is_cancelled(&self) -> bool {
        self.error_kind == FailureKind::Cancelled
    }
}

impl std::fmt::Display for FailedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.name, self.error_kind, self.message)
    }
}

/// Collects failed items for a run while keeping the list bounded.
///
/// Once `cap` entries are held, further failures are only counted. The
/// snapshot then replaces the last entry with a summary line, so the list
/// never exceeds `cap` and never silently hides that items were dropped.
#[derive(Debug, Clone)]
pub struct FailedItemLog {
    items: Vec<FailedItem>,
    dropped: u64,
    cap: usize,
}

impl FailedItemLog {
    /// Creates an empty log bounded to `cap` entries
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            dropped: 0,
            cap,
        }
    }

    /// Records one failure
    pub fn push(&mut self, item: FailedItem) {
        if self.items.len() < self.cap {
            self.items.push(item);
        } else {
            self.dropped += 1;
        }
    }

    /// Number of failures recorded, listed or not
    pub fn len(&self) -> u64 {
        self.items.len() as u64 + self.dropped
    }

    /// Returns true if nothing failed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bounded list as it should be persisted
    pub fn snapshot(&self) -> Vec<FailedItem> {
        let mut items = self.items.clone();
        if self.dropped > 0 {
            if let Some(displaced) = items.pop() {
                let count = self.dropped + 1;
                items.push(FailedItem::new(
                    format!("{count} more"),
                    displaced.error_kind,
                    format!("{count} further failures were not listed"),
                ));
            }
        }
        items
    }
}

// ============================================================================
// Store operation results
// ============================================================================

/// Result of a progress write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// The record now carries the new counters
    Applied,
    /// The write was dropped: the run was cancelled, replaced, or the
    /// counters were older than what is stored
    Discarded,
}

/// Everything a worker folds back into the record when a run ends
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalUpdate {
    /// Outcome decided by the worker
    pub status: SyncStatus,
    /// Checkpoints to persist for the next run
    pub delta_tokens: BTreeMap<SourceRootId, DeltaToken>,
    /// Bounded failure report
    pub failed_items: Vec<FailedItem>,
    /// Final counters
    pub progress: SyncProgress,
    /// Run-level failure reason, only meaningful with `failed`
    pub error: Option<String>,
}

// ============================================================================
// SyncRecord
// ============================================================================

/// The single persisted sync state of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    collection_id: CollectionId,
    status: SyncStatus,
    progress: SyncProgress,
    delta_tokens: BTreeMap<SourceRootId, DeltaToken>,
    failed_items: Vec<FailedItem>,
    run_id: Option<RunId>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Creates the initial `idle` record of a collection
    pub fn new(collection_id: CollectionId) -> Self {
        Self::new_at(collection_id, Utc::now())
    }

    /// Creates the initial `idle` record with an explicit write time
    pub fn new_at(collection_id: CollectionId, now: DateTime<Utc>) -> Self {
        Self {
            collection_id,
            status: SyncStatus::Idle,
            progress: SyncProgress::default(),
            delta_tokens: BTreeMap::new(),
            failed_items: Vec::new(),
            run_id: None,
            error: None,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Rebuilds a record from stored columns
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        collection_id: CollectionId,
        status: SyncStatus,
        progress: SyncProgress,
        delta_tokens: BTreeMap<SourceRootId, DeltaToken>,
        failed_items: Vec<FailedItem>,
        run_id: Option<RunId>,
        error: Option<String>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            collection_id,
            status,
            progress,
            delta_tokens,
            failed_items,
            run_id,
            error,
            started_at,
            finished_at,
            updated_at,
        }
    }

    // --- Getters ---

    /// Returns the collection this record belongs to
    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    /// Returns the current status
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Returns the progress counters
    pub fn progress(&self) -> &SyncProgress {
        &self.progress
    }

    /// Returns the persisted checkpoints per source root
    pub fn delta_tokens(&self) -> &BTreeMap<SourceRootId, DeltaToken> {
        &self.delta_tokens
    }

    /// Returns the checkpoint for one source root
    pub fn delta_token(&self, root: &SourceRootId) -> Option<&DeltaToken> {
        self.delta_tokens.get(root)
    }

    /// Returns the failure report of the current (or last) run
    pub fn failed_items(&self) -> &[FailedItem] {
        &self.failed_items
    }

    /// Returns the run that owns (or last owned) the record
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    /// Returns the run-level failure reason
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns when the current (or last) run started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the last run reached its terminal status
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Returns the last write time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // --- Transitions ---

    /// Moves `updated_at` forward, never backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Changes the status if the state machine allows it
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` for a disallowed transition
    pub fn transition_to(&mut self, next: SyncStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    /// Claims the record for a new run: `status → syncing`, progress reset
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if a run already owns the record
    pub fn begin_run(&mut self, run_id: RunId, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(SyncStatus::Syncing, now)?;
        self.progress = SyncProgress::default();
        self.failed_items.clear();
        self.run_id = Some(run_id);
        self.error = None;
        self.started_at = Some(now);
        self.finished_at = None;
        Ok(())
    }

    /// Applies a progress write from `run_id`.
    ///
    /// Writes are discarded once the record left `syncing` (in particular
    /// after a cancellation), when another run owns the record, or when
    /// the counters would move backwards.
    pub fn apply_progress(
        &mut self,
        run_id: RunId,
        progress: &SyncProgress,
        now: DateTime<Utc>,
    ) -> ProgressOutcome {
        if !self.status.is_syncing()
            || self.run_id != Some(run_id)
            || progress.settled() < self.progress.settled()
        {
            return ProgressOutcome::Discarded;
        }
        self.progress = progress.clone();
        self.touch(now);
        ProgressOutcome::Applied
    }

    /// Records an external cancellation request; returns false unless syncing
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_syncing() {
            return false;
        }
        self.status = SyncStatus::Cancelled;
        self.touch(now);
        true
    }

    /// Folds the end of a run into the record
    ///
    /// # Errors
    /// Returns `DomainError::RunMismatch` if `run_id` no longer owns the
    /// record, or `DomainError::InvalidState` if the record is not in a
    /// state a worker can finish from
    pub fn finish(
        &mut self,
        run_id: RunId,
        update: &TerminalUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.run_id != Some(run_id) {
            return Err(DomainError::RunMismatch {
                collection: self.collection_id.to_string(),
                run_id: run_id.to_string(),
            });
        }
        let resolved = SyncStatus::resolve_terminal(self.status, update.status);
        if !resolved.is_terminal() {
            return Err(DomainError::InvalidState {
                from: self.status.to_string(),
                to: resolved.to_string(),
            });
        }
        self.transition_to(resolved, now)?;
        self.delta_tokens = update.delta_tokens.clone();
        self.failed_items = update.failed_items.clone();
        self.progress = update.progress.clone();
        self.error = if resolved == SyncStatus::Failed {
            update.error.clone()
        } else {
            None
        };
        self.finished_at = Some(now);
        Ok(())
    }

    /// Fails a run whose worker is gone; returns false unless syncing
    pub fn mark_interrupted(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.status.is_syncing() {
            return false;
        }
        self.status = SyncStatus::Failed;
        self.error = Some(reason.into());
        self.finished_at = Some(now);
        self.touch(now);
        true
    }
}
