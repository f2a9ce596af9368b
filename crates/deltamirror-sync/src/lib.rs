//! deltamirror Sync - Incremental remote-to-local synchronization
//!
//! This crate drives one sync run per collection:
//! - [`SessionGuard`] claims the collection's record atomically
//! - [`SyncWorker`] enumerates source roots, plans per-item actions and
//!   executes them on a bounded pool while polling for cancellation
//! - [`SyncStateStore`] is the only writer of sync records and publishes a
//!   [`SyncEvent`] after every accepted write
//! - [`SyncService`] ties them together for callers (start, cancel, status,
//!   subscribe, recovery, shutdown)

pub mod context;
pub mod guard;
pub mod planner;
pub mod retry;
pub mod service;
pub mod state;
pub mod worker;

pub use guard::{RunClaim, RunRequest, SessionGuard};
pub use retry::{with_retry, RetryPolicy};
pub use service::{CancelAck, RunHandle, SyncService};
pub use state::{SyncEvent, SyncEventKind, SyncStateStore};
pub use worker::{SyncWorker, WorkerSettings};

use deltamirror_core::domain::{CollectionId, FailureKind, RunId, SourceRootId};
use deltamirror_core::ports::{PipelineError, RemoteError, StoreError};
use thiserror::Error;

/// Errors surfaced by sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run already owns the collection
    #[error("sync already in progress for {collection}")]
    Conflict {
        collection: CollectionId,
        run_id: Option<RunId>,
    },

    /// The request was rejected before anything was claimed
    #[error("invalid sync request: {0}")]
    InvalidRequest(String),

    /// The stored checkpoint of a root is no longer accepted by the remote
    #[error("delta token expired for source root {0}")]
    TokenExpired(SourceRootId),

    /// A remote call failed after retries
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A single call exceeded the per-item timeout
    #[error("timed out: {0}")]
    Timeout(String),

    /// The content pipeline rejected an item
    #[error("item processing failed: {0}")]
    ItemProcessing(#[from] PipelineError),

    /// The sync record could not be read or written
    #[error("sync state store unavailable: {0}")]
    StoreUnavailable(String),

    /// The run was cancelled before the item could finish
    #[error("cancelled")]
    Cancelled,

    /// The worker task ended without reporting a result
    #[error("sync worker aborted: {0}")]
    WorkerAborted(String),
}

impl SyncError {
    /// Classification used in the failed item list
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Remote(RemoteError::Timeout(_)) | SyncError::Timeout(_) => {
                FailureKind::Timeout
            }
            SyncError::Remote(_) => FailureKind::Remote,
            SyncError::TokenExpired(_) => FailureKind::Enumeration,
            SyncError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Processing,
        }
    }

    /// Returns true if the whole run must stop and be marked `failed`
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::StoreUnavailable(_) | SyncError::WorkerAborted(_)
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::StoreUnavailable(err.to_string())
    }
}
