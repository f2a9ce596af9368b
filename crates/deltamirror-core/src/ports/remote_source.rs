//! Remote source port (driven/secondary port)
//!
//! Interface to a cloud storage provider exposing a delta (changefeed) API.
//! The primary adapter targets Microsoft Graph (`deltamirror-graph`); the
//! worker only depends on this trait.
//!
//! ## Design Notes
//!
//! - Errors are typed (`RemoteError`) rather than `anyhow`, because the
//!   worker must tell an expired delta token apart from generic I/O failure
//!   and decide what is worth retrying.
//! - Implementations hold no sync state: the delta token to resume from is
//!   passed in on every call.

use std::time::Duration;

use thiserror::Error;

use crate::domain::newtypes::{DeltaToken, RemoteId};
use crate::domain::work_item::{SourceRoot, WorkItem};

/// Access credentials handed in by the caller that starts a run
#[derive(Clone)]
pub struct AccessCredentials {
    access_token: String,
}

impl AccessCredentials {
    /// Wraps a bearer token
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    /// Returns the bearer token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for AccessCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessCredentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Changes of one source root since a checkpoint
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Files added or changed (folders are not reported)
    pub items: Vec<WorkItem>,
    /// Items removed since the checkpoint
    pub removed_ids: Vec<RemoteId>,
    /// Checkpoint to persist at the end of the run; `None` if the remote
    /// did not hand one out
    pub new_token: Option<DeltaToken>,
}

/// Errors reported by a remote source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The delta token is stale; the root must be re-enumerated from scratch
    #[error("Delta token expired")]
    TokenExpired,

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested item does not exist (anymore)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded; retry after the given duration
    #[error("Too many requests, retry after {retry_after:?}")]
    Throttled {
        /// Duration the server asked the client to wait
        retry_after: Duration,
    },

    /// The call did not finish within its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    Server(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    Network(String),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Returns true for failures that may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Throttled { .. }
                | RemoteError::Timeout(_)
                | RemoteError::Server(_)
                | RemoteError::Network(_)
        )
    }

    /// Server-provided backoff hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Port for listing remote changes and fetching file content
#[async_trait::async_trait]
pub trait IRemoteSource: Send + Sync {
    /// Lists every change under `root` since `token`, following pagination.
    ///
    /// `token = None` enumerates the whole root.
    ///
    /// # Errors
    /// Returns `RemoteError::TokenExpired` when the checkpoint is no longer
    /// accepted, distinct from every other failure.
    async fn list_changes(
        &self,
        root: &SourceRoot,
        token: Option<&DeltaToken>,
        credentials: &AccessCredentials,
    ) -> Result<ChangeSet, RemoteError>;

    /// Downloads the content of one file
    async fn fetch_bytes(
        &self,
        root: &SourceRoot,
        item_id: &RemoteId,
        credentials: &AccessCredentials,
    ) -> Result<Vec<u8>, RemoteError>;
}
