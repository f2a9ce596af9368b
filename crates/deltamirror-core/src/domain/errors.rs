//! Domain error types
//!
//! Validation failures for identifiers and rejected status transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid collection identifier
    #[error("Invalid collection ID: {0}")]
    InvalidCollectionId(String),

    /// Invalid source root identifier
    #[error("Invalid source root ID: {0}")]
    InvalidSourceRootId(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// Invalid content hash
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid delta token
    #[error("Invalid delta token: {0}")]
    InvalidDeltaToken(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// A write was attempted on behalf of a run that no longer owns the record
    #[error("Run {run_id} does not own the record for {collection}")]
    RunMismatch {
        /// Collection whose record was targeted
        collection: String,
        /// The run that attempted the write
        run_id: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
