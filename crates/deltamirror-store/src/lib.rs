//! deltamirror Store - Persisted sync state
//!
//! Implementations of the `ISyncRecordStore` port from `deltamirror-core`:
//!
//! - [`SqliteSyncRecordStore`] keeps one row per collection in SQLite and
//!   encodes every state machine rule as a single conditional statement, so
//!   concurrent claims, cancellations and worker writes never interleave
//!   inside one operation.
//! - [`MemorySyncRecordStore`] keeps records in a concurrent map and applies
//!   the domain methods under the per-entry lock. Used by tests and by hosts
//!   that do not need durability.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use deltamirror_store::{SqliteSyncRecordStore, StateDatabase};
//!
//! # async fn example() -> Result<(), deltamirror_store::DatabaseError> {
//! let pool = StateDatabase::open(Path::new("/home/user/.local/share/deltamirror/state.db")).await?;
//! let store = SqliteSyncRecordStore::new(pool.pool().clone());
//! // Use store as ISyncRecordStore...
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod pool;
pub mod sqlite;

pub use memory::MemorySyncRecordStore;
pub use pool::StateDatabase;
pub use sqlite::SqliteSyncRecordStore;

use deltamirror_core::ports::StoreError;

/// Errors raised by the SQLite backend before they reach the port
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored column could not be mapped to a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::QueryFailed(e.to_string())
    }
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::SerializationError(msg) => StoreError::Corrupt(msg),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
