//! Domain entities and business logic
//!
//! - Newtypes for validated identifiers and opaque remote values
//! - The `SyncRecord` entity and its status state machine
//! - Source roots and work items produced by enumeration
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod record;
pub mod work_item;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::*;
pub use record::{
    FailedItem, FailedItemLog, FailureKind, ProgressOutcome, SyncProgress, SyncRecord, SyncStatus,
    TerminalUpdate, CANCELLED_BY_USER, DEFAULT_FAILED_ITEMS_CAP,
};
pub use work_item::{SourceRoot, WorkItem};
