//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their
//! implementations live in adapter crates or in the host application.
//!
//! ## Ports Overview
//!
//! - [`IRemoteSource`] - Delta enumeration and downloads (Microsoft Graph adapter)
//! - [`IContentPipeline`] - Extraction/embedding into collections (host-provided)
//! - [`ISyncRecordStore`] - Persisted per-collection sync state (SQLite and in-memory)

pub mod content_pipeline;
pub mod record_store;
pub mod remote_source;

pub use content_pipeline::{
    ContentRecord, ExtractRequest, IContentPipeline, PipelineError, PipelineOutcome,
};
pub use record_store::{ClaimOutcome, ISyncRecordStore, StoreError};
pub use remote_source::{AccessCredentials, ChangeSet, IRemoteSource, RemoteError};
