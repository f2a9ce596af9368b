//! Content pipeline port (driven/secondary port)
//!
//! The pipeline turns raw file bytes into searchable vectors inside a
//! collection. It is an external collaborator; the worker reaches it
//! through plain in-process trait calls.
//!
//! Two named operations carry the work, each with its own idempotence
//! contract:
//!
//! - [`IContentPipeline::extract`] runs full extraction and embedding for a
//!   file into a collection. Reporting duplicate content is not a failure.
//! - [`IContentPipeline::attach`] links already-processed content of a file
//!   to another collection without re-extracting. Attaching a file that is
//!   already attached succeeds.
//!
//! `lookup` and `detach` support planning and removals.

use thiserror::Error;

use crate::domain::newtypes::{CollectionId, ContentHash, FileId};

/// Input of a full extraction
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    /// Pipeline identity of the file
    pub file_id: FileId,
    /// Collection receiving the vectors
    pub collection_id: CollectionId,
    /// File name, used for type detection
    pub name: String,
    /// Remote path, when known
    pub path: Option<String>,
    /// Remote fingerprint to store alongside the processed content
    pub content_hash: Option<ContentHash>,
    /// Raw file content
    pub bytes: Vec<u8>,
}

/// Successful pipeline outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// New content was written
    Processed,
    /// Identical content was already present; nothing was written
    Duplicate,
}

/// What the pipeline already knows about a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    /// Fingerprint of the processed content
    pub content_hash: ContentHash,
    /// Collections that currently hold vectors for the file
    pub collections: Vec<CollectionId>,
}

impl ContentRecord {
    /// Returns true if `collection` already holds vectors for the file
    pub fn is_attached_to(&self, collection: &CollectionId) -> bool {
        self.collections.iter().any(|c| c == collection)
    }
}

/// Errors reported by the content pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The file is already attached to the collection
    #[error("File {0} is already attached to the collection")]
    AlreadyAttached(FileId),

    /// The content was already processed under another file
    #[error("Duplicate content for file {0}")]
    DuplicateContent(FileId),

    /// No processed content exists for the file
    #[error("No processed content for file {0}")]
    NotFound(FileId),

    /// The pipeline refused the file (unsupported type, extraction failure, ...)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The pipeline is not reachable
    #[error("Pipeline unavailable: {0}")]
    Unavailable(String),
}

/// Port for writing file content into collections
#[async_trait::async_trait]
pub trait IContentPipeline: Send + Sync {
    /// Returns the processed-content record of a file, if any
    async fn lookup(&self, file_id: &FileId) -> Result<Option<ContentRecord>, PipelineError>;

    /// Extracts, embeds and writes a file into a collection
    async fn extract(&self, request: ExtractRequest) -> Result<PipelineOutcome, PipelineError>;

    /// Attaches existing processed content of a file to a collection
    async fn attach(
        &self,
        file_id: &FileId,
        collection_id: &CollectionId,
    ) -> Result<PipelineOutcome, PipelineError>;

    /// Removes a file's vectors from a collection; a missing file is not an error
    async fn detach(
        &self,
        file_id: &FileId,
        collection_id: &CollectionId,
    ) -> Result<(), PipelineError>;
}
