//! Source roots and work items
//!
//! A `SourceRoot` names one remote location being mirrored (a drive, or a
//! folder inside it). A `WorkItem` is one remote file found by enumerating
//! the delta feed of a root; it is immutable for the lifetime of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, FileId, RemoteId, SourceRootId};

/// A remote location mirrored into a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRoot {
    /// Key of this root in `SyncRecord::delta_tokens`
    pub id: SourceRootId,
    /// Drive to read from; `None` means the signed-in user's default drive
    pub drive_id: Option<String>,
    /// Folder path inside the drive, e.g. `/Projects/Specs`; `None` means the drive root
    pub folder: Option<String>,
}

impl SourceRoot {
    /// A root covering the whole default drive
    pub fn new(id: SourceRootId) -> Self {
        Self {
            id,
            drive_id: None,
            folder: None,
        }
    }

    /// Targets a specific drive instead of the default one
    pub fn with_drive(mut self, drive_id: impl Into<String>) -> Self {
        self.drive_id = Some(drive_id.into());
        self
    }

    /// Restricts the root to a folder inside the drive
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }
}

/// One remote file due for evaluation in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Remote identity
    pub id: RemoteId,
    /// Root the item was enumerated from
    pub root: SourceRootId,
    /// File name
    pub name: String,
    /// Full remote path, when the provider reports one
    pub path: Option<String>,
    /// Content fingerprint; `None` forces a full extraction
    pub hash: Option<ContentHash>,
    /// Last remote modification
    pub modified_time: Option<DateTime<Utc>>,
    /// Size in bytes
    pub size: u64,
}

impl WorkItem {
    /// The identifier the content pipeline knows this file by
    pub fn file_id(&self) -> FileId {
        FileId::from(&self.id)
    }

    /// Label used in progress reports and failure lists
    pub fn display_name(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}
