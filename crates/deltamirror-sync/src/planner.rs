//! Per-item planning
//!
//! Turns the change sets of all source roots into the list of tasks a run
//! dispatches. Each changed file is looked up in the content pipeline and
//! classified:
//!
//! | pipeline knows the file         | hash matches | attached here | action  |
//! |---------------------------------|--------------|---------------|---------|
//! | no                              | -            | -             | extract |
//! | yes                             | no / unknown | -             | extract |
//! | yes                             | yes          | yes           | skip    |
//! | yes, attached elsewhere         | yes          | no            | attach  |
//! | yes, attached nowhere           | yes          | no            | extract |
//!
//! Removed items become detach tasks. Skipped items are not dispatched and
//! do not count toward the run's total.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use deltamirror_core::domain::{CollectionId, FileId, RemoteId, SourceRoot, WorkItem};
use deltamirror_core::ports::{ChangeSet, ContentRecord, IContentPipeline};

/// What a task does with its item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Download and run the full pipeline
    Extract(WorkItem),
    /// Reuse content already processed for another collection
    Attach(WorkItem),
    /// Remove the file's vectors from the collection
    Detach(RemoteId),
}

/// One unit of work dispatched to the pool
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub root: Arc<SourceRoot>,
    pub action: TaskAction,
}

impl SyncTask {
    /// Label used in progress and failure reports
    pub fn name(&self) -> String {
        match &self.action {
            TaskAction::Extract(item) | TaskAction::Attach(item) => item.display_name().to_string(),
            TaskAction::Detach(id) => format!("{}:{}", self.root.id, id),
        }
    }

    /// Pipeline identity of the task's file
    pub fn file_id(&self) -> FileId {
        match &self.action {
            TaskAction::Extract(item) | TaskAction::Attach(item) => item.file_id(),
            TaskAction::Detach(id) => FileId::from(id),
        }
    }
}

/// Result of planning a run
#[derive(Debug, Default)]
pub struct RunPlan {
    pub tasks: Vec<SyncTask>,
    /// Items already attached to the collection with identical content
    pub skipped: usize,
}

/// Decides the action for one changed file
pub fn classify(
    item: &WorkItem,
    known: Option<&ContentRecord>,
    collection: &CollectionId,
) -> Option<TaskAction> {
    let Some(record) = known else {
        return Some(TaskAction::Extract(item.clone()));
    };

    let unchanged = item
        .hash
        .as_ref()
        .is_some_and(|hash| *hash == record.content_hash);
    if !unchanged {
        return Some(TaskAction::Extract(item.clone()));
    }

    if record.is_attached_to(collection) {
        None
    } else if record.collections.is_empty() {
        Some(TaskAction::Extract(item.clone()))
    } else {
        Some(TaskAction::Attach(item.clone()))
    }
}

/// Builds the task list for a run
///
/// Lookups run concurrently, bounded by `concurrency`; tasks keep the
/// order in which the remote reported the items. A lookup that fails
/// or exceeds `timeout` falls back to a full extraction, which reports its
/// own error if the pipeline is really down.
pub async fn plan_run(
    pipeline: &dyn IContentPipeline,
    collection: &CollectionId,
    changes: Vec<(Arc<SourceRoot>, ChangeSet)>,
    concurrency: usize,
    timeout: Duration,
) -> RunPlan {
    let mut seen: HashSet<FileId> = HashSet::new();
    let mut upserts = Vec::new();
    let mut removals = Vec::new();

    for (root, change_set) in changes {
        for item in change_set.items {
            if seen.insert(item.file_id()) {
                upserts.push((Arc::clone(&root), item));
            } else {
                debug!(item = %item.id, "Item reported by more than one root, keeping first");
            }
        }
        for id in change_set.removed_ids {
            removals.push((Arc::clone(&root), id));
        }
    }

    let classified: Vec<Option<SyncTask>> = stream::iter(upserts)
        .map(move |(root, item)| async move {
            let file_id = item.file_id();
            let known = match tokio::time::timeout(timeout, pipeline.lookup(&file_id)).await {
                Ok(Ok(known)) => known,
                Ok(Err(err)) => {
                    warn!(item = %item.id, error = %err, "Content lookup failed, extracting");
                    None
                }
                Err(_) => {
                    warn!(item = %item.id, "Content lookup timed out, extracting");
                    None
                }
            };
            classify(&item, known.as_ref(), collection).map(|action| SyncTask { root, action })
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut plan = RunPlan::default();
    for task in classified {
        match task {
            Some(task) => plan.tasks.push(task),
            None => plan.skipped += 1,
        }
    }

    for (root, id) in removals {
        // A file re-added in the same window wins over its removal
        if seen.contains(&FileId::from(&id)) {
            continue;
        }
        plan.tasks.push(SyncTask {
            root,
            action: TaskAction::Detach(id),
        });
    }

    debug!(
        %collection,
        tasks = plan.tasks.len(),
        skipped = plan.skipped,
        "Run planned"
    );
    plan
}
