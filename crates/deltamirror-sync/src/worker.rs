//! Sync worker
//!
//! Runs one claimed sync to completion:
//!
//! 1. **Enumerate**: list changes per source root since its stored delta
//!    token. An expired token triggers a full rescan of that root; any other
//!    failure is reported and the root keeps its previous token.
//! 2. **Plan**: classify every changed file (see [`planner`](crate::planner)).
//! 3. **Dispatch**: run tasks on a pool bounded by a per-run semaphore,
//!    checking for cancellation before admission, after acquiring a slot,
//!    and again between download and pipeline. A watcher polls the record
//!    meanwhile, so retry backoffs end as soon as the run is cancelled.
//! 4. **Finish**: after every task has settled, write the terminal status
//!    together with the merged delta tokens.
//!
//! Per-item failures never abort the run. Only a failure of the sync state
//! store is fatal, and ends the run as `failed`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use deltamirror_core::config::Config;
use deltamirror_core::domain::{
    DeltaToken, FailedItem, FailureKind, FileId, RemoteId, SourceRoot, SourceRootId, SyncRecord,
    SyncStatus, TerminalUpdate, WorkItem,
};
use deltamirror_core::ports::{
    AccessCredentials, ChangeSet, ExtractRequest, IContentPipeline, IRemoteSource, PipelineError,
    RemoteError,
};

use crate::context::RunContext;
use crate::guard::{RunClaim, RunRequest};
use crate::planner::{plan_run, SyncTask, TaskAction};
use crate::retry::{with_retry, RetryPolicy};
use crate::state::SyncStateStore;
use crate::SyncError;

/// Tuning of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Tasks of one run allowed in flight at once
    pub max_concurrency: usize,
    /// Limit for each remote or pipeline call
    pub item_timeout: Duration,
    /// Entries kept in the failed item list
    pub failed_items_cap: usize,
    /// Backoff for transient remote failures
    pub retry: RetryPolicy,
    /// Period of the background cancellation check
    pub cancel_poll_interval: Duration,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.sync.max_concurrency,
            item_timeout: config.sync.item_timeout(),
            failed_items_cap: config.sync.failed_items_cap,
            retry: RetryPolicy::from(&config.retry),
            cancel_poll_interval: config.sync.cancel_poll_interval(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

type Enumeration = (
    Vec<(Arc<SourceRoot>, ChangeSet)>,
    BTreeMap<SourceRootId, DeltaToken>,
);

/// Executes sync runs
#[derive(Clone)]
pub struct SyncWorker {
    remote: Arc<dyn IRemoteSource>,
    pipeline: Arc<dyn IContentPipeline>,
    state: Arc<SyncStateStore>,
    settings: WorkerSettings,
}

impl SyncWorker {
    pub fn new(
        remote: Arc<dyn IRemoteSource>,
        pipeline: Arc<dyn IContentPipeline>,
        state: Arc<SyncStateStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            remote,
            pipeline,
            state,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Runs a claimed sync and returns the record as finally written
    ///
    /// # Errors
    /// Returns `SyncError::StoreUnavailable` only if the terminal status
    /// itself could not be written; the record then stays `syncing` until
    /// interrupted-run recovery fails it.
    #[instrument(
        skip_all,
        fields(collection = %request.collection_id, run_id = %claim.run_id)
    )]
    pub async fn run(
        &self,
        request: RunRequest,
        claim: RunClaim,
        credentials: AccessCredentials,
        shutdown: CancellationToken,
    ) -> Result<SyncRecord, SyncError> {
        let ctx = Arc::new(RunContext::new(
            request.collection_id.clone(),
            claim.run_id,
            self.settings.max_concurrency,
            self.settings.failed_items_cap,
            Arc::clone(&self.state),
            shutdown,
        ));
        let credentials = Arc::new(credentials);
        let watcher = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            let every = self.settings.cancel_poll_interval;
            async move { ctx.watch_cancellation(every).await }
        });

        let (changes, tokens) = match self
            .enumerate(&ctx, &request.sources, &claim.record, &credentials)
            .await
        {
            Ok(enumeration) => enumeration,
            Err(err) => {
                ctx.record_fatal(&err);
                (Vec::new(), claim.record.delta_tokens().clone())
            }
        };

        if ctx.fatal_error().is_none() {
            let plan = plan_run(
                self.pipeline.as_ref(),
                ctx.collection_id(),
                changes,
                self.settings.max_concurrency,
                self.settings.item_timeout,
            )
            .await;
            info!(
                tasks = plan.tasks.len(),
                skipped = plan.skipped,
                "Dispatching sync tasks"
            );
            self.dispatch(&ctx, plan.tasks, &credentials).await;
        }

        watcher.abort();
        self.finish(&ctx, tokens).await
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    async fn enumerate(
        &self,
        ctx: &RunContext,
        sources: &[SourceRoot],
        record: &SyncRecord,
        credentials: &AccessCredentials,
    ) -> Result<Enumeration, SyncError> {
        let mut tokens = record.delta_tokens().clone();
        let mut changes = Vec::with_capacity(sources.len());

        for root in sources {
            if ctx.observe_cancelled().await? {
                info!(root = %root.id, "Cancelled before enumerating remaining roots");
                break;
            }

            let previous = record.delta_token(&root.id);
            match self.list_root(ctx, root, previous, credentials).await {
                Ok(change_set) => {
                    debug!(
                        root = %root.id,
                        items = change_set.items.len(),
                        removed = change_set.removed_ids.len(),
                        "Root enumerated"
                    );
                    if let Some(token) = &change_set.new_token {
                        tokens.insert(root.id.clone(), token.clone());
                    }
                    changes.push((Arc::new(root.clone()), change_set));
                }
                Err(_) if ctx.cancellation().is_cancelled() => {
                    ctx.observe_cancelled().await?;
                    info!(root = %root.id, "Cancelled while enumerating");
                    break;
                }
                Err(err) => {
                    warn!(root = %root.id, error = %err, "Enumeration failed, keeping previous token");
                    ctx.record_run_failure(FailedItem::new(
                        root.id.as_str(),
                        FailureKind::Enumeration,
                        err.to_string(),
                    ));
                }
            }
        }
        Ok((changes, tokens))
    }

    /// Lists one root, falling back to a full rescan if its token expired
    ///
    /// A root whose rescan is rejected with an expired token as well
    /// reports `SyncError::TokenExpired`.
    async fn list_root(
        &self,
        ctx: &RunContext,
        root: &SourceRoot,
        previous: Option<&DeltaToken>,
        credentials: &AccessCredentials,
    ) -> Result<ChangeSet, SyncError> {
        let listed = match self.list_with_retry(ctx, root, previous, credentials).await {
            Err(RemoteError::TokenExpired) if previous.is_some() => {
                warn!(root = %root.id, "Delta token expired, performing full rescan");
                self.list_with_retry(ctx, root, None, credentials).await
            }
            other => other,
        };
        listed.map_err(|err| match err {
            RemoteError::TokenExpired => SyncError::TokenExpired(root.id.clone()),
            other => SyncError::from(other),
        })
    }

    async fn list_with_retry(
        &self,
        ctx: &RunContext,
        root: &SourceRoot,
        token: Option<&DeltaToken>,
        credentials: &AccessCredentials,
    ) -> Result<ChangeSet, RemoteError> {
        let remote = self.remote.as_ref();
        let timeout = self.settings.item_timeout;
        let interrupt = ctx.cancellation();
        with_retry(&self.settings.retry, "list_changes", interrupt, move || async move {
            tokio::time::timeout(timeout, remote.list_changes(root, token, credentials))
                .await
                .unwrap_or_else(|_| {
                    Err(RemoteError::Timeout(format!(
                        "listing {} exceeded {}s",
                        root.id,
                        timeout.as_secs()
                    )))
                })
        })
        .await
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn dispatch(
        &self,
        ctx: &Arc<RunContext>,
        tasks: Vec<SyncTask>,
        credentials: &Arc<AccessCredentials>,
    ) {
        let progress = ctx.set_total(tasks.len() as u64);
        if let Err(err) = ctx.publish_progress(&progress).await {
            ctx.record_fatal(&err);
            return;
        }

        let limiter = ctx.limiter();
        let mut in_flight = JoinSet::new();

        for task in tasks {
            if ctx.fatal_error().is_some() {
                break;
            }

            match ctx.observe_cancelled().await {
                Ok(false) => {}
                Ok(true) => {
                    self.settle_cancelled(ctx, &task).await;
                    continue;
                }
                Err(err) => {
                    ctx.record_fatal(&err);
                    break;
                }
            }

            let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
                break;
            };

            match ctx.observe_cancelled().await {
                Ok(false) => {}
                Ok(true) => {
                    drop(permit);
                    self.settle_cancelled(ctx, &task).await;
                    continue;
                }
                Err(err) => {
                    ctx.record_fatal(&err);
                    break;
                }
            }

            let worker = self.clone();
            let ctx = Arc::clone(ctx);
            let credentials = Arc::clone(credentials);
            in_flight.spawn(async move {
                let _permit = permit;
                worker.run_task(&ctx, task, &credentials).await
            });
        }

        // Barrier: nothing is finalized while a task is still running
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "Sync state store failed, aborting run");
                    ctx.record_fatal(&err);
                }
                Err(join_err) => {
                    error!(error = %join_err, "Sync task panicked");
                    let progress = ctx.record_failure(FailedItem::new(
                        "<task>",
                        FailureKind::Processing,
                        join_err.to_string(),
                    ));
                    if let Err(err) = ctx.publish_progress(&progress).await {
                        ctx.record_fatal(&err);
                    }
                }
            }
        }
    }

    async fn settle_cancelled(&self, ctx: &RunContext, task: &SyncTask) {
        let progress = ctx.record_failure(FailedItem::cancelled(task.name()));
        // The record is no longer ours to update, so this write is normally
        // discarded; it still matters for shutdown, where the record stays
        // `syncing` until the terminal write.
        if let Err(err) = ctx.publish_progress(&progress).await {
            ctx.record_fatal(&err);
        }
    }

    /// Executes one task and settles its counters
    async fn run_task(
        &self,
        ctx: &RunContext,
        task: SyncTask,
        credentials: &AccessCredentials,
    ) -> Result<(), SyncError> {
        let name = task.name();
        let result = match &task.action {
            TaskAction::Extract(item) => self.extract(ctx, &task.root, item, credentials).await,
            TaskAction::Attach(item) => self.attach(ctx, item).await,
            TaskAction::Detach(id) => self.detach(ctx, id).await,
        };

        let progress = match result {
            Ok(()) => ctx.record_success(&name),
            Err(err) if err.is_fatal() => return Err(err),
            Err(SyncError::Cancelled) => ctx.record_failure(FailedItem::cancelled(&name)),
            Err(err) => {
                warn!(item = %name, error = %err, "Item failed");
                ctx.record_failure(FailedItem::new(&name, err.failure_kind(), err.to_string()))
            }
        };

        ctx.publish_progress(&progress).await?;
        Ok(())
    }

    async fn extract(
        &self,
        ctx: &RunContext,
        root: &SourceRoot,
        item: &WorkItem,
        credentials: &AccessCredentials,
    ) -> Result<(), SyncError> {
        let remote = self.remote.as_ref();
        let timeout = self.settings.item_timeout;
        let fetched = with_retry(
            &self.settings.retry,
            "fetch_bytes",
            ctx.cancellation(),
            move || async move {
                tokio::time::timeout(timeout, remote.fetch_bytes(root, &item.id, credentials))
                    .await
                    .unwrap_or_else(|_| {
                        Err(RemoteError::Timeout(format!(
                            "download of {} exceeded {}s",
                            item.id,
                            timeout.as_secs()
                        )))
                    })
            },
        )
        .await;
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(_) if ctx.cancellation().is_cancelled() && ctx.observe_cancelled().await? => {
                return Err(SyncError::Cancelled);
            }
            Err(err) => return Err(err.into()),
        };

        // Last chance to stop before the expensive part
        if ctx.observe_cancelled().await? {
            return Err(SyncError::Cancelled);
        }

        let request = ExtractRequest {
            file_id: item.file_id(),
            collection_id: ctx.collection_id().clone(),
            name: item.name.clone(),
            path: item.path.clone(),
            content_hash: item.hash.clone(),
            bytes,
        };
        match self.within("extract", self.pipeline.extract(request)).await? {
            Ok(outcome) => {
                debug!(item = %item.id, ?outcome, "Item extracted");
                Ok(())
            }
            Err(PipelineError::DuplicateContent(_)) => {
                debug!(item = %item.id, "Content already present");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn attach(&self, ctx: &RunContext, item: &WorkItem) -> Result<(), SyncError> {
        let file_id = item.file_id();
        match self
            .within("attach", self.pipeline.attach(&file_id, ctx.collection_id()))
            .await?
        {
            Ok(_) | Err(PipelineError::AlreadyAttached(_)) => {
                debug!(item = %item.id, "Attached existing content");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn detach(&self, ctx: &RunContext, id: &RemoteId) -> Result<(), SyncError> {
        let file_id = FileId::from(id);
        match self
            .within("detach", self.pipeline.detach(&file_id, ctx.collection_id()))
            .await?
        {
            Ok(()) | Err(PipelineError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Bounds a pipeline call by the item timeout
    async fn within<T>(&self, operation: &str, call: impl Future<Output = T>) -> Result<T, SyncError> {
        tokio::time::timeout(self.settings.item_timeout, call)
            .await
            .map_err(|_| {
                SyncError::Timeout(format!(
                    "{operation} exceeded {}s",
                    self.settings.item_timeout.as_secs()
                ))
            })
    }

    // ------------------------------------------------------------------
    // Terminal write
    // ------------------------------------------------------------------

    async fn finish(
        &self,
        ctx: &RunContext,
        delta_tokens: BTreeMap<SourceRootId, DeltaToken>,
    ) -> Result<SyncRecord, SyncError> {
        let (status, error) = match ctx.fatal_error() {
            Some(reason) => (SyncStatus::Failed, Some(reason)),
            None if ctx.is_cancelled() => (SyncStatus::Cancelled, None),
            None if ctx.has_failures() => (SyncStatus::CompletedWithErrors, None),
            None => (SyncStatus::Completed, None),
        };

        let update = TerminalUpdate {
            status,
            delta_tokens,
            failed_items: ctx.failed_items(),
            progress: ctx.progress(),
            error,
        };

        self.state
            .finish(ctx.collection_id(), ctx.run_id(), &update)
            .await
            .map_err(|err| {
                error!(error = %err, status = %status, "Could not write sync outcome");
                err
            })
    }
}
