//! Fakes and fixtures shared by the sync scenarios

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Semaphore};

use deltamirror_core::config::{Config, ConfigBuilder};
use deltamirror_core::domain::{
    CollectionId, ContentHash, DeltaToken, FileId, ProgressOutcome, RemoteId, RunId, SourceRoot,
    SourceRootId, SyncProgress, SyncRecord, SyncStatus, TerminalUpdate, WorkItem,
};
use deltamirror_core::ports::{
    AccessCredentials, ChangeSet, ClaimOutcome, ContentRecord, ExtractRequest, IContentPipeline,
    IRemoteSource, ISyncRecordStore, PipelineError, PipelineOutcome, RemoteError, StoreError,
};
use deltamirror_store::MemorySyncRecordStore;
use deltamirror_sync::{SyncEvent, SyncEventKind, SyncService};

// ============================================================================
// Identifiers
// ============================================================================

pub fn collection(id: &str) -> CollectionId {
    CollectionId::new(id.to_string()).unwrap()
}

pub fn root_id(id: &str) -> SourceRootId {
    SourceRootId::new(id.to_string()).unwrap()
}

pub fn root(id: &str) -> SourceRoot {
    SourceRoot::new(root_id(id))
}

pub fn token(value: &str) -> DeltaToken {
    DeltaToken::new(value.to_string()).unwrap()
}

pub fn remote_id(id: &str) -> RemoteId {
    RemoteId::new(id.to_string()).unwrap()
}

pub fn hash(value: &str) -> ContentHash {
    ContentHash::new(value.to_string()).unwrap()
}

pub fn credentials() -> AccessCredentials {
    AccessCredentials::bearer("test-token")
}

/// A remote file whose hash is `h-{id}`
pub fn item(root: &str, id: &str) -> WorkItem {
    WorkItem {
        id: remote_id(id),
        root: root_id(root),
        name: format!("{id}.pdf"),
        path: Some(format!("/Docs/{id}.pdf")),
        hash: Some(hash(&format!("h-{id}"))),
        modified_time: None,
        size: 1024,
    }
}

pub fn items(root: &str, count: usize) -> Vec<WorkItem> {
    (0..count).map(|i| item(root, &format!("f{i}"))).collect()
}

// ============================================================================
// FakeRemote
// ============================================================================

/// Scripted answer of one source root
#[derive(Debug, Clone, Default)]
pub struct RootScript {
    pub items: Vec<WorkItem>,
    pub removed: Vec<RemoteId>,
    pub new_token: Option<DeltaToken>,
    /// Token the remote refuses as expired
    pub expired_token: Option<DeltaToken>,
    /// Error returned for every listing of the root
    pub fail: Option<RemoteError>,
}

pub struct FakeRemote {
    roots: Mutex<HashMap<SourceRootId, RootScript>>,
    list_calls: Mutex<Vec<(SourceRootId, Option<DeltaToken>)>>,
    fetch_failures: Mutex<HashMap<RemoteId, VecDeque<RemoteError>>>,
    gated: Mutex<HashSet<RemoteId>>,
    gate: Arc<Semaphore>,
    fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            roots: Mutex::new(HashMap::new()),
            list_calls: Mutex::new(Vec::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Arc::new(Semaphore::new(0)),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, root: &str, script: RootScript) {
        self.roots.lock().unwrap().insert(root_id(root), script);
    }

    /// Makes downloads of `id` wait until [`open_gate`](Self::open_gate)
    pub fn gate(&self, id: &RemoteId) {
        self.gated.lock().unwrap().insert(id.clone());
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1 << 20);
    }

    /// Queues errors returned by the next downloads of `id`
    pub fn fail_fetch(&self, id: &RemoteId, errors: Vec<RemoteError>) {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(id.clone(), errors.into());
    }

    pub fn list_calls(&self, root: &str) -> Vec<Option<DeltaToken>> {
        let root = root_id(root);
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == root)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IRemoteSource for FakeRemote {
    async fn list_changes(
        &self,
        root: &SourceRoot,
        token: Option<&DeltaToken>,
        _credentials: &AccessCredentials,
    ) -> Result<ChangeSet, RemoteError> {
        self.list_calls
            .lock()
            .unwrap()
            .push((root.id.clone(), token.cloned()));

        let script = self
            .roots
            .lock()
            .unwrap()
            .get(&root.id)
            .cloned()
            .unwrap_or_default();
        if let Some(err) = script.fail {
            return Err(err);
        }
        if token.is_some() && token == script.expired_token.as_ref() {
            return Err(RemoteError::TokenExpired);
        }
        Ok(ChangeSet {
            items: script.items,
            removed_ids: script.removed,
            new_token: script.new_token,
        })
    }

    async fn fetch_bytes(
        &self,
        _root: &SourceRoot,
        item_id: &RemoteId,
        _credentials: &AccessCredentials,
    ) -> Result<Vec<u8>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let queued = self
            .fetch_failures
            .lock()
            .unwrap()
            .get_mut(item_id)
            .and_then(VecDeque::pop_front);
        if let Some(err) = queued {
            return Err(err);
        }

        let gated = self.gated.lock().unwrap().contains(item_id);
        if gated {
            let _permit = self.gate.acquire().await.unwrap();
        }
        Ok(format!("content of {item_id}").into_bytes())
    }
}

// ============================================================================
// FakePipeline
// ============================================================================

#[derive(Default)]
pub struct FakePipeline {
    records: Mutex<HashMap<FileId, ContentRecord>>,
    extracted: Mutex<Vec<(FileId, CollectionId)>>,
    attached: Mutex<Vec<(FileId, CollectionId)>>,
    detached: Mutex<Vec<(FileId, CollectionId)>>,
    rejected_names: Mutex<HashSet<String>>,
    extract_delay: Mutex<Option<Duration>>,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends `item` was already processed into `collections`
    pub fn seed(&self, item: &WorkItem, collections: &[&str]) {
        self.records.lock().unwrap().insert(
            item.file_id(),
            ContentRecord {
                content_hash: item.hash.clone().unwrap(),
                collections: collections.iter().map(|c| collection(c)).collect(),
            },
        );
    }

    pub fn reject(&self, name: &str) {
        self.rejected_names.lock().unwrap().insert(name.to_string());
    }

    pub fn delay_extract(&self, delay: Duration) {
        *self.extract_delay.lock().unwrap() = Some(delay);
    }

    pub fn extracted(&self) -> usize {
        self.extracted.lock().unwrap().len()
    }

    pub fn attached(&self) -> Vec<(FileId, CollectionId)> {
        self.attached.lock().unwrap().clone()
    }

    pub fn detached(&self) -> Vec<(FileId, CollectionId)> {
        self.detached.lock().unwrap().clone()
    }

    pub fn collections_of(&self, item: &WorkItem) -> Vec<CollectionId> {
        self.records
            .lock()
            .unwrap()
            .get(&item.file_id())
            .map(|r| r.collections.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl IContentPipeline for FakePipeline {
    async fn lookup(&self, file_id: &FileId) -> Result<Option<ContentRecord>, PipelineError> {
        Ok(self.records.lock().unwrap().get(file_id).cloned())
    }

    async fn extract(&self, request: ExtractRequest) -> Result<PipelineOutcome, PipelineError> {
        let delay = *self.extract_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected_names.lock().unwrap().contains(&request.name) {
            return Err(PipelineError::Rejected(format!(
                "unsupported content in {}",
                request.name
            )));
        }

        let content_hash = request
            .content_hash
            .clone()
            .unwrap_or_else(|| hash(&format!("bytes-{}", request.bytes.len())));
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(request.file_id.clone())
            .or_insert_with(|| ContentRecord {
                content_hash: content_hash.clone(),
                collections: Vec::new(),
            });
        record.content_hash = content_hash;
        if !record.is_attached_to(&request.collection_id) {
            record.collections.push(request.collection_id.clone());
        }
        self.extracted
            .lock()
            .unwrap()
            .push((request.file_id, request.collection_id));
        Ok(PipelineOutcome::Processed)
    }

    async fn attach(
        &self,
        file_id: &FileId,
        collection_id: &CollectionId,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(file_id)
            .ok_or_else(|| PipelineError::NotFound(file_id.clone()))?;
        if record.is_attached_to(collection_id) {
            return Err(PipelineError::AlreadyAttached(file_id.clone()));
        }
        record.collections.push(collection_id.clone());
        self.attached
            .lock()
            .unwrap()
            .push((file_id.clone(), collection_id.clone()));
        Ok(PipelineOutcome::Processed)
    }

    async fn detach(
        &self,
        file_id: &FileId,
        collection_id: &CollectionId,
    ) -> Result<(), PipelineError> {
        if let Some(record) = self.records.lock().unwrap().get_mut(file_id) {
            record.collections.retain(|c| c != collection_id);
        }
        self.detached
            .lock()
            .unwrap()
            .push((file_id.clone(), collection_id.clone()));
        Ok(())
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// Memory store whose progress writes fail on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySyncRecordStore,
    fail_progress: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    pub fn failing_progress() -> Self {
        let store = Self::default();
        store.fail_progress.store(true, Ordering::SeqCst);
        store
    }
}

#[async_trait::async_trait]
impl ISyncRecordStore for FlakyStore {
    async fn get(&self, collection: &CollectionId) -> Result<Option<SyncRecord>, StoreError> {
        self.inner.get(collection).await
    }

    async fn compare_and_set_status(
        &self,
        collection: &CollectionId,
        expected: &[SyncStatus],
        next: SyncStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .compare_and_set_status(collection, expected, next, now)
            .await
    }

    async fn claim_run(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        self.inner.claim_run(collection, run_id, now).await
    }

    async fn update_progress(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        progress: &SyncProgress,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome, StoreError> {
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is locked".into()));
        }
        self.inner
            .update_progress(collection, run_id, progress, now)
            .await
    }

    async fn set_terminal(
        &self,
        collection: &CollectionId,
        run_id: RunId,
        update: &TerminalUpdate,
        now: DateTime<Utc>,
    ) -> Result<SyncRecord, StoreError> {
        self.inner.set_terminal(collection, run_id, update, now).await
    }

    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CollectionId>, StoreError> {
        self.inner.recover_interrupted(stale_before, reason, now).await
    }
}

// ============================================================================
// Service fixtures
// ============================================================================

pub fn config() -> Config {
    ConfigBuilder::new()
        .max_concurrency(3)
        .retry_base_delay_ms(1)
        .build()
}

pub struct Harness {
    pub service: SyncService,
    pub remote: Arc<FakeRemote>,
    pub pipeline: Arc<FakePipeline>,
    pub store: Arc<dyn ISyncRecordStore>,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MemorySyncRecordStore::new()), config())
}

pub fn harness_with(store: Arc<dyn ISyncRecordStore>, config: Config) -> Harness {
    let remote = Arc::new(FakeRemote::new());
    let pipeline = Arc::new(FakePipeline::new());
    let service = SyncService::new(
        Arc::clone(&store),
        Arc::clone(&remote) as Arc<dyn IRemoteSource>,
        Arc::clone(&pipeline) as Arc<dyn IContentPipeline>,
        &config,
    );
    Harness {
        service,
        remote,
        pipeline,
        store,
    }
}

/// A finished record holding the given checkpoints
pub fn completed_record(
    collection_id: &str,
    tokens: &[(&str, &str)],
) -> SyncRecord {
    let delta_tokens: BTreeMap<_, _> = tokens
        .iter()
        .map(|(root, value)| (root_id(root), token(value)))
        .collect();
    SyncRecord::from_parts(
        collection(collection_id),
        SyncStatus::Completed,
        SyncProgress::default(),
        delta_tokens,
        Vec::new(),
        Some(RunId::new()),
        None,
        Some(Utc::now()),
        Some(Utc::now()),
        Utc::now(),
    )
}

/// Waits for the first progress event matching `predicate`
pub async fn wait_for_progress(
    events: &mut broadcast::Receiver<SyncEvent>,
    predicate: impl Fn(&SyncProgress) -> bool,
) -> SyncRecord {
    loop {
        let event = events.recv().await.unwrap();
        if event.kind == SyncEventKind::Progress && predicate(event.record.progress()) {
            return event.record;
        }
    }
}
