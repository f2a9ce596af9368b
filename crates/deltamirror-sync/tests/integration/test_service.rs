//! Service surface: status, events, validation, recovery and shared stores

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use deltamirror_core::config::ConfigBuilder;
use deltamirror_core::domain::{RunId, SyncProgress, SyncRecord, SyncStatus};
use deltamirror_core::ports::ISyncRecordStore;
use deltamirror_store::{MemorySyncRecordStore, SqliteSyncRecordStore, StateDatabase};
use deltamirror_sync::{SyncError, SyncEventKind};

use crate::common::{self, RootScript};

fn syncing_record(collection: &str, touched: chrono::DateTime<Utc>) -> SyncRecord {
    let mut tokens = BTreeMap::new();
    tokens.insert(common::root_id("drive"), common::token("t-old"));
    SyncRecord::from_parts(
        common::collection(collection),
        SyncStatus::Syncing,
        SyncProgress {
            processed: 4,
            failed: 0,
            total: 9,
            current_item: "/Docs/f3.pdf".to_string(),
        },
        tokens,
        Vec::new(),
        Some(RunId::new()),
        None,
        Some(touched),
        None,
        touched,
    )
}

#[tokio::test]
async fn test_unknown_collection_reports_idle() {
    let h = common::harness();
    let record = h
        .service
        .get_status(&common::collection("never-synced"))
        .await
        .unwrap();

    assert_eq!(record.status(), SyncStatus::Idle);
    assert!(record.delta_tokens().is_empty());
    assert!(record.run_id().is_none());
}

#[tokio::test]
async fn test_subscribers_receive_the_terminal_record() {
    let h = common::harness();
    h.remote.script(
        "drive",
        RootScript {
            items: common::items("drive", 2),
            new_token: Some(common::token("t1")),
            ..Default::default()
        },
    );
    let mut events = h.service.subscribe();

    let record = h
        .service
        .start_run(
            common::collection("docs"),
            vec![common::root("drive")],
            common::credentials(),
        )
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let mut progress_events = 0;
    let terminal = loop {
        let event = events.recv().await.unwrap();
        match event.kind {
            SyncEventKind::Progress => {
                progress_events += 1;
                assert_eq!(event.record.status(), SyncStatus::Syncing);
            }
            SyncEventKind::Terminal => break event,
        }
    };
    assert!(progress_events >= 1);
    assert_eq!(terminal.record, record);
    assert_eq!(terminal.collection_id(), &common::collection("docs"));
}

#[tokio::test]
async fn test_invalid_requests_claim_nothing() {
    let h = common::harness();
    let docs = common::collection("docs");

    let empty = h
        .service
        .start_run(docs.clone(), Vec::new(), common::credentials())
        .await;
    assert!(matches!(empty, Err(SyncError::InvalidRequest(_))));

    let duplicated = h
        .service
        .start_run(
            docs.clone(),
            vec![common::root("drive"), common::root("drive")],
            common::credentials(),
        )
        .await;
    assert!(matches!(duplicated, Err(SyncError::InvalidRequest(_))));

    assert_eq!(
        h.service.get_status(&docs).await.unwrap().status(),
        SyncStatus::Idle
    );
}

#[tokio::test]
async fn test_recovery_threshold_follows_configuration() {
    let store = MemorySyncRecordStore::new();
    store.insert(syncing_record("quiet", Utc::now() - Duration::minutes(5)));
    let config = ConfigBuilder::new().stale_run_after_secs(60).build();
    let h = common::harness_with(Arc::new(store), config);

    let recovered = h.service.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![common::collection("quiet")]);
}

#[tokio::test]
async fn test_recovery_fails_stale_runs_only() {
    let store = MemorySyncRecordStore::new();
    store.insert(syncing_record("crashed", Utc::now() - Duration::hours(2)));
    store.insert(syncing_record("live", Utc::now()));
    let h = common::harness_with(Arc::new(store), common::config());

    let recovered = h.service.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![common::collection("crashed")]);

    let crashed = h
        .service
        .get_status(&common::collection("crashed"))
        .await
        .unwrap();
    assert_eq!(crashed.status(), SyncStatus::Failed);
    assert_eq!(crashed.error(), Some("run interrupted"));
    assert_eq!(
        crashed.delta_token(&common::root_id("drive")),
        Some(&common::token("t-old"))
    );
    assert_eq!(
        h.service
            .get_status(&common::collection("live"))
            .await
            .unwrap()
            .status(),
        SyncStatus::Syncing
    );

    // The recovered collection is no longer blocked
    h.remote.script(
        "drive",
        RootScript {
            items: common::items("drive", 1),
            new_token: Some(common::token("t-new")),
            ..Default::default()
        },
    );
    let record = h
        .service
        .start_run(
            common::collection("crashed"),
            vec![common::root("drive")],
            common::credentials(),
        )
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(record.status(), SyncStatus::Completed);
    assert_eq!(
        h.remote.list_calls("drive"),
        vec![Some(common::token("t-old"))]
    );
}

#[tokio::test]
async fn test_collections_sync_concurrently_and_share_content() {
    let h = common::harness();
    let shared = common::item("drive", "shared");
    h.remote.script(
        "drive",
        RootScript {
            items: vec![shared.clone()],
            new_token: Some(common::token("t1")),
            ..Default::default()
        },
    );

    let docs = h
        .service
        .start_run(
            common::collection("docs"),
            vec![common::root("drive")],
            common::credentials(),
        )
        .await
        .unwrap();
    let legal = h
        .service
        .start_run(
            common::collection("legal"),
            vec![common::root("drive")],
            common::credentials(),
        )
        .await
        .unwrap();

    assert_eq!(docs.wait().await.unwrap().status(), SyncStatus::Completed);
    assert_eq!(legal.wait().await.unwrap().status(), SyncStatus::Completed);

    let collections = h.pipeline.collections_of(&shared);
    assert!(collections.contains(&common::collection("docs")));
    assert!(collections.contains(&common::collection("legal")));
    assert!(h.service.active_runs().is_empty());
}

#[tokio::test]
async fn test_cancel_from_another_store_instance_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    let pool = StateDatabase::open(&db_path).await.unwrap();
    let store: Arc<dyn ISyncRecordStore> = Arc::new(SqliteSyncRecordStore::new(pool.pool().clone()));
    let h = common::harness_with(store, common::config());

    let files = common::items("drive", 5);
    for file in &files {
        h.remote.gate(&file.id);
    }
    h.remote.script(
        "drive",
        RootScript {
            items: files,
            new_token: Some(common::token("t1")),
            ..Default::default()
        },
    );
    let docs = common::collection("docs");
    let mut events = h.service.subscribe();
    let handle = h
        .service
        .start_run(docs.clone(), vec![common::root("drive")], common::credentials())
        .await
        .unwrap();
    common::wait_for_progress(&mut events, |p| p.total == 5).await;

    // What the CLI does from a separate process
    let operator_pool = StateDatabase::open(&db_path).await.unwrap();
    let operator = SqliteSyncRecordStore::new(operator_pool.pool().clone());
    assert!(operator.request_cancel(&docs, Utc::now()).await.unwrap());

    h.remote.open_gate();
    let record = handle.wait().await.unwrap();
    assert_eq!(record.status(), SyncStatus::Cancelled);
    assert_eq!(record.progress().processed, 0);
    assert_eq!(record.progress().failed, 5);

    let seen_by_operator = operator.get(&docs).await.unwrap().unwrap();
    assert_eq!(seen_by_operator.status(), SyncStatus::Cancelled);
    assert_eq!(
        seen_by_operator.delta_token(&common::root_id("drive")),
        Some(&common::token("t1"))
    );
}
