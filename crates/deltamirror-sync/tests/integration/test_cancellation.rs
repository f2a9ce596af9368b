//! Cancellation, shutdown and the single-run guard

use std::time::Duration;

use deltamirror_core::domain::SyncStatus;
use deltamirror_core::ports::RemoteError;
use deltamirror_sync::{CancelAck, SyncError};

use crate::common::{self, RootScript};

#[tokio::test]
async fn test_cancel_after_two_items_cancels_the_remaining_eight() {
    let h = common::harness();
    let files = common::items("drive", 10);
    for file in &files[2..] {
        h.remote.gate(&file.id);
    }
    h.remote.script(
        "drive",
        RootScript {
            items: files,
            new_token: Some(common::token("t-next")),
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
    common::wait_for_progress(&mut events, |p| p.processed == 2).await;

    assert_eq!(
        h.service.request_cancel(&docs).await.unwrap(),
        CancelAck::Requested
    );
    h.remote.open_gate();
    let record = handle.wait().await.unwrap();

    assert_eq!(record.status(), SyncStatus::Cancelled);
    assert_eq!(record.progress().processed, 2);
    assert_eq!(record.progress().failed, 8);
    assert_eq!(record.progress().total, 10);
    assert_eq!(record.failed_items().len(), 8);
    assert!(record.failed_items().iter().all(|f| f.is_cancelled()));
    assert!(record
        .failed_items()
        .iter()
        .all(|f| f.message() == "cancelled by user"));
    assert_eq!(h.pipeline.extracted(), 2);
    assert_eq!(
        record.delta_token(&common::root_id("drive")),
        Some(&common::token("t-next"))
    );
    assert!(record.error().is_none());
}

#[tokio::test]
async fn test_cancel_without_running_sync_is_not_acknowledged() {
    let h = common::harness();
    let docs = common::collection("docs");
    assert_eq!(
        h.service.request_cancel(&docs).await.unwrap(),
        CancelAck::NotRunning(SyncStatus::Idle)
    );

    h.remote.script(
        "drive",
        RootScript {
            items: common::items("drive", 1),
            ..Default::default()
        },
    );
    h.service
        .start_run(docs.clone(), vec![common::root("drive")], common::credentials())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(
        h.service.request_cancel(&docs).await.unwrap(),
        CancelAck::NotRunning(SyncStatus::Completed)
    );
    assert_eq!(
        h.service.get_status(&docs).await.unwrap().status(),
        SyncStatus::Completed
    );
}

#[tokio::test]
async fn test_cancelled_collection_can_sync_again() {
    let h = common::harness();
    let files = common::items("drive", 4);
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

    let first = h
        .service
        .start_run(docs.clone(), vec![common::root("drive")], common::credentials())
        .await
        .unwrap();
    common::wait_for_progress(&mut events, |p| p.total == 4).await;
    h.service.request_cancel(&docs).await.unwrap();
    h.remote.open_gate();
    let cancelled = first.wait().await.unwrap();
    assert_eq!(cancelled.status(), SyncStatus::Cancelled);

    let second = h
        .service
        .start_run(docs.clone(), vec![common::root("drive")], common::credentials())
        .await
        .unwrap();
    assert_ne!(second.run_id(), cancelled.run_id().unwrap());
    let record = second.wait().await.unwrap();

    assert_eq!(record.status(), SyncStatus::Completed);
    assert_eq!(record.progress().processed, 4);
    assert_eq!(
        h.remote.list_calls("drive"),
        vec![None, Some(common::token("t1"))]
    );
}

#[tokio::test]
async fn test_concurrent_starts_admit_exactly_one_run() {
    let h = common::harness();
    let file = common::item("drive", "f0");
    h.remote.gate(&file.id);
    h.remote.script(
        "drive",
        RootScript {
            items: vec![file],
            ..Default::default()
        },
    );
    let docs = common::collection("docs");

    let (a, b) = tokio::join!(
        h.service
            .start_run(docs.clone(), vec![common::root("drive")], common::credentials()),
        h.service
            .start_run(docs.clone(), vec![common::root("drive")], common::credentials()),
    );

    let (winner, loser) = match (a, b) {
        (Ok(handle), Err(err)) | (Err(err), Ok(handle)) => (handle, err),
        (a, b) => panic!("expected one winner, got {a:?} and {b:?}"),
    };
    match loser {
        SyncError::Conflict { collection, run_id } => {
            assert_eq!(collection, docs);
            assert_eq!(run_id, Some(winner.run_id()));
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    h.remote.open_gate();
    let record = winner.wait().await.unwrap();
    assert_eq!(record.status(), SyncStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_cancels_running_syncs_and_keeps_tokens() {
    let h = common::harness();
    let files = common::items("drive", 3);
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
    common::wait_for_progress(&mut events, |p| p.total == 3).await;
    assert_eq!(h.service.active_runs().len(), 1);

    h.service.shutdown();
    h.remote.open_gate();
    let record = handle.wait().await.unwrap();

    assert_eq!(record.status(), SyncStatus::Cancelled);
    assert_eq!(record.progress().processed, 0);
    assert_eq!(record.progress().failed, 3);
    assert!(record.failed_items().iter().all(|f| f.is_cancelled()));
    assert_eq!(
        record.delta_token(&common::root_id("drive")),
        Some(&common::token("t1"))
    );

    assert!(h.service.is_shutting_down());
    assert!(
        h.service
            .shutdown_and_wait(std::time::Duration::from_secs(1))
            .await
    );
    let refused = h
        .service
        .start_run(docs, vec![common::root("drive")], common::credentials())
        .await;
    assert!(matches!(refused, Err(SyncError::InvalidRequest(_))));
}

fn throttled_for_an_hour() -> RemoteError {
    RemoteError::Throttled {
        retry_after: Duration::from_secs(3600),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_download_backoff() {
    let h = common::harness();
    let file = common::item("drive", "f0");
    h.remote.fail_fetch(
        &file.id,
        vec![
            throttled_for_an_hour(),
            throttled_for_an_hour(),
            throttled_for_an_hour(),
        ],
    );
    h.remote.script(
        "drive",
        RootScript {
            items: vec![file],
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
    common::wait_for_progress(&mut events, |p| p.total == 1).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancelled_at = tokio::time::Instant::now();
    assert_eq!(
        h.service.request_cancel(&docs).await.unwrap(),
        CancelAck::Requested
    );
    let record = handle.wait().await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(60));
    assert_eq!(record.status(), SyncStatus::Cancelled);
    assert_eq!(h.remote.fetches(), 1);
    assert_eq!(record.progress().failed, 1);
    assert!(record.failed_items()[0].is_cancelled());
    assert_eq!(h.pipeline.extracted(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_listing_backoff() {
    let h = common::harness();
    h.remote.script(
        "drive",
        RootScript {
            fail: Some(throttled_for_an_hour()),
            ..Default::default()
        },
    );
    let docs = common::collection("docs");

    let handle = h
        .service
        .start_run(docs.clone(), vec![common::root("drive")], common::credentials())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancelled_at = tokio::time::Instant::now();
    h.service.request_cancel(&docs).await.unwrap();
    let record = handle.wait().await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(60));
    assert_eq!(record.status(), SyncStatus::Cancelled);
    assert_eq!(h.remote.list_calls("drive").len(), 1);
    assert!(record.failed_items().is_empty());
    assert!(record.delta_token(&common::root_id("drive")).is_none());
}
