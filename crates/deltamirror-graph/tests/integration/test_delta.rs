//! Integration tests for delta (incremental sync) queries

use std::time::Duration;

use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use deltamirror_core::domain::DeltaToken;
use deltamirror_core::ports::{IRemoteSource, RemoteError};

use crate::common;

#[tokio::test]
async fn test_initial_enumeration_returns_files_only() {
    let (server, source) = common::setup().await;

    let items = serde_json::json!([
        common::file_json("file-001", "document.txt", "/drive/root:", "AAAA="),
        {
            "id": "folder-001",
            "name": "Documents",
            "parentReference": { "id": "root", "path": "/drive/root:" },
            "folder": { "childCount": 3 }
        },
        common::file_json("file-002", "plan.pdf", "/drive/root:/Documents", "BBBB=")
    ]);
    common::mount_delta_single_page(&server, "/me/drive/root/delta", items, "initial-001").await;

    let changes = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .expect("Initial delta query failed");

    assert_eq!(changes.items.len(), 2);
    assert!(changes.removed_ids.is_empty());
    assert_eq!(changes.new_token.unwrap().as_str(), "initial-001");

    assert_eq!(changes.items[0].id.as_str(), "file-001");
    assert_eq!(changes.items[0].path.as_deref(), Some("/document.txt"));
    assert_eq!(changes.items[0].hash.as_ref().unwrap().as_str(), "AAAA=");
    assert_eq!(changes.items[1].path.as_deref(), Some("/Documents/plan.pdf"));
    assert_eq!(changes.items[1].root.as_str(), "onedrive");
}

#[tokio::test]
async fn test_incremental_query_sends_token_and_bearer() {
    let (server, source) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("token", "previous-token"))
        .and(header("authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                common::file_json("file-003", "new-file.txt", "/drive/root:", "CCCC="),
                { "id": "del-001", "name": "removed.txt", "deleted": { "state": "deleted" } }
            ],
            "@odata.deltaLink": format!(
                "{}/me/drive/root/delta?token=incremental-002",
                server.uri()
            )
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = DeltaToken::new("previous-token".to_string()).unwrap();
    let changes = source
        .list_changes(&common::default_root(), Some(&token), &common::credentials())
        .await
        .expect("Incremental delta query failed");

    assert_eq!(changes.items.len(), 1);
    assert_eq!(changes.items[0].name, "new-file.txt");
    assert_eq!(changes.removed_ids.len(), 1);
    assert_eq!(changes.removed_ids[0].as_str(), "del-001");
    assert_eq!(changes.new_token.unwrap().as_str(), "incremental-002");
}

#[tokio::test]
async fn test_pagination_is_followed_to_the_delta_link() {
    let (server, source) = common::setup().await;

    common::mount_delta_paginated(
        &server,
        serde_json::json!([common::file_json("p1-a", "a.txt", "/drive/root:", "A1==")]),
        serde_json::json!([
            common::file_json("p2-b", "b.txt", "/drive/root:", "B1=="),
            common::file_json("p1-a", "a-renamed.txt", "/drive/root:", "A2==")
        ]),
        "after-pages",
    )
    .await;

    let changes = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .expect("Paginated delta query failed");

    // the second report of p1-a replaces the first
    assert_eq!(changes.items.len(), 2);
    assert_eq!(changes.items[0].id.as_str(), "p2-b");
    assert_eq!(changes.items[1].name, "a-renamed.txt");
    assert_eq!(changes.items[1].hash.as_ref().unwrap().as_str(), "A2==");
    assert_eq!(changes.new_token.unwrap().as_str(), "after-pages");
}

#[tokio::test]
async fn test_folder_root_on_named_drive_uses_folder_delta() {
    let (server, source) = common::setup().await;
    let root = common::default_root()
        .with_drive("drive-42")
        .with_folder("/Projects");

    common::mount_delta_single_page(
        &server,
        "/drives/drive-42/root:/Projects:/delta",
        serde_json::json!([common::file_json(
            "file-p",
            "plan.md",
            "/drives/drive-42/root:/Projects",
            "PPPP="
        )]),
        "folder-token",
    )
    .await;

    let changes = source
        .list_changes(&root, None, &common::credentials())
        .await
        .expect("Folder delta query failed");

    assert_eq!(changes.items.len(), 1);
    assert_eq!(changes.items[0].path.as_deref(), Some("/Projects/plan.md"));
    assert_eq!(changes.new_token.unwrap().as_str(), "folder-token");
}

#[tokio::test]
async fn test_empty_feed_still_yields_token() {
    let (server, source) = common::setup().await;
    common::mount_delta_single_page(&server, "/me/drive/root/delta", serde_json::json!([]), "empty")
        .await;

    let changes = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap();

    assert!(changes.items.is_empty());
    assert_eq!(changes.new_token.unwrap().as_str(), "empty");
}

#[tokio::test]
async fn test_missing_delta_link_yields_no_token() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "value": [] })))
        .mount(&server)
        .await;

    let changes = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap();
    assert!(changes.new_token.is_none());
}

#[tokio::test]
async fn test_gone_maps_to_token_expired() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("token", "stale"))
        .respond_with(ResponseTemplate::new(410).set_body_json(serde_json::json!({
            "error": { "code": "resyncRequired", "message": "Resync required" }
        })))
        .mount(&server)
        .await;

    let token = DeltaToken::new("stale".to_string()).unwrap();
    let result = source
        .list_changes(&common::default_root(), Some(&token), &common::credentials())
        .await;

    assert_eq!(result.unwrap_err(), RemoteError::TokenExpired);
}

#[tokio::test]
async fn test_unauthorized_is_not_transient() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "code": "InvalidAuthenticationToken", "message": "Access token has expired." }
        })))
        .mount(&server)
        .await;

    let err = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Unauthorized(ref msg) if msg.contains("Access token has expired")));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_throttling_reports_retry_after() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "3"))
        .mount(&server)
        .await;

    let err = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Throttled {
            retry_after: Duration::from_secs(3)
        }
    );
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Server(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "value": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = source
        .list_changes(&common::default_root(), None, &common::credentials())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Timeout(_)), "got {err:?}");
}
