//! Integration tests for file downloads

use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use deltamirror_core::domain::RemoteId;
use deltamirror_core::ports::{IRemoteSource, RemoteError};

use crate::common;

fn item(id: &str) -> RemoteId {
    RemoteId::new(id.to_string()).unwrap()
}

#[tokio::test]
async fn test_download_from_default_drive() {
    let (server, source) = common::setup().await;
    common::mount_download(&server, "/me/drive", "file-001", b"hello world").await;

    let bytes = source
        .fetch_bytes(&common::default_root(), &item("file-001"), &common::credentials())
        .await
        .expect("Download failed");

    assert_eq!(bytes, b"hello world");
}

#[tokio::test]
async fn test_download_from_named_drive() {
    let (server, source) = common::setup().await;
    common::mount_download(&server, "/drives/drive-7", "file-9", b"%PDF-1.7").await;

    let root = common::default_root().with_drive("drive-7");
    let bytes = source
        .fetch_bytes(&root, &item("file-9"), &common::credentials())
        .await
        .unwrap();

    assert_eq!(bytes, b"%PDF-1.7");
}

#[tokio::test]
async fn test_download_follows_redirect() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/items/file-r/content"))
        .respond_with(
            ResponseTemplate::new(302)
                .append_header("Location", format!("{}/blob/file-r", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/file-r"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"redirected".to_vec()))
        .mount(&server)
        .await;

    let bytes = source
        .fetch_bytes(&common::default_root(), &item("file-r"), &common::credentials())
        .await
        .unwrap();
    assert_eq!(bytes, b"redirected");
}

#[tokio::test]
async fn test_missing_item_is_not_found() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/items/gone/content"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "code": "itemNotFound", "message": "Item does not exist" }
        })))
        .mount(&server)
        .await;

    let err = source
        .fetch_bytes(&common::default_root(), &item("gone"), &common::credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::NotFound(ref msg) if msg.contains("itemNotFound")));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unavailable_with_retry_after_is_throttled() {
    let (server, source) = common::setup().await;
    Mock::given(method("GET"))
        .and(path("/me/drive/items/busy/content"))
        .respond_with(ResponseTemplate::new(503).append_header("Retry-After", "1"))
        .mount(&server)
        .await;

    let err = source
        .fetch_bytes(&common::default_root(), &item("busy"), &common::credentials())
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(1)));
}
