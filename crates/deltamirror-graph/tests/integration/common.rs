//! Shared test helpers for Graph API integration tests
//!
//! Each helper mounts mock endpoints on a wiremock server; [`setup`]
//! returns a `GraphRemoteSource` pointed at it.

use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use deltamirror_core::domain::{SourceRoot, SourceRootId};
use deltamirror_core::ports::AccessCredentials;
use deltamirror_graph::GraphRemoteSource;

/// Starts a mock server and a remote source with a short timeout
pub async fn setup() -> (MockServer, GraphRemoteSource) {
    let server = MockServer::start().await;
    let source = GraphRemoteSource::with_base_url(server.uri(), Duration::from_secs(2))
        .expect("Failed to build remote source");
    (server, source)
}

pub fn credentials() -> AccessCredentials {
    AccessCredentials::bearer("test-access-token")
}

pub fn default_root() -> SourceRoot {
    SourceRoot::new(SourceRootId::new("onedrive".to_string()).unwrap())
}

/// A file entry as the delta feed reports it
pub fn file_json(id: &str, name: &str, parent: &str, hash: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "size": 1024,
        "lastModifiedDateTime": "2026-01-15T10:00:00Z",
        "parentReference": { "id": "parent", "path": parent },
        "file": { "hashes": { "quickXorHash": hash } }
    })
}

/// Mounts a delta endpoint that returns a single page with given items.
pub async fn mount_delta_single_page(
    server: &MockServer,
    delta_path: &str,
    items: serde_json::Value,
    delta_token: &str,
) {
    Mock::given(method("GET"))
        .and(path(delta_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": items,
            "@odata.deltaLink": format!("{}{}?token={}", server.uri(), delta_path, delta_token)
        })))
        .mount(server)
        .await;
}

/// Mounts a delta endpoint that returns two pages.
///
/// The first page links to `/page2` on the same server; the second
/// carries the deltaLink.
pub async fn mount_delta_paginated(
    server: &MockServer,
    page1_items: serde_json::Value,
    page2_items: serde_json::Value,
    delta_token: &str,
) {
    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": page1_items,
            "@odata.nextLink": format!("{}/page2?$skiptoken=p2", server.uri())
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .and(query_param("$skiptoken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": page2_items,
            "@odata.deltaLink": format!(
                "{}/me/drive/root/delta?token={}",
                server.uri(),
                delta_token
            )
        })))
        .expect(1)
        .mount(server)
        .await;
}

/// Mounts a file download endpoint for a specific item ID.
pub async fn mount_download(server: &MockServer, drive_prefix: &str, item_id: &str, content: &[u8]) {
    let path_str = format!("{}/items/{}/content", drive_prefix, item_id);
    Mock::given(method("GET"))
        .and(path(&path_str))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.to_vec())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(server)
        .await;
}
