//! Microsoft Graph Delta API for incremental synchronization
//!
//! ## Delta Query Flow
//!
//! 1. **Full enumeration**: call [`get_delta`] with `token = None`
//! 2. **Follow pages**: `@odata.nextLink` pages are followed automatically
//! 3. **Checkpoint**: the last page carries `@odata.deltaLink`, whose `token`
//!    query parameter becomes the root's next [`DeltaToken`]
//! 4. **Incremental**: call [`get_delta`] with the saved token
//!
//! A stale token is answered with `410 Gone`, surfaced as
//! [`GraphError::TokenExpired`] so the caller can re-enumerate that root.
//!
//! ## Endpoints
//!
//! | Source root                    | Path                                  |
//! |--------------------------------|---------------------------------------|
//! | default drive                  | `/me/drive/root/delta`                |
//! | named drive                    | `/drives/{id}/root/delta`             |
//! | folder (in either drive)       | `{drive}/root:{folder}:/delta`        |

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use deltamirror_core::domain::{
    ContentHash, DeltaToken, RemoteId, SourceRoot, SourceRootId, WorkItem,
};
use deltamirror_core::ports::{AccessCredentials, ChangeSet};

use crate::client::{drive_prefix, GraphClient};
use crate::GraphError;

/// Upper bound on followed pages; guards against a server looping nextLinks
const MAX_PAGES: u32 = 10_000;

// ============================================================================
// Microsoft Graph API response types (JSON deserialization)
// ============================================================================

/// Raw response from a Microsoft Graph delta request
///
/// See: <https://learn.microsoft.com/en-us/graph/api/driveitem-delta>
#[derive(Debug, Deserialize)]
struct GraphDeltaResponse {
    #[serde(default)]
    value: Vec<GraphDriveItem>,

    /// URL for the next page of results (present when more pages exist)
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,

    /// URL carrying the checkpoint (present only on the last page)
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

/// A drive item from the delta feed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDriveItem {
    id: String,

    #[serde(default)]
    name: String,

    size: Option<u64>,

    last_modified_date_time: Option<DateTime<Utc>>,

    parent_reference: Option<GraphParentReference>,

    /// Present if the item is a file
    file: Option<GraphFileFacet>,

    /// Present if the item is a folder
    folder: Option<serde_json::Value>,

    /// Present if the item has been deleted
    deleted: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphParentReference {
    /// Format: `/drive/root:/path/to/parent` or `/drives/{id}/root:/path`
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFileFacet {
    hashes: Option<GraphHashes>,
}

/// Hash values for a file; OneDrive personal and business expose
/// different subsets
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphHashes {
    quick_xor_hash: Option<String>,
    sha256_hash: Option<String>,
    sha1_hash: Option<String>,
}

/// One page of results in port-ready form
#[derive(Debug, Default)]
pub struct DeltaPage {
    /// Changes in feed order
    pub changes: Vec<DeltaChange>,
    /// Link to the next page, if any
    pub next_link: Option<String>,
    /// Checkpoint link, present on the last page
    pub delta_link: Option<String>,
}

/// A single entry of the delta feed
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaChange {
    /// A file was added or modified
    Upsert(WorkItem),
    /// An item was deleted
    Removed(RemoteId),
}

impl DeltaChange {
    fn remote_id(&self) -> &RemoteId {
        match self {
            DeltaChange::Upsert(item) => &item.id,
            DeltaChange::Removed(id) => id,
        }
    }
}

// ============================================================================
// DeltaParser - converts Graph API responses to port-level types
// ============================================================================

/// Converts raw delta responses into [`DeltaChange`]s and [`ChangeSet`]s
pub struct DeltaParser;

impl DeltaParser {
    /// Maps one drive item; folders and unusable entries yield `None`
    fn parse_item(root: &SourceRootId, item: GraphDriveItem) -> Option<DeltaChange> {
        let id = match RemoteId::new(item.id.clone()) {
            Ok(id) => id,
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "Skipping delta item with invalid id");
                return None;
            }
        };

        if item.deleted.is_some() {
            if item.folder.is_some() {
                return None;
            }
            return Some(DeltaChange::Removed(id));
        }

        // Only files carry content; folders, the root and packages are skipped.
        let file = item.file?;

        let hash = file.hashes.and_then(|h| {
            h.quick_xor_hash
                .or(h.sha256_hash)
                .or(h.sha1_hash)
                .and_then(|value| ContentHash::new(value).ok())
        });

        let path = item
            .parent_reference
            .as_ref()
            .and_then(|pr| pr.path.as_deref())
            .map(|p| Self::normalize_parent_path(p, &item.name));

        Some(DeltaChange::Upsert(WorkItem {
            id,
            root: root.clone(),
            name: item.name,
            path,
            hash,
            modified_time: item.last_modified_date_time,
            size: item.size.unwrap_or(0),
        }))
    }

    /// Turns a Graph parent path plus item name into a drive-relative path
    ///
    /// `/drive/root:/Documents` + `a.txt` → `/Documents/a.txt`;
    /// `/drives/{id}/root:` + `a.txt` → `/a.txt`.
    pub fn normalize_parent_path(parent_path: &str, item_name: &str) -> String {
        let stripped = match parent_path.find("root:") {
            Some(idx) => &parent_path[idx + "root:".len()..],
            None => parent_path,
        };
        let stripped = stripped.trim_end_matches('/');

        if stripped.is_empty() {
            format!("/{item_name}")
        } else {
            format!("{stripped}/{item_name}")
        }
    }

    fn parse_page(root: &SourceRootId, response: GraphDeltaResponse) -> DeltaPage {
        let changes = response
            .value
            .into_iter()
            .filter_map(|item| Self::parse_item(root, item))
            .collect();

        DeltaPage {
            changes,
            next_link: response.next_link,
            delta_link: response.delta_link,
        }
    }

    /// Extracts the `token` query parameter of a delta link
    pub fn extract_delta_token(delta_link: &str) -> Option<String> {
        url::Url::parse(delta_link).ok().and_then(|u| {
            u.query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
        })
    }

    /// Folds all changes of an enumeration into a [`ChangeSet`]
    ///
    /// The feed may report one item several times; the last entry wins.
    /// A delta link without a `token` parameter is kept whole.
    pub fn into_change_set(changes: Vec<DeltaChange>, delta_link: Option<&str>) -> ChangeSet {
        let mut latest: HashMap<RemoteId, usize> = HashMap::with_capacity(changes.len());
        for (idx, change) in changes.iter().enumerate() {
            latest.insert(change.remote_id().clone(), idx);
        }

        let mut set = ChangeSet::default();
        for (idx, change) in changes.into_iter().enumerate() {
            if latest.get(change.remote_id()) != Some(&idx) {
                continue;
            }
            match change {
                DeltaChange::Upsert(item) => set.items.push(item),
                DeltaChange::Removed(id) => set.removed_ids.push(id),
            }
        }

        set.new_token = delta_link.and_then(|link| {
            let raw = Self::extract_delta_token(link).unwrap_or_else(|| link.to_string());
            DeltaToken::new(raw).ok()
        });
        set
    }
}

// ============================================================================
// Delta query functions
// ============================================================================

/// Path of the delta endpoint for a source root, relative to the base URL
pub fn delta_path(root: &SourceRoot, token: Option<&DeltaToken>) -> String {
    let drive = drive_prefix(root);
    let folder = root
        .folder
        .as_deref()
        .map(|f| f.trim_end_matches('/'))
        .filter(|f| !f.is_empty());

    let mut path = match folder {
        Some(folder) if folder.starts_with('/') => format!("{drive}/root:{folder}:/delta"),
        Some(folder) => format!("{drive}/root:/{folder}:/delta"),
        None => format!("{drive}/root/delta"),
    };

    if let Some(token) = token {
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_str().as_bytes()).collect();
        path.push_str("?token=");
        path.push_str(&encoded);
    }
    path
}

/// Enumerates every change under `root` since `token`
///
/// # Errors
///
/// [`GraphError::TokenExpired`] when the token was rejected with 410;
/// any other [`GraphError`] for transport or status failures.
pub async fn get_delta(
    client: &GraphClient,
    root: &SourceRoot,
    token: Option<&DeltaToken>,
    credentials: &AccessCredentials,
) -> Result<ChangeSet, GraphError> {
    let path = delta_path(root, token);
    debug!(root = %root.id, has_token = token.is_some(), "Starting delta query");

    let response = client.request(Method::GET, &path, credentials).send().await?;
    let mut page = read_page(&root.id, response).await?;
    let mut changes = std::mem::take(&mut page.changes);

    let mut page_count: u32 = 1;
    while let Some(next_link) = page.next_link.take() {
        page_count += 1;
        if page_count > MAX_PAGES {
            return Err(GraphError::InvalidResponse(format!(
                "Delta feed for {} exceeded {} pages",
                root.id, MAX_PAGES
            )));
        }

        page = get_delta_page(client, &root.id, &next_link, credentials).await?;
        debug!(
            root = %root.id,
            page = page_count,
            items = page.changes.len(),
            has_next = page.next_link.is_some(),
            "Received delta page"
        );
        changes.append(&mut page.changes);
    }

    if page.delta_link.is_none() {
        warn!(root = %root.id, "Delta query completed without a deltaLink; next run will re-enumerate");
    }

    let set = DeltaParser::into_change_set(changes, page.delta_link.as_deref());
    debug!(
        root = %root.id,
        items = set.items.len(),
        removed = set.removed_ids.len(),
        pages = page_count,
        "Delta query complete"
    );
    Ok(set)
}

/// Fetches one page from an absolute `@odata.nextLink` URL
pub async fn get_delta_page(
    client: &GraphClient,
    root: &SourceRootId,
    next_link: &str,
    credentials: &AccessCredentials,
) -> Result<DeltaPage, GraphError> {
    let response = client.get_absolute(next_link, credentials).send().await?;
    read_page(root, response).await
}

async fn read_page(root: &SourceRootId, response: reqwest::Response) -> Result<DeltaPage, GraphError> {
    let response = GraphClient::check_status(response).await?;
    let raw: GraphDeltaResponse = response.json().await.map_err(|e| {
        if e.is_timeout() {
            GraphError::Timeout(e.to_string())
        } else {
            GraphError::InvalidResponse(format!("Failed to parse delta response: {e}"))
        }
    })?;
    Ok(DeltaParser::parse_page(root, raw))
}

// ============================================================================
// Tests
// ============================================================================
