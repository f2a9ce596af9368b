//! Microsoft Graph API client
//!
//! Thin wrapper over `reqwest::Client` that builds authenticated requests
//! and turns non-success statuses into [`GraphError`]s. The client holds no
//! credentials: every call takes the [`AccessCredentials`] of the run it
//! serves, so one client can be shared by all collection syncs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use deltamirror_core::ports::AccessCredentials;
//! use deltamirror_graph::client::GraphClient;
//!
//! # async fn example() -> Result<(), deltamirror_graph::GraphError> {
//! let client = GraphClient::new(Duration::from_secs(60))?;
//! let credentials = AccessCredentials::bearer("access-token");
//! let response = client
//!     .request(reqwest::Method::GET, "/me/drive", &credentials)
//!     .send()
//!     .await?;
//! let _response = GraphClient::check_status(response).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use deltamirror_core::domain::{RemoteId, SourceRoot};
use deltamirror_core::ports::AccessCredentials;

use crate::GraphError;

/// Base URL for Microsoft Graph API v1.0
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Retry-after used when a 429 carries no usable header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Longest server-requested wait that is honoured as-is
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP client for Microsoft Graph API calls
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    /// Creates a client for the public Graph endpoint
    ///
    /// # Arguments
    /// * `timeout` - Applied to every request, including body download
    pub fn new(timeout: Duration) -> Result<Self, GraphError> {
        Self::with_base_url(GRAPH_BASE_URL, timeout)
    }

    /// Creates a client with a custom base URL (national clouds, tests)
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GraphError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request for a path relative to the base URL
    pub fn request(
        &self,
        method: Method,
        path: &str,
        credentials: &AccessCredentials,
    ) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(credentials.access_token())
    }

    /// Creates an authenticated GET for an absolute URL (pagination links)
    pub fn get_absolute(&self, url: &str, credentials: &AccessCredentials) -> RequestBuilder {
        self.client.get(url).bearer_auth(credentials.access_token())
    }

    /// Passes success responses through and maps every other status
    pub async fn check_status(response: Response) -> Result<Response, GraphError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));
            if status == StatusCode::TOO_MANY_REQUESTS || retry_after.is_some() {
                return Err(GraphError::TooManyRequests {
                    retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                });
            }
        }

        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let detail = format!("{} {}: {}", status.as_u16(), url, summarize_body(&body));

        Err(match status {
            StatusCode::UNAUTHORIZED => GraphError::Unauthorized(detail),
            StatusCode::FORBIDDEN => GraphError::Forbidden(detail),
            StatusCode::NOT_FOUND => GraphError::NotFound(detail),
            StatusCode::GONE => GraphError::TokenExpired,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GraphError::Timeout(detail),
            s if s.is_server_error() => GraphError::ServerError(detail),
            _ => GraphError::InvalidResponse(detail),
        })
    }

    /// Downloads the content of a file in a source root's drive
    ///
    /// `GET {drive}/items/{id}/content` answers with a redirect to the
    /// pre-authenticated download URL, which reqwest follows.
    pub async fn download(
        &self,
        root: &SourceRoot,
        id: &RemoteId,
        credentials: &AccessCredentials,
    ) -> Result<Vec<u8>, GraphError> {
        let path = format!("{}/items/{}/content", drive_prefix(root), id.as_str());

        let response = self.request(Method::GET, &path, credentials).send().await?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;

        debug!(item_id = %id, bytes = bytes.len(), "Downloaded file content");
        Ok(bytes.to_vec())
    }
}

/// Path prefix of the drive a root lives in
pub fn drive_prefix(root: &SourceRoot) -> String {
    match root.drive_id.as_deref() {
        Some(drive_id) => format!("/drives/{}", drive_id),
        None => "/me/drive".to_string(),
    }
}

/// Keeps error messages readable when the server returns large bodies
fn summarize_body(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct GraphErrorBody {
        error: GraphErrorDetail,
    }
    #[derive(serde::Deserialize)]
    struct GraphErrorDetail {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    }

    if let Ok(parsed) = serde_json::from_str::<GraphErrorBody>(body) {
        return format!("{} ({})", parsed.error.message, parsed.error.code);
    }
    body.chars().take(200).collect()
}

/// Parses a `Retry-After` header: delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds).min(MAX_RETRY_AFTER);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(wait) = wait.to_std() {
            return wait.min(MAX_RETRY_AFTER);
        }
        return Duration::ZERO;
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
