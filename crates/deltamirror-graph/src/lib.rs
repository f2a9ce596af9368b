//! deltamirror Graph - Microsoft Graph remote source
//!
//! Implements the `IRemoteSource` port over the OneDrive / SharePoint delta
//! API:
//! - Delta queries per source root (default drive, a named drive, or a folder)
//! - Pagination through `@odata.nextLink` until the final `@odata.deltaLink`
//! - File downloads
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client and status mapping
//! - [`delta`] - Delta queries and response parsing
//! - [`provider`] - [`provider::GraphRemoteSource`], the port implementation

pub mod client;
pub mod delta;
pub mod provider;

use std::time::Duration;

use deltamirror_core::ports::RemoteError;
use thiserror::Error;

pub use client::GraphClient;
pub use provider::GraphRemoteSource;

/// Errors that can occur when communicating with the Microsoft Graph API
#[derive(Debug, Error)]
pub enum GraphError {
    /// Authentication credentials are invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions for the requested operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// The request did not complete within the client timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The delta token is no longer valid (410 Gone); a full resync is needed
    #[error("Delta token expired")]
    TokenExpired,

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GraphError::Timeout(e.to_string())
        } else if e.is_decode() {
            GraphError::InvalidResponse(e.to_string())
        } else {
            GraphError::NetworkError(e.to_string())
        }
    }
}

impl From<GraphError> for RemoteError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::Unauthorized(msg) | GraphError::Forbidden(msg) => {
                RemoteError::Unauthorized(msg)
            }
            GraphError::NotFound(msg) => RemoteError::NotFound(msg),
            GraphError::TooManyRequests { retry_after } => RemoteError::Throttled { retry_after },
            GraphError::ServerError(msg) => RemoteError::Server(msg),
            GraphError::Timeout(msg) => RemoteError::Timeout(msg),
            GraphError::NetworkError(msg) => RemoteError::Network(msg),
            GraphError::TokenExpired => RemoteError::TokenExpired,
            GraphError::InvalidResponse(msg) => RemoteError::InvalidResponse(msg),
        }
    }
}
