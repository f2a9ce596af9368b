//! GraphRemoteSource - IRemoteSource implementation for Microsoft Graph
//!
//! Delegates to the [`delta`](crate::delta) module and
//! [`GraphClient::download`], mapping [`GraphError`](crate::GraphError)
//! into the port's [`RemoteError`].

use std::time::Duration;

use tracing::{debug, instrument};

use deltamirror_core::domain::{DeltaToken, RemoteId, SourceRoot};
use deltamirror_core::ports::{AccessCredentials, ChangeSet, IRemoteSource, RemoteError};

use crate::client::GraphClient;
use crate::{delta, GraphError};

/// Remote source reading OneDrive / SharePoint drives through Graph
#[derive(Debug, Clone)]
pub struct GraphRemoteSource {
    client: GraphClient,
}

impl GraphRemoteSource {
    /// Wraps an existing client
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Builds a source for `base_url` with a per-request timeout
    pub fn with_base_url(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GraphError> {
        Ok(Self::new(GraphClient::with_base_url(base_url, request_timeout)?))
    }

    /// Returns the underlying client
    pub fn client(&self) -> &GraphClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IRemoteSource for GraphRemoteSource {
    #[instrument(skip(self, token, credentials), fields(root = %root.id))]
    async fn list_changes(
        &self,
        root: &SourceRoot,
        token: Option<&DeltaToken>,
        credentials: &AccessCredentials,
    ) -> Result<ChangeSet, RemoteError> {
        let changes = delta::get_delta(&self.client, root, token, credentials).await?;
        debug!(
            items = changes.items.len(),
            removed = changes.removed_ids.len(),
            has_token = changes.new_token.is_some(),
            "Listed remote changes"
        );
        Ok(changes)
    }

    #[instrument(skip(self, root, credentials), fields(root = %root.id, item_id = %item_id))]
    async fn fetch_bytes(
        &self,
        root: &SourceRoot,
        item_id: &RemoteId,
        credentials: &AccessCredentials,
    ) -> Result<Vec<u8>, RemoteError> {
        Ok(self.client.download(root, item_id, credentials).await?)
    }
}
