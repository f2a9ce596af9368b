//! Subcommands of the `deltamirror` binary

pub mod cancel;
pub mod config;
pub mod recover;
pub mod status;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};

use deltamirror_core::config::Config;
use deltamirror_core::domain::CollectionId;
use deltamirror_store::{SqliteSyncRecordStore, StateDatabase};
use deltamirror_sync::SyncStateStore;

/// Parses a collection argument
pub(crate) fn parse_collection(raw: &str) -> Result<CollectionId> {
    CollectionId::new(raw.to_string())
        .with_context(|| format!("Invalid collection id '{raw}'"))
}

/// Opens the sync record database named by `store.database_path`.
///
/// Returns `None` when the database does not exist yet, which means no
/// collection has ever been synced on this host.
pub(crate) async fn open_state(config: &Config) -> Result<Option<SyncStateStore>> {
    let db_path = &config.store.database_path;
    if !db_path.exists() {
        return Ok(None);
    }

    let pool = StateDatabase::open(db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let store = Arc::new(SqliteSyncRecordStore::new(pool.pool().clone()));
    Ok(Some(SyncStateStore::new(store, config.sync.event_buffer)))
}
