//! Watch command - Follow a sync run until it settles
//!
//! Polls the shared record, since the run usually lives in another
//! process, and prints a line whenever it changes. Stops on any non-syncing
//! status or on Ctrl+C.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use tracing::{debug, info};

use deltamirror_core::config::Config;
use deltamirror_core::domain::{CollectionId, SyncStatus};
use deltamirror_sync::SyncStateStore;

use crate::commands::status::{print_record, progress_line, record_json};
use crate::commands::{open_state, parse_collection};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Target collection
    pub collection: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
}

impl WatchCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let collection = parse_collection(&self.collection)?;

        let Some(state) = open_state(config).await? else {
            formatter.warn(&format!("{collection} has never been synced"));
            return Ok(());
        };

        info!(%collection, interval_ms = self.interval_ms, "Watching sync record");

        tokio::select! {
            result = self.follow(&state, &collection, format, &*formatter) => result,
            _ = tokio::signal::ctrl_c() => {
                formatter.info("Stopped watching; the sync keeps running");
                Ok(())
            }
        }
    }

    async fn follow(
        &self,
        state: &SyncStateStore,
        collection: &CollectionId,
        format: OutputFormat,
        formatter: &dyn OutputFormatter,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.interval_ms.max(50)));
        let mut last_seen: Option<DateTime<Utc>> = None;

        loop {
            ticker.tick().await;
            let record = state
                .get_status(collection)
                .await
                .context("Failed to read sync record")?;

            if record.status() != SyncStatus::Syncing {
                debug!(%collection, status = %record.status(), "Run settled");
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&record_json(&record)?);
                } else {
                    print_record(formatter, &record);
                }
                return Ok(());
            }

            if last_seen == Some(record.updated_at()) {
                continue;
            }
            last_seen = Some(record.updated_at());

            if matches!(format, OutputFormat::Json) {
                formatter.print_json(&serde_json::json!({
                    "collection": collection.as_str(),
                    "status": record.status(),
                    "progress": record.progress(),
                }));
            } else {
                formatter.info(&progress_line(&record));
            }
        }
    }
}
