//! Status command - Display the sync record of a collection
//!
//! Provides the `deltamirror status <collection>` CLI command which:
//! 1. Shows the record status, run id and timestamps
//! 2. Shows progress counters of the current or last run
//! 3. Lists the delta token held for each source root
//! 4. Lists failed items of the last run

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use deltamirror_core::config::Config;
use deltamirror_core::domain::{SyncRecord, SyncStatus};

use crate::commands::{open_state, parse_collection};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Failed items shown in human output before the list is cut
const MAX_FAILED_SHOWN: usize = 20;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Target collection
    pub collection: String,
}

impl StatusCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let collection = parse_collection(&self.collection)?;

        let record = match open_state(config).await? {
            Some(state) => state
                .get_status(&collection)
                .await
                .context("Failed to read sync record")?,
            None => SyncRecord::new(collection.clone()),
        };

        info!(%collection, status = %record.status(), "Showing sync record");

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&record_json(&record)?);
            return Ok(());
        }

        print_record(&*formatter, &record);
        Ok(())
    }
}

pub(crate) fn record_json(record: &SyncRecord) -> Result<serde_json::Value> {
    serde_json::to_value(record).context("Failed to serialize sync record")
}

pub(crate) fn print_record(formatter: &dyn OutputFormatter, record: &SyncRecord) {
    let status = record.status();
    let headline = format!("{} - {}", record.collection_id(), status);
    match status {
        SyncStatus::Failed => formatter.error(&headline),
        SyncStatus::CompletedWithErrors | SyncStatus::Cancelled => formatter.warn(&headline),
        _ => formatter.success(&headline),
    }

    if status == SyncStatus::Idle {
        formatter.info("Never synced");
        return;
    }

    if let Some(run_id) = record.run_id() {
        formatter.info(&format!("Run: {run_id}"));
    }
    if let Some(started) = record.started_at() {
        formatter.info(&format!("Started: {}", started.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(finished) = record.finished_at() {
        formatter.info(&format!("Finished: {}", finished.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(error) = record.error() {
        formatter.info(&format!("Error: {error}"));
    }

    formatter.info("");
    formatter.info(&progress_line(record));

    if !record.delta_tokens().is_empty() {
        formatter.info("");
        formatter.info("Delta tokens:");
        for (root, token) in record.delta_tokens() {
            formatter.info(&format!("  {root}: {token}"));
        }
    }

    let failed = record.failed_items();
    if !failed.is_empty() {
        formatter.info("");
        formatter.info(&format!("Failed items ({}):", failed.len()));
        for item in failed.iter().take(MAX_FAILED_SHOWN) {
            formatter.info(&format!("  {item}"));
        }
        if failed.len() > MAX_FAILED_SHOWN {
            formatter.info(&format!("  ... and {} more", failed.len() - MAX_FAILED_SHOWN));
        }
    }
}

pub(crate) fn progress_line(record: &SyncRecord) -> String {
    let progress = record.progress();
    let mut line = format!(
        "Progress: {}/{} processed, {} failed ({:.0}%)",
        progress.processed,
        progress.total,
        progress.failed,
        progress.percent()
    );
    if !progress.current_item.is_empty() {
        line.push_str(&format!(" - last: {}", progress.current_item));
    }
    line
}
