//! Cancel command - Stop a running sync from outside its host process
//!
//! The worker polls the shared record, so flipping it to `cancelled` here is
//! enough: items not yet admitted are reported as cancelled and the run
//! still persists its delta tokens.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use deltamirror_core::config::Config;
use deltamirror_core::domain::SyncStatus;

use crate::commands::{open_state, parse_collection};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct CancelCommand {
    /// Target collection
    pub collection: String,
}

impl CancelCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));
        let collection = parse_collection(&self.collection)?;

        let (requested, status) = match open_state(config).await? {
            Some(state) => {
                let requested = state
                    .request_cancel(&collection)
                    .await
                    .context("Failed to request cancellation")?;
                let status = state
                    .get_status(&collection)
                    .await
                    .context("Failed to read sync record")?
                    .status();
                (requested, status)
            }
            None => (false, SyncStatus::Idle),
        };

        info!(%collection, requested, %status, "Cancel command finished");

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "collection": collection.as_str(),
                "requested": requested,
                "status": status,
            }));
        } else if requested {
            formatter.success(&format!("Cancellation requested for {collection}"));
            formatter.info("The worker stops at its next check and keeps its delta tokens.");
        } else {
            formatter.warn(&format!("No sync running for {collection} (status: {status})"));
        }

        Ok(())
    }
}
