//! Recover command - Fail runs left `syncing` by a crashed host

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tracing::info;

use deltamirror_core::config::Config;
use deltamirror_sync::service::INTERRUPTED_REASON;

use crate::commands::open_state;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct RecoverCommand {
    /// Treat runs untouched for this many seconds as interrupted
    /// (defaults to `sync.stale_run_after_secs`)
    #[arg(long)]
    pub stale_after_secs: Option<u64>,
}

impl RecoverCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let stale_after = self
            .stale_after_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.sync.stale_run_after());
        let threshold =
            chrono::Duration::from_std(stale_after).context("Stale run threshold out of range")?;

        let recovered = match open_state(config).await? {
            Some(state) => state
                .recover_interrupted(Utc::now() - threshold, INTERRUPTED_REASON)
                .await
                .context("Failed to recover interrupted runs")?,
            None => Vec::new(),
        };

        info!(recovered = recovered.len(), "Recover command finished");

        if matches!(format, OutputFormat::Json) {
            let names: Vec<&str> = recovered.iter().map(|c| c.as_str()).collect();
            formatter.print_json(&serde_json::json!({
                "recovered": names,
                "stale_after_secs": stale_after.as_secs(),
            }));
        } else if recovered.is_empty() {
            formatter.success("No interrupted runs found");
        } else {
            formatter.success(&format!(
                "Marked {} interrupted run{} as failed:",
                recovered.len(),
                if recovered.len() == 1 { "" } else { "s" }
            ));
            for collection in &recovered {
                formatter.info(&format!("  {collection}"));
            }
        }

        Ok(())
    }
}
