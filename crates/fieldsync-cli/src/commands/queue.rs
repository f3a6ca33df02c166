use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fieldsync_core::{DrainOutcome, FieldSync, FieldSyncConfig, HttpDispatcher, STATE_DB_FILE};

use super::support::print_json;

pub(super) async fn handle_queue_status(app: &FieldSync, root: &Path) -> Result<()> {
    let counts = app.counts().await?;
    print_json(&serde_json::json!({
        "state_db": root.join(STATE_DB_FILE).display().to_string(),
        "counts": counts,
        "replay": {
            "attempt_ceiling": app.config().replay.attempt_ceiling,
            "retry_while_online": app.config().replay.retry_while_online,
        },
    }))
}

pub(super) async fn handle_queue_list(app: &FieldSync) -> Result<()> {
    print_json(&app.pending().await?)
}

pub(super) async fn handle_queue_replay(
    root: &Path,
    config: FieldSyncConfig,
    endpoint: &str,
    token: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let mut dispatcher = HttpDispatcher::with_timeout(endpoint, Duration::from_secs(timeout_secs))
        .context("invalid replay endpoint")?;
    if let Some(token) = token {
        dispatcher = dispatcher.with_bearer_token(token);
    }
    let app = FieldSync::open(root, config, Arc::new(dispatcher))
        .with_context(|| format!("failed to open state root {}", root.display()))?;

    tracing::info!(endpoint, "replaying offline queue");
    let outcome = app.drain().await;
    let counts = app.counts().await?;
    print_json(&serde_json::json!({
        "endpoint": endpoint,
        "outcome": outcome,
        "counts": counts,
    }))?;

    match outcome {
        DrainOutcome::Completed(report) if report.halted => {
            anyhow::bail!(
                "replay halted at entry {}; {} entries still pending",
                report
                    .halted_entry_id
                    .map_or_else(|| "?".to_string(), |id| id.to_string()),
                counts.pending
            )
        }
        _ => Ok(()),
    }
}
