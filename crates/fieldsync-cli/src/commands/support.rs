use std::io::{self, Write};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fieldsync_core::{Dispatcher, FieldSyncError, Intent};

pub(super) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

pub(super) fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(raw) => serde_json::from_str(raw).context("--payload must be valid JSON"),
    }
}

/// Replay target for commands that never reach the backend. Any drain it
/// takes part in halts at the first entry and leaves the queue untouched
/// apart from the attempt count.
pub(super) struct OfflineOnlyDispatcher;

#[async_trait]
impl Dispatcher for OfflineOnlyDispatcher {
    async fn dispatch(&self, intent: &Intent) -> fieldsync_core::Result<()> {
        Err(FieldSyncError::Dispatch(format!(
            "{}: no replay endpoint configured",
            intent.name
        )))
    }
}
