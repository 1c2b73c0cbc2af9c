//! `snre list` - list sessions that have not finished.

use anyhow::Result;
use tracing::debug;

use snre_core::CoreError;

use super::{print_json, Cli};
use crate::context::AppContext;

pub async fn execute(cli: &Cli) -> Result<()> {
    let ctx = AppContext::from_cli(cli).await?;

    let mut statuses = Vec::new();
    for id in ctx.service.list_active().await? {
        match ctx.service.get_status(id).await {
            Ok(status) => statuses.push(status),
            // Deleted between listing and loading.
            Err(CoreError::SessionNotFound(_)) => debug!(session_id = %id, "Session vanished"),
            Err(e) => return Err(e.into()),
        }
    }

    if cli.json {
        return print_json(&statuses);
    }

    if statuses.is_empty() {
        println!("No active sessions");
        return Ok(());
    }
    println!("📋 Active sessions ({}):", statuses.len());
    for status in &statuses {
        let cancelling = if status.cancel_requested { " (cancelling)" } else { "" };
        println!(
            "   {}  {:<12} iteration {}{}",
            status.session_id, status.status, status.iteration, cancelling
        );
    }
    Ok(())
}
