//! `snre status` - show the progress of a session.

use anyhow::Result;
use clap::Args;

use snre_core::SessionId;

use super::{print_json, Cli};
use crate::context::AppContext;

#[derive(Args)]
pub struct StatusArgs {
    /// Session id
    pub id: SessionId,
}

pub async fn execute(cli: &Cli, args: &StatusArgs) -> Result<()> {
    let ctx = AppContext::from_cli(cli).await?;
    let status = ctx.service.get_status(args.id).await?;

    if cli.json {
        return print_json(&status);
    }

    println!("📋 Session {}", status.session_id);
    println!("   Status:    {}", status.status);
    println!("   Iteration: {}", status.iteration);
    if let Some(reason) = status.stop_reason {
        println!("   Stopped:   {:?}", reason);
    }
    if status.cancel_requested && !status.status.is_terminal() {
        println!("   Cancellation requested");
    }
    if let Some(error) = &status.error {
        println!("   Error:     {}", error);
    }
    Ok(())
}
