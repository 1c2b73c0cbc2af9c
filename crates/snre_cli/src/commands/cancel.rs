//! `snre cancel` - request cancellation of a session.

use anyhow::Result;
use clap::Args;

use snre_core::{RefactorStatus, SessionId};

use super::{print_json, Cli};
use crate::context::AppContext;

#[derive(Args)]
pub struct CancelArgs {
    /// Session id
    pub id: SessionId,
}

pub async fn execute(cli: &Cli, args: &CancelArgs) -> Result<()> {
    let ctx = AppContext::from_cli(cli).await?;
    ctx.service.cancel(args.id).await?;
    let status = ctx.service.get_status(args.id).await?;

    if cli.json {
        return print_json(&status);
    }

    if status.status == RefactorStatus::Cancelled {
        println!("🛑 Session {} cancelled", args.id);
    } else {
        println!(
            "🛑 Cancellation requested for {}; it stops at the next iteration boundary",
            args.id
        );
    }
    Ok(())
}
