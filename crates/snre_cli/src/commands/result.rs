//! `snre result` - print the outcome of a finished session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use snre_core::SessionId;

use super::{print_json, print_metrics, Cli};
use crate::context::AppContext;

#[derive(Args)]
pub struct ResultArgs {
    /// Session id
    pub id: SessionId,

    /// Print the unified diff instead of the final code
    #[arg(long)]
    pub diff: bool,

    /// Write the final code to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print only the metrics
    #[arg(long, conflicts_with = "diff")]
    pub metrics: bool,
}

pub async fn execute(cli: &Cli, args: &ResultArgs) -> Result<()> {
    let ctx = AppContext::from_cli(cli).await?;
    let result = ctx.service.get_result(args.id).await?;

    if let Some(path) = &args.output {
        std::fs::write(path, &result.final_code)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.json {
            eprintln!("📝 Final code written to {}", path.display());
        }
    }

    if cli.json {
        return print_json(&result);
    }

    if args.metrics {
        println!("📊 Session {} ({})", result.session_id, result.status);
        print_metrics(&result.metrics);
    } else if args.diff {
        print!("{}", result.diff);
    } else if args.output.is_none() {
        println!("{}", result.final_code);
    }
    Ok(())
}
