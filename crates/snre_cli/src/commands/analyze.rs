//! `snre analyze` - print every agent's analysis of a file without changing it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use super::{parse_agent_list, print_json, Cli, CliError};
use crate::context::AppContext;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Source file to analyze
    pub file: PathBuf,

    /// Comma-separated agent ids (default: every enabled profile)
    #[arg(short, long)]
    pub agents: Option<String>,

    /// Exit with an error when any agent reports an issue
    #[arg(long)]
    pub strict: bool,
}

pub async fn execute(cli: &Cli, args: &AnalyzeArgs) -> Result<()> {
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let ctx = AppContext::from_cli(cli).await?;

    let requested = args.agents.as_deref().map(parse_agent_list).unwrap_or_default();
    let agents = ctx.agents_or_default(requested);
    let registrations = ctx.service.coordinator().registry().resolve(agents.as_slice())?;

    let mut analyses = Vec::with_capacity(registrations.len());
    for registration in &registrations {
        match registration.agent.analyze(&code) {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => warn!(agent_id = %registration.id(), error = %e, "Analysis failed"),
        }
    }

    let total: usize = analyses.iter().map(|a| a.issues_found).sum();
    if cli.json {
        print_json(&analyses)?;
        return strict_outcome(args.strict, total);
    }

    println!("🔍 {}", args.file.display());
    for analysis in &analyses {
        println!("   {} - {} issues", analysis.agent_id, analysis.issues_found);
        for pattern in &analysis.patterns {
            println!("      • {}", pattern);
        }
        for suggestion in &analysis.suggestions {
            println!("      → {}", suggestion);
        }
    }
    strict_outcome(args.strict, total)
}

fn strict_outcome(strict: bool, total: usize) -> Result<()> {
    if strict && total > 0 {
        return Err(CliError::IssuesFound(total).into());
    }
    Ok(())
}
