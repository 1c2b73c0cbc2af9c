//! `snre start` - refactor a file and wait for the session to finish.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use snre_core::RefactorStatus;

use super::{parse_agent_list, print_json, print_metrics, Cli, CliError};
use crate::context::AppContext;
use crate::git::GitHook;

#[derive(Args)]
pub struct StartArgs {
    /// Source file to refactor
    pub file: PathBuf,

    /// Comma-separated agent ids (default: every enabled profile)
    #[arg(short, long)]
    pub agents: Option<String>,

    /// Target name recorded on the session (default: the file path)
    #[arg(long)]
    pub target: Option<String>,

    /// Write the final code back to the file when the session completes
    #[arg(long)]
    pub write: bool,

    /// Check out a new git branch before writing the refactored file
    #[arg(long, requires = "write")]
    pub branch: Option<String>,

    /// Commit the refactored file after writing it
    #[arg(long, requires = "write")]
    pub commit: bool,
}

pub async fn execute(cli: &Cli, args: &StartArgs) -> Result<()> {
    let code = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let ctx = AppContext::from_cli(cli).await?;
    // fail before any work when git was asked for but there is no repository
    let git = if args.branch.is_some() || args.commit {
        Some(GitHook::discover(&args.file)?)
    } else {
        None
    };

    let requested = args.agents.as_deref().map(parse_agent_list).unwrap_or_default();
    let agents = ctx.agents_or_default(requested);
    if agents.is_empty() {
        return Err(CliError::InvalidArgument("no agents enabled or requested".into()).into());
    }
    let target = args
        .target
        .clone()
        .unwrap_or_else(|| args.file.display().to_string());

    debug!(
        max_iterations = ctx.config.max_iterations,
        consensus_threshold = ctx.config.consensus_threshold,
        "Starting session"
    );
    let coordinator = ctx.service.coordinator();
    let session = coordinator.create_session(target, code, &agents).await?;
    let id = session.id;
    if !cli.json {
        println!("🚀 Session {} started", id);
        println!("   Agents: {}", agents.join(", "));
    }

    // Ctrl-C cancels at the next loop boundary; the partial result is kept.
    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(session_id = %id, "Interrupted, cancelling session");
                token.cancel();
            }
        })
    };
    let session = coordinator.run(session, token).await;
    interrupt.abort();
    let session = session?;
    info!(session_id = %id, status = %session.status, "Session finished");

    if session.status == RefactorStatus::Failed {
        return Err(CliError::SessionFailed {
            session_id: id,
            reason: session.error.unwrap_or_else(|| "unknown error".into()),
        }
        .into());
    }

    let result = ctx.service.get_result(id).await?;
    let written = args.write && result.status == RefactorStatus::Completed;
    let mut commit = None;
    if written {
        if let (Some(git), Some(branch)) = (&git, &args.branch) {
            git.create_branch(branch)?;
        }
        std::fs::write(&args.file, &result.final_code)
            .with_context(|| format!("Failed to write {}", args.file.display()))?;
        info!(file = %args.file.display(), "Refactored code written");

        match &git {
            Some(git) if args.commit && result.metrics.lines_changed > 0 => {
                // git runs from the work tree root, so the path must not be relative
                let path = std::fs::canonicalize(&args.file)
                    .with_context(|| format!("Failed to resolve {}", args.file.display()))?;
                let message = format!("snre: refactor {} (session {})", args.file.display(), id);
                commit = Some(git.commit(&[path.as_path()], &message)?);
            }
            _ => {}
        }
    }

    if cli.json {
        return print_json(&result);
    }

    let icon = if result.status == RefactorStatus::Completed { "✅" } else { "⚠️" };
    println!("{} Session {}", icon, result.status);
    if let Some(reason) = result.stop_reason {
        println!("   Stop reason: {:?}", reason);
    }
    if result.budget_exhausted {
        println!("   Iteration budget exhausted; more changes may be possible");
    }
    print_metrics(&result.metrics);
    if written {
        println!("   Written to {}", args.file.display());
    }
    if let Some(hash) = commit {
        println!("   Committed {}", hash);
    }
    Ok(())
}
