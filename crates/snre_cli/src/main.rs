//! SNRE CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Session or agent not found
//! - 5: Session failed or not finished
//! - 6: Storage busy (lock contention)
//! - 7: Issues found by `analyze --strict`
//! - 8: Git operation failed

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod context;
mod git;

use commands::{Cli, CliError, Commands, LogFormat};
use snre_agents::AgentError;
use snre_core::CoreError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const NOT_FOUND: u8 = 4;
    pub const SESSION_FAILED: u8 = 5;
    pub const STORAGE_BUSY: u8 = 6;
    pub const ISSUES_FOUND: u8 = 7;
    pub const GIT_ERROR: u8 = 8;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let result = match cli.command {
        Commands::Start(ref args) => commands::start::execute(&cli, args).await,
        Commands::Status(ref args) => commands::status::execute(&cli, args).await,
        Commands::Result(ref args) => commands::result::execute(&cli, args).await,
        Commands::List => commands::list::execute(&cli).await,
        Commands::Cancel(ref args) => commands::cancel::execute(&cli, args).await,
        Commands::History(ref args) => commands::history::execute(&cli, args).await,
        Commands::Analyze(ref args) => commands::analyze::execute(&cli, args).await,
        Commands::InstallHook(ref args) => commands::install_hook::execute(&cli, args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Install the global subscriber; `SNRE_LOG` overrides the default filter.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_filter = if verbose { "snre=debug,info" } else { "snre=info,warn" };
    let filter = EnvFilter::try_from_env("SNRE_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::Config(_) | CoreError::UnsupportedSchema { .. } => ExitCodes::CONFIG_ERROR,
                CoreError::SessionNotFound(_)
                | CoreError::UnknownAgent(_)
                | CoreError::SnapshotNotFound { .. } => ExitCodes::NOT_FOUND,
                CoreError::NotTerminal { .. }
                | CoreError::SessionTerminal { .. }
                | CoreError::AllAgentsFailed { .. } => ExitCodes::SESSION_FAILED,
                CoreError::LockContention { .. } => ExitCodes::STORAGE_BUSY,
                _ => ExitCodes::GENERAL_ERROR,
            };
        }
        if let Some(agent) = cause.downcast_ref::<AgentError>() {
            return match agent {
                AgentError::NotFound(_) => ExitCodes::NOT_FOUND,
                _ => ExitCodes::CONFIG_ERROR,
            };
        }
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return match cli {
                CliError::SessionFailed { .. } => ExitCodes::SESSION_FAILED,
                CliError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
                CliError::IssuesFound(_) => ExitCodes::ISSUES_FOUND,
                CliError::Git(_) => ExitCodes::GIT_ERROR,
            };
        }
    }
    ExitCodes::GENERAL_ERROR
}
