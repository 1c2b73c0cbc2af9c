//! CLI command definitions.
//!
//! Each subcommand maps to one operation of the refactoring service.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use snre_core::{RefactorMetrics, SessionId};

pub mod analyze;
pub mod cancel;
pub mod history;
pub mod install_hook;
pub mod list;
pub mod result;
pub mod start;
pub mod status;

/// SNRE - Swarm Neural Refactoring Engine
#[derive(Parser)]
#[command(name = "snre")]
#[command(version, about = "SNRE - consensus-driven code refactoring by a swarm of agents")]
#[command(long_about = r#"
SNRE runs independent analysis agents over a source file. Every agent proposes
edits and votes on all proposals; an edit is applied only when the agents agree,
one per iteration, until nothing more can be agreed on.

COMMANDS:
  start     → Refactor a file and wait for the session to finish
  status    → Show the progress of a session
  result    → Print the final code, diff or metrics of a finished session
  list      → List sessions that have not finished
  cancel    → Request cancellation of a session
  history   → Show the recorded evolution steps and snapshots of a session
  analyze   → Print every agent's analysis of a file without changing it
  install-hook → Install a git pre-commit hook that runs `analyze --strict`

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Configuration error
  4 - Session or agent not found
  5 - Session failed or not finished
  6 - Storage busy (lock contention)
  7 - Issues found (`analyze --strict`)
  8 - Git operation failed
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Engine configuration file (.yaml, .yml or .toml)
    #[arg(long, global = true, env = "SNRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent profiles file (.yaml)
    #[arg(long, global = true, env = "SNRE_PROFILES")]
    pub profiles: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refactor a file and wait for the session to finish
    Start(start::StartArgs),

    /// Show the progress of a session
    Status(status::StatusArgs),

    /// Print the outcome of a finished session
    Result(result::ResultArgs),

    /// List sessions that have not finished
    List,

    /// Request cancellation of a session
    Cancel(cancel::CancelArgs),

    /// Show recorded evolution steps and snapshots
    History(history::HistoryArgs),

    /// Print every agent's analysis of a file
    Analyze(analyze::AnalyzeArgs),

    /// Install a git pre-commit hook that blocks commits with open issues
    InstallHook(install_hook::InstallHookArgs),
}

/// Failures reported by the CLI itself.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Session {session_id} failed: {reason}")]
    SessionFailed { session_id: SessionId, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} issue(s) found")]
    IssuesFound(usize),

    #[error("Git error: {0}")]
    Git(String),
}

/// Split a comma-separated agent list, dropping empty entries.
pub fn parse_agent_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Print metrics as an indented block.
pub fn print_metrics(metrics: &RefactorMetrics) {
    println!("   Lines changed:    {}", metrics.lines_changed);
    println!("   Complexity delta: {:+}", metrics.complexity_delta);
    println!("   Issues fixed:     {}", metrics.issues_fixed);
    println!("   Changes applied:  {}", metrics.applied_confidences.len());
    for (agent, count) in &metrics.agent_contributions {
        println!("      - {}: {}", agent, count);
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_list() {
        assert_eq!(
            parse_agent_list("loop_simplifier, security_enforcer,,"),
            vec!["loop_simplifier", "security_enforcer"]
        );
        assert!(parse_agent_list(" , ").is_empty());
    }

    #[test]
    fn test_cli_parses_start() {
        let cli = Cli::try_parse_from([
            "snre",
            "--log-format",
            "json",
            "start",
            "app.py",
            "--agents",
            "loop_simplifier,pattern_optimizer",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Commands::Start(args) => {
                assert_eq!(args.file, PathBuf::from("app.py"));
                assert_eq!(args.agents.as_deref(), Some("loop_simplifier,pattern_optimizer"));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_session_id() {
        assert!(Cli::try_parse_from(["snre", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_cli_parses_result_flags() {
        let id = uuid::Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["snre", "result", &id, "--diff", "--output", "out.py"]).unwrap();
        match cli.command {
            Commands::Result(args) => {
                assert!(args.diff);
                assert_eq!(args.output, Some(PathBuf::from("out.py")));
            }
            _ => panic!("expected result"),
        }
    }

    #[test]
    fn test_cli_git_flags_require_write() {
        assert!(Cli::try_parse_from(["snre", "start", "app.py", "--commit"]).is_err());
        assert!(Cli::try_parse_from(["snre", "start", "app.py", "--branch", "snre/x"]).is_err());

        let cli = Cli::try_parse_from([
            "snre", "start", "app.py", "--write", "--branch", "snre/x", "--commit",
        ])
        .unwrap();
        match cli.command {
            Commands::Start(args) => {
                assert!(args.write && args.commit);
                assert_eq!(args.branch.as_deref(), Some("snre/x"));
            }
            _ => panic!("expected start"),
        }

        let cli = Cli::try_parse_from(["snre", "install-hook"]).unwrap();
        match cli.command {
            Commands::InstallHook(args) => {
                assert_eq!(args.path, PathBuf::from("."));
                assert!(!args.force);
            }
            _ => panic!("expected install-hook"),
        }
    }
}
