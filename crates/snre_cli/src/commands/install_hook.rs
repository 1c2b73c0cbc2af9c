//! `snre install-hook` - install the pre-commit hook into a git repository.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{print_json, Cli};
use crate::git::GitHook;

#[derive(Args)]
pub struct InstallHookArgs {
    /// Any path inside the repository
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Replace a pre-commit hook that snre did not write
    #[arg(long)]
    pub force: bool,
}

pub fn execute(cli: &Cli, args: &InstallHookArgs) -> Result<()> {
    let git = GitHook::discover(&args.path)?;
    let hook = git.install_hooks(args.force)?;

    if cli.json {
        return print_json(&serde_json::json!({
            "repository": git.root(),
            "hook": hook,
        }));
    }
    println!("🪝 Pre-commit hook installed at {}", hook.display());
    println!("   Staged .py files must pass `snre analyze --strict`");
    Ok(())
}
