//! Git integration for refactored files.
//!
//! Creates a branch for a refactoring, commits the rewritten file, and
//! installs a pre-commit hook that runs `snre analyze --strict` on staged
//! Python files.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::commands::CliError;

/// First lines of every hook written by [`GitHook::install_hooks`].
const HOOK_MARKER: &str = "# Installed by snre install-hook";

const PRE_COMMIT: &str = r#"#!/bin/sh
# Installed by snre install-hook
# Blocks the commit when an agent still reports issues in a staged file.
for file in $(git diff --cached --name-only --diff-filter=ACM -- '*.py'); do
    snre analyze --strict "$file" || exit 1
done
"#;

/// Git operations on the repository that contains a refactored file.
#[derive(Debug)]
pub struct GitHook {
    root: PathBuf,
}

impl GitHook {
    /// Check if Git is available on the system.
    pub fn is_git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Find the work tree containing `path` (a file or directory).
    pub fn discover(path: &Path) -> Result<Self, CliError> {
        let dir = if path.is_dir() {
            path
        } else {
            match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            }
        };
        let root = run_git(dir, ["rev-parse", "--show-toplevel"])?;
        debug!(root = %root, "Found git work tree");
        Ok(Self {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current branch, `None` on a detached head.
    pub fn current_branch(&self) -> Result<Option<String>, CliError> {
        let branch = self.git(["branch", "--show-current"])?;
        Ok(Some(branch).filter(|b| !b.is_empty()))
    }

    /// Create and check out `name`; staying on it if already there.
    pub fn create_branch(&self, name: &str) -> Result<(), CliError> {
        if self.current_branch()?.as_deref() == Some(name) {
            debug!(branch = name, "Already on branch");
            return Ok(());
        }
        self.git(["checkout", "-b", name])?;
        info!(branch = name, repo = %self.root.display(), "Branch created");
        Ok(())
    }

    /// Stage and commit only `paths`, returning the new commit hash.
    pub fn commit(&self, paths: &[&Path], message: &str) -> Result<String, CliError> {
        let pathspec = || paths.iter().map(|p| p.as_os_str());

        let add = [OsStr::new("add"), OsStr::new("--")];
        self.git(add.into_iter().chain(pathspec()))?;

        let commit = [
            OsStr::new("commit"),
            OsStr::new("-m"),
            OsStr::new(message),
            OsStr::new("--"),
        ];
        self.git(commit.into_iter().chain(pathspec())).map_err(|e| match e {
            CliError::Git(msg) if is_nothing_to_commit(&msg) => CliError::Git("Nothing to commit".into()),
            other => other,
        })?;

        let hash = self.git(["rev-parse", "HEAD"])?;
        info!(commit = %hash, message, "Committed refactored file");
        Ok(hash)
    }

    /// Write the pre-commit hook, returning its path.
    ///
    /// A hook not written by snre is only replaced when `force` is set.
    pub fn install_hooks(&self, force: bool) -> Result<PathBuf, CliError> {
        let hooks = PathBuf::from(self.git(["rev-parse", "--git-path", "hooks"])?);
        let hooks = if hooks.is_absolute() {
            hooks
        } else {
            self.root.join(hooks)
        };
        std::fs::create_dir_all(&hooks).map_err(|e| io_error(&hooks, e))?;

        let path = hooks.join("pre-commit");
        if !force {
            if let Ok(existing) = std::fs::read_to_string(&path) {
                if !existing.contains(HOOK_MARKER) {
                    return Err(CliError::Git(format!(
                        "{} already exists; pass --force to replace it",
                        path.display()
                    )));
                }
            }
        }

        std::fs::write(&path, PRE_COMMIT).map_err(|e| io_error(&path, e))?;
        make_executable(&path)?;
        info!(hook = %path.display(), "Pre-commit hook installed");
        Ok(path)
    }

    fn git<I, S>(&self, args: I) -> Result<String, CliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        run_git(&self.root, args)
    }
}

fn run_git<I, S>(dir: &Path, args: I) -> Result<String, CliError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let shown: Vec<String> = args
        .iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect();

    let output = Command::new("git")
        .args(&args)
        .current_dir(dir)
        .output()
        .map_err(|e| CliError::Git(format!("Failed to run git {}: {}", shown.join(" "), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(CliError::Git(format!(
            "git {} failed: {}",
            shown.first().map(String::as_str).unwrap_or(""),
            detail.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn is_nothing_to_commit(message: &str) -> bool {
    ["nothing to commit", "nothing added to commit", "no changes added to commit"]
        .iter()
        .any(|needle| message.contains(needle))
}

fn io_error(path: &Path, e: std::io::Error) -> CliError {
    CliError::Git(format!("{}: {}", path.display(), e))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), CliError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| io_error(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), CliError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo() -> Option<(TempDir, GitHook)> {
        if !GitHook::is_git_available() {
            println!("Git not available, skipping test");
            return None;
        }
        let dir = TempDir::new().unwrap();
        run_git(dir.path(), ["init", "-q"]).unwrap();
        run_git(dir.path(), ["config", "user.name", "snre"]).unwrap();
        run_git(dir.path(), ["config", "user.email", "snre@localhost"]).unwrap();
        run_git(dir.path(), ["config", "commit.gpgsign", "false"]).unwrap();
        let git = GitHook::discover(dir.path()).unwrap();
        Some((dir, git))
    }

    #[test]
    fn test_discover_outside_repo_fails() {
        if !GitHook::is_git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let err = GitHook::discover(&dir.path().join("a.py")).unwrap_err();
        assert!(matches!(err, CliError::Git(_)));
    }

    #[test]
    fn test_branch_and_commit_only_target_file() {
        let Some((dir, git)) = init_repo() else { return };
        let target = dir.path().join("app.py");
        let other = dir.path().join("notes.txt");
        std::fs::write(&target, "x = 1\n").unwrap();
        std::fs::write(&other, "scratch\n").unwrap();

        git.create_branch("snre/refactor").unwrap();
        git.create_branch("snre/refactor").unwrap();
        assert_eq!(git.current_branch().unwrap().as_deref(), Some("snre/refactor"));

        let hash = git.commit(&[target.as_path()], "snre: refactor app.py").unwrap();
        assert!(!hash.is_empty());
        assert_eq!(git.git(["log", "-1", "--format=%s"]).unwrap(), "snre: refactor app.py");
        assert_eq!(git.git(["ls-files"]).unwrap(), "app.py");

        let err = git.commit(&[target.as_path()], "again").unwrap_err();
        assert!(matches!(err, CliError::Git(msg) if msg == "Nothing to commit"));
    }

    #[test]
    fn test_install_hooks_respects_foreign_hook() {
        let Some((_dir, git)) = init_repo() else { return };

        let path = git.install_hooks(false).unwrap();
        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("snre analyze --strict"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        // reinstalling over our own hook is fine
        git.install_hooks(false).unwrap();

        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        assert!(matches!(git.install_hooks(false), Err(CliError::Git(_))));
        git.install_hooks(true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains(HOOK_MARKER));
    }
}
