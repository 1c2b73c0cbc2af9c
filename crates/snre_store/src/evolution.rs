//! File-backed evolution history and snapshots.
//!
//! ```text
//! <root>/<session>/history.jsonl                 one EvolutionStep per line
//! <root>/<session>/snapshots/snapshot_000003.txt code after iteration 3
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use snre_core::{CoreError, CoreResult, EvolutionStep, EvolutionStore, SessionId, SnapshotKey};

use crate::blocking;
use crate::error::{StoreError, StoreResult};
use crate::lock::FileLock;

const HISTORY_FILE: &str = "history.jsonl";
const SNAPSHOT_DIR: &str = "snapshots";

/// Evolution store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileEvolutionStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FileEvolutionStore {
    /// Open (creating if needed) `root`; history appends wait at most
    /// `lock_timeout` for the file lock.
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, lock_timeout })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn snapshot_path(&self, key: SnapshotKey) -> PathBuf {
        self.session_dir(key.session_id)
            .join(SNAPSHOT_DIR)
            .join(format!("snapshot_{:06}.txt", key.iteration))
    }
}

fn parse_snapshot_name(name: &str) -> Option<u32> {
    name.strip_prefix("snapshot_")?
        .strip_suffix(".txt")?
        .parse()
        .ok()
}

fn parse_history(text: &str) -> StoreResult<Vec<EvolutionStep>> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut steps = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(step) => steps.push(step),
            // A torn final line means the process died mid-append.
            Err(e) if idx + 1 == lines.len() && !text.ends_with('\n') => {
                warn!(error = %e, "Ignoring truncated history line");
            }
            Err(e) => {
                return Err(StoreError::Corrupt(format!("history line {}: {e}", idx + 1)));
            }
        }
    }
    Ok(steps)
}

#[async_trait]
impl EvolutionStore for FileEvolutionStore {
    async fn append_step(&self, session_id: SessionId, step: &EvolutionStep) -> CoreResult<()> {
        let dir = self.session_dir(session_id);
        let mut line = serde_json::to_string(step)?;
        line.push('\n');
        let timeout = self.lock_timeout;
        blocking(move || {
            fs::create_dir_all(&dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(HISTORY_FILE))?;
            let lock = FileLock::wait(file, session_id, timeout)?;
            let mut file = lock.file();
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
            Ok(())
        })
        .await
    }

    async fn load_history(&self, session_id: SessionId) -> CoreResult<Vec<EvolutionStep>> {
        let path = self.session_dir(session_id).join(HISTORY_FILE);
        blocking(move || match fs::read_to_string(&path) {
            Ok(text) => parse_history(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn write_snapshot(&self, key: SnapshotKey, code: &str) -> CoreResult<()> {
        let target = self.snapshot_path(key);
        let code = code.to_string();
        blocking(move || {
            let dir = target
                .parent()
                .ok_or_else(|| StoreError::Corrupt(format!("bad snapshot path {}", target.display())))?;
            fs::create_dir_all(dir)?;

            let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
            {
                let mut file = fs::File::create(&tmp)?;
                file.write_all(code.as_bytes())?;
                file.sync_all()?;
            }
            // Linking fails if the target exists, so a snapshot is never replaced.
            let linked = fs::hard_link(&tmp, &target);
            let _ = fs::remove_file(&tmp);
            match linked {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(CoreError::SnapshotExists {
                    session_id: key.session_id,
                    iteration: key.iteration,
                }
                .into()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn read_snapshot(&self, key: SnapshotKey) -> CoreResult<String> {
        let path = self.snapshot_path(key);
        blocking(move || match fs::read_to_string(&path) {
            Ok(code) => Ok(code),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CoreError::SnapshotNotFound {
                session_id: key.session_id,
                iteration: key.iteration,
            }
            .into()),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn list_snapshots(&self, session_id: SessionId) -> CoreResult<Vec<u32>> {
        let dir = self.session_dir(session_id).join(SNAPSHOT_DIR);
        blocking(move || {
            let pattern = format!(
                "{}/snapshot_*.txt",
                glob::Pattern::escape(&dir.to_string_lossy())
            );
            let mut iterations: Vec<u32> = glob::glob(&pattern)?
                .filter_map(Result::ok)
                .filter_map(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(parse_snapshot_name)
                })
                .collect();
            iterations.sort_unstable();
            Ok(iterations)
        })
        .await
    }

    async fn remove_snapshot(&self, key: SnapshotKey) -> CoreResult<()> {
        let path = self.snapshot_path(key);
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
