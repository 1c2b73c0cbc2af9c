//! One-JSON-file-per-session repository.
//!
//! Layout under the sessions directory:
//!
//! ```text
//! <id>.json   current record, replaced atomically on every write
//! <id>.lock   advisory lock file guarding writers of that record
//! ```
//!
//! Writers hold an exclusive `fs2` lock on the lock file for the whole
//! read-modify-write. Readers take no lock; the rename-into-place write means
//! they see either the previous record or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use snre_core::{
    prepare_write, CoreError, CoreResult, RefactorSession, SessionId, SessionRepository, UpdateFn,
};

use crate::blocking;
use crate::error::StoreResult;
use crate::lock::FileLock;
use crate::schema;

/// Session repository backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileSessionRepository {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileSessionRepository {
    /// Open (creating if needed) a sessions directory.
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, lock_timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(dir: &Path, id: SessionId) -> PathBuf {
        dir.join(format!("{id}.json"))
    }
}

fn session_lock(dir: &Path, id: SessionId, timeout: Duration) -> StoreResult<FileLock> {
    FileLock::acquire(&dir.join(format!("{id}.lock")), id, timeout)
}

fn read_record(path: &Path) -> StoreResult<Option<RefactorSession>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(schema::decode(&text)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_record(dir: &Path, session: &RefactorSession) -> StoreResult<()> {
    let text = schema::encode(session)?;
    let tmp = dir.join(format!(".{}.{}.tmp", session.id, Uuid::new_v4()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, FileSessionRepository::record_path(dir, session.id)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn save(&self, session: &RefactorSession) -> CoreResult<()> {
        let dir = self.dir.clone();
        let timeout = self.lock_timeout;
        let session = session.clone();
        blocking(move || {
            let _lock = session_lock(&dir, session.id, timeout)?;
            let path = Self::record_path(&dir, session.id);
            let stored = read_record(&path)?;
            let record = prepare_write(stored.as_ref(), &session)?;
            write_record(&dir, &record)?;
            debug!(session_id = %session.id, status = %record.status, "Session saved");
            Ok(())
        })
        .await
    }

    async fn load(&self, id: SessionId) -> CoreResult<RefactorSession> {
        let path = Self::record_path(&self.dir, id);
        blocking(move || read_record(&path)?.ok_or_else(|| CoreError::SessionNotFound(id).into()))
            .await
    }

    async fn list_active(&self) -> CoreResult<Vec<SessionId>> {
        let dir = self.dir.clone();
        blocking(move || {
            let pattern = format!(
                "{}/*.json",
                glob::Pattern::escape(&dir.to_string_lossy())
            );
            let mut active = Vec::new();
            for entry in glob::glob(&pattern)? {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable session entry");
                        continue;
                    }
                };
                match read_record(&path) {
                    Ok(Some(session)) if !session.is_terminal() => active.push(session),
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping undecodable session record"),
                }
            }
            active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(active.into_iter().map(|s| s.id).collect())
        })
        .await
    }

    async fn delete(&self, id: SessionId) -> CoreResult<()> {
        let dir = self.dir.clone();
        let timeout = self.lock_timeout;
        blocking(move || {
            let _lock = session_lock(&dir, id, timeout)?;
            match fs::remove_file(Self::record_path(&dir, id)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(CoreError::SessionNotFound(id).into())
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(&self, id: SessionId, apply: UpdateFn) -> CoreResult<RefactorSession> {
        let dir = self.dir.clone();
        let timeout = self.lock_timeout;
        blocking(move || {
            let _lock = session_lock(&dir, id, timeout)?;
            let stored =
                read_record(&Self::record_path(&dir, id))?.ok_or(CoreError::SessionNotFound(id))?;
            let mut session = prepare_write(Some(&stored), &stored)?;
            apply(&mut session)?;
            session.updated_at = Utc::now();
            write_record(&dir, &session)?;
            Ok(session)
        })
        .await
    }
}
