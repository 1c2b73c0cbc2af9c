//! SQLite session repository.
//!
//! A single `sessions` table holds the enveloped JSON record plus the columns
//! needed for listing. Every operation opens its own connection on a blocking
//! thread; writers use `BEGIN IMMEDIATE` so the database write lock is taken
//! before the stored record is read, and `busy_timeout` bounds the wait.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use snre_core::{
    prepare_write, CoreError, CoreResult, RefactorSession, SessionId, SessionRepository, UpdateFn,
};

use crate::blocking;
use crate::error::{StoreError, StoreResult};
use crate::schema;

const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
"#;

/// Session repository stored in one SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteSessionRepository {
    path: PathBuf,
    lock_timeout: Duration,
}

impl SqliteSessionRepository {
    /// Open the database, creating the file and table when missing.
    pub async fn open(path: impl Into<PathBuf>, lock_timeout: Duration) -> CoreResult<Self> {
        let path = path.into();
        let repo = Self { path, lock_timeout };
        let init = repo.clone();
        blocking(move || {
            if let Some(parent) = init.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let conn = init.connect()?;
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            conn.execute_batch(CREATE_SCHEMA)?;
            info!(path = %init.path.display(), journal_mode = %mode, "Session database ready");
            Ok(())
        })
        .await?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.lock_timeout)?;
        Ok(conn)
    }

    /// Run `body` inside an IMMEDIATE transaction, reporting a busy database
    /// as lock contention on `id`.
    fn write_tx<T>(
        &self,
        id: SessionId,
        body: impl FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let started = Instant::now();
        let run = || -> StoreResult<T> {
            let mut conn = self.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = body(&tx)?;
            tx.commit()?;
            Ok(value)
        };
        run().map_err(|e| match e {
            StoreError::Sqlite(ref inner) if is_busy(inner) => CoreError::LockContention {
                session_id: id,
                waited_ms: started.elapsed().as_millis() as u64,
            }
            .into(),
            other => other,
        })
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn select_record(conn: &Connection, id: SessionId) -> StoreResult<Option<RefactorSession>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM sessions WHERE session_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    data.map(|text| schema::decode(&text)).transpose()
}

fn upsert_record(conn: &Connection, session: &RefactorSession) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO sessions (session_id, status, schema_version, data, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(session_id) DO UPDATE SET
            status = excluded.status,
            schema_version = excluded.schema_version,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
        params![
            session.id.to_string(),
            session.status.as_str(),
            schema::SCHEMA_VERSION,
            schema::encode(session)?,
            session.created_at.to_rfc3339(),
            session.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn save(&self, session: &RefactorSession) -> CoreResult<()> {
        let repo = self.clone();
        let session = session.clone();
        blocking(move || {
            repo.write_tx(session.id, |tx| {
                let stored = select_record(tx, session.id)?;
                let record = prepare_write(stored.as_ref(), &session)?;
                upsert_record(tx, &record)
            })?;
            debug!(session_id = %session.id, "Session saved");
            Ok(())
        })
        .await
    }

    async fn load(&self, id: SessionId) -> CoreResult<RefactorSession> {
        let repo = self.clone();
        blocking(move || {
            let conn = repo.connect()?;
            select_record(&conn, id)?.ok_or_else(|| CoreError::SessionNotFound(id).into())
        })
        .await
    }

    async fn list_active(&self) -> CoreResult<Vec<SessionId>> {
        let repo = self.clone();
        blocking(move || {
            let conn = repo.connect()?;
            let mut stmt = conn.prepare(
                "SELECT session_id, data FROM sessions WHERE status IN ('pending', 'in_progress')",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut active = Vec::new();
            for row in rows {
                let (id, data) = row?;
                match schema::decode(&data) {
                    Ok(session) if !session.is_terminal() => active.push(session),
                    Ok(_) => {}
                    Err(e) => warn!(session_id = %id, error = %e, "Skipping undecodable session record"),
                }
            }
            active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(active.into_iter().map(|s| s.id).collect())
        })
        .await
    }

    async fn delete(&self, id: SessionId) -> CoreResult<()> {
        let repo = self.clone();
        blocking(move || {
            repo.write_tx(id, |tx| {
                let removed = tx.execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    params![id.to_string()],
                )?;
                if removed == 0 {
                    return Err(CoreError::SessionNotFound(id).into());
                }
                Ok(())
            })
        })
        .await
    }

    async fn update(&self, id: SessionId, apply: UpdateFn) -> CoreResult<RefactorSession> {
        let repo = self.clone();
        blocking(move || {
            repo.write_tx(id, move |tx| {
                let stored = select_record(tx, id)?.ok_or(CoreError::SessionNotFound(id))?;
                let mut session = prepare_write(Some(&stored), &stored)?;
                apply(&mut session)?;
                session.updated_at = Utc::now();
                upsert_record(tx, &session)?;
                Ok(session)
            })
        })
        .await
    }
}
