//! In-process backends for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::error::{CoreError, CoreResult};
use crate::repository::{prepare_write, EvolutionStore, SessionRepository, UpdateFn};
use crate::session::{EvolutionStep, RefactorSession, SessionId, SnapshotKey};

/// Session repository held in memory, with the same locking contract as the
/// durable backends.
pub struct InMemorySessionRepository {
    records: Mutex<HashMap<SessionId, RefactorSession>>,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl InMemorySessionRepository {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Acquire the write lock of one session, waiting at most the lock timeout.
    pub async fn lock_session(&self, id: SessionId) -> CoreResult<OwnedMutexGuard<()>> {
        let lock = self.locks.lock().entry(id).or_default().clone();
        let started = Instant::now();
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| CoreError::LockContention {
                session_id: id,
                waited_ms: started.elapsed().as_millis() as u64,
            })
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, session: &RefactorSession) -> CoreResult<()> {
        let _guard = self.lock_session(session.id).await?;
        let mut records = self.records.lock();
        let record = prepare_write(records.get(&session.id), session)?;
        records.insert(session.id, record);
        Ok(())
    }

    async fn load(&self, id: SessionId) -> CoreResult<RefactorSession> {
        self.records
            .lock()
            .get(&id)
            .cloned()
            .ok_or(CoreError::SessionNotFound(id))
    }

    async fn list_active(&self) -> CoreResult<Vec<SessionId>> {
        let records = self.records.lock();
        let mut active: Vec<&RefactorSession> =
            records.values().filter(|s| !s.is_terminal()).collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active.into_iter().map(|s| s.id).collect())
    }

    async fn delete(&self, id: SessionId) -> CoreResult<()> {
        let _guard = self.lock_session(id).await?;
        self.records
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::SessionNotFound(id))
    }

    async fn update(&self, id: SessionId, apply: UpdateFn) -> CoreResult<RefactorSession> {
        let _guard = self.lock_session(id).await?;
        let mut records = self.records.lock();
        let stored = records.get(&id).ok_or(CoreError::SessionNotFound(id))?;
        let mut session = prepare_write(Some(stored), stored)?;
        apply(&mut session)?;
        session.updated_at = Utc::now();
        records.insert(id, session.clone());
        Ok(session)
    }
}

/// Evolution history and snapshots held in memory.
#[derive(Default)]
pub struct MemoryEvolutionStore {
    history: Mutex<HashMap<SessionId, Vec<EvolutionStep>>>,
    snapshots: Mutex<BTreeMap<SnapshotKey, String>>,
}

impl MemoryEvolutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvolutionStore for MemoryEvolutionStore {
    async fn append_step(&self, session_id: SessionId, step: &EvolutionStep) -> CoreResult<()> {
        self.history
            .lock()
            .entry(session_id)
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn load_history(&self, session_id: SessionId) -> CoreResult<Vec<EvolutionStep>> {
        Ok(self
            .history
            .lock()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_snapshot(&self, key: SnapshotKey, code: &str) -> CoreResult<()> {
        let mut snapshots = self.snapshots.lock();
        if snapshots.contains_key(&key) {
            return Err(CoreError::SnapshotExists {
                session_id: key.session_id,
                iteration: key.iteration,
            });
        }
        snapshots.insert(key, code.to_string());
        Ok(())
    }

    async fn read_snapshot(&self, key: SnapshotKey) -> CoreResult<String> {
        self.snapshots
            .lock()
            .get(&key)
            .cloned()
            .ok_or(CoreError::SnapshotNotFound {
                session_id: key.session_id,
                iteration: key.iteration,
            })
    }

    async fn list_snapshots(&self, session_id: SessionId) -> CoreResult<Vec<u32>> {
        Ok(self
            .snapshots
            .lock()
            .keys()
            .filter(|k| k.session_id == session_id)
            .map(|k| k.iteration)
            .collect())
    }

    async fn remove_snapshot(&self, key: SnapshotKey) -> CoreResult<()> {
        self.snapshots.lock().remove(&key);
        Ok(())
    }
}
