//! Storage contracts for sessions and evolution history.

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::session::{EvolutionStep, RefactorSession, SessionId, SnapshotKey};

/// Mutation applied under the session's write lock by [`SessionRepository::update`].
pub type UpdateFn = Box<dyn FnOnce(&mut RefactorSession) -> CoreResult<()> + Send>;

/// Persistence contract shared by every session backend.
///
/// Writes take a per-session exclusive lock with a bounded wait and fail with
/// [`CoreError::LockContention`] when it cannot be acquired. Reads take no lock
/// and may observe a slightly stale record, never a partial one.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store `session`, replacing any earlier record with the same id.
    ///
    /// Fails with [`CoreError::SessionTerminal`] when the stored record is
    /// already terminal. A stored `cancel_requested` flag is kept.
    async fn save(&self, session: &RefactorSession) -> CoreResult<()>;

    /// Load a session, failing with [`CoreError::SessionNotFound`] if absent.
    async fn load(&self, id: SessionId) -> CoreResult<RefactorSession>;

    /// Ids of sessions not yet in a terminal state, oldest first.
    async fn list_active(&self) -> CoreResult<Vec<SessionId>>;

    /// Remove a session record.
    async fn delete(&self, id: SessionId) -> CoreResult<()>;

    /// Locked read-modify-write of a stored, non-terminal session.
    async fn update(&self, id: SessionId, apply: UpdateFn) -> CoreResult<RefactorSession>;
}

/// Append-only step history and additive snapshot storage.
#[async_trait]
pub trait EvolutionStore: Send + Sync {
    async fn append_step(&self, session_id: SessionId, step: &EvolutionStep) -> CoreResult<()>;

    /// Steps in the order they were appended.
    async fn load_history(&self, session_id: SessionId) -> CoreResult<Vec<EvolutionStep>>;

    /// Store a snapshot; fails with [`CoreError::SnapshotExists`] rather than overwrite.
    async fn write_snapshot(&self, key: SnapshotKey, code: &str) -> CoreResult<()>;

    async fn read_snapshot(&self, key: SnapshotKey) -> CoreResult<String>;

    /// Iterations with a stored snapshot, ascending.
    async fn list_snapshots(&self, session_id: SessionId) -> CoreResult<Vec<u32>>;

    async fn remove_snapshot(&self, key: SnapshotKey) -> CoreResult<()>;
}

/// Compute the record a write should store, given what is stored now.
///
/// Shared by all backends so they agree on terminal immutability and on
/// never losing a cancellation request to a concurrent writer.
pub fn prepare_write(
    stored: Option<&RefactorSession>,
    incoming: &RefactorSession,
) -> CoreResult<RefactorSession> {
    let mut record = incoming.clone();
    if let Some(stored) = stored {
        if stored.is_terminal() {
            return Err(CoreError::SessionTerminal {
                session_id: stored.id,
                status: stored.status,
            });
        }
        record.cancel_requested |= stored.cancel_requested;
    }
    Ok(record)
}
