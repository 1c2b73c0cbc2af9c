//! Front-end facade: start, inspect, cancel and collect sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::models::AgentId;
use crate::repository::SessionRepository;
use crate::session::{RefactorMetrics, RefactorSession, RefactorStatus, SessionId, StopReason};
use crate::tracker;

/// Progress of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub status: RefactorStatus,
    pub iteration: u32,
    pub stop_reason: Option<StopReason>,
    pub cancel_requested: bool,
    pub error: Option<String>,
}

impl From<&RefactorSession> for SessionStatus {
    fn from(session: &RefactorSession) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            iteration: session.iteration(),
            stop_reason: session.stop_reason,
            cancel_requested: session.cancel_requested,
            error: session.error.clone(),
        }
    }
}

/// Outcome of a terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactorResult {
    pub session_id: SessionId,
    pub status: RefactorStatus,
    pub final_code: String,
    pub diff: String,
    pub metrics: RefactorMetrics,
    pub stop_reason: Option<StopReason>,
    /// Set when the loop stopped on the iteration budget
    pub budget_exhausted: bool,
}

struct RunHandle {
    token: CancellationToken,
    handle: JoinHandle<CoreResult<RefactorSession>>,
}

/// Session operations exposed to CLI and API front-ends.
pub struct RefactorService {
    coordinator: Arc<Coordinator>,
    repository: Arc<dyn SessionRepository>,
    running: Arc<Mutex<HashMap<SessionId, RunHandle>>>,
}

impl RefactorService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let repository = coordinator.repository();
        Self {
            coordinator,
            repository,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Create a session and run it in the background.
    pub async fn start_session(
        &self,
        target: impl Into<String>,
        code: impl Into<String>,
        agent_ids: &[AgentId],
    ) -> CoreResult<SessionId> {
        let session = self.coordinator.create_session(target, code, agent_ids).await?;
        let id = session.id;
        let token = CancellationToken::new();

        let mut running = self.running.lock();
        let handle = {
            let coordinator = Arc::clone(&self.coordinator);
            let running = Arc::clone(&self.running);
            let token = token.clone();
            tokio::spawn(async move {
                let result = coordinator.run(session, token).await;
                running.lock().remove(&id);
                result
            })
        };
        running.insert(id, RunHandle { token, handle });
        Ok(id)
    }

    /// Create a session and run it to completion on the current task.
    pub async fn run_to_completion(
        &self,
        target: impl Into<String>,
        code: impl Into<String>,
        agent_ids: &[AgentId],
    ) -> CoreResult<RefactorSession> {
        self.coordinator.refactor(target, code, agent_ids).await
    }

    /// Wait for a background run to finish and return the stored session.
    pub async fn wait(&self, id: SessionId) -> CoreResult<RefactorSession> {
        let run = self.running.lock().remove(&id);
        match run {
            Some(run) => run
                .handle
                .await
                .map_err(|e| CoreError::Storage(format!("session task for {} failed: {}", id, e)))?,
            None => self.repository.load(id).await,
        }
    }

    pub async fn get_status(&self, id: SessionId) -> CoreResult<SessionStatus> {
        let session = self.repository.load(id).await?;
        Ok(SessionStatus::from(&session))
    }

    /// Final code, diff and metrics of a terminal session.
    pub async fn get_result(&self, id: SessionId) -> CoreResult<RefactorResult> {
        let session = self.repository.load(id).await?;
        if !session.is_terminal() {
            return Err(CoreError::NotTerminal {
                session_id: id,
                status: session.status,
            });
        }

        let metrics = match session.metrics.clone() {
            Some(m) => m,
            None => tracker::metrics(
                &session.original_code,
                &session.current_code,
                &session.initial_analysis,
                &session.final_analysis,
            )
            .with_applied(&session.steps),
        };
        Ok(RefactorResult {
            session_id: id,
            status: session.status,
            diff: tracker::diff(&session.original_code, &session.current_code),
            final_code: session.current_code.clone(),
            metrics,
            stop_reason: session.stop_reason,
            budget_exhausted: session.budget_exhausted(),
        })
    }

    /// Request cancellation.
    ///
    /// The request is persisted so a run in another process observes it at its
    /// next loop boundary. A `PENDING` session with no live run is cancelled
    /// directly. Cancelling a terminal session fails.
    pub async fn cancel(&self, id: SessionId) -> CoreResult<()> {
        let token = self.running.lock().get(&id).map(|r| r.token.clone());
        let live = token.is_some();

        let session = self
            .repository
            .update(
                id,
                Box::new(move |session| {
                    session.cancel_requested = true;
                    if !live && session.status == RefactorStatus::Pending {
                        session.stop_reason = Some(StopReason::Cancelled);
                        session.transition(RefactorStatus::Cancelled)?;
                    }
                    Ok(())
                }),
            )
            .await?;

        if let Some(token) = token {
            token.cancel();
        }
        if session.status == RefactorStatus::Cancelled {
            info!(session_id = %id, "Pending session cancelled");
        } else {
            info!(session_id = %id, status = %session.status, "Cancellation requested");
        }
        Ok(())
    }

    pub async fn list_active(&self) -> CoreResult<Vec<SessionId>> {
        self.repository.list_active().await
    }
}

