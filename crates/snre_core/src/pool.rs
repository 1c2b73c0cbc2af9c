//! Bounded fan-out of agent calls onto blocking worker threads.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::agent::RefactorAgent;
use crate::models::AgentId;
use crate::registry::AgentRegistration;
use crate::session::{AgentFailure, AgentPhase};

/// Results of one phase: successes in agent order, plus failures.
#[derive(Debug)]
pub struct PhaseOutcome<T> {
    pub results: Vec<(AgentId, T)>,
    pub failures: Vec<AgentFailure>,
}

impl<T> PhaseOutcome<T> {
    /// Whether every agent called in this phase failed.
    pub fn all_failed(&self) -> bool {
        self.results.is_empty() && !self.failures.is_empty()
    }
}

/// Runs one phase's agent calls with at most `max_concurrent` in flight.
///
/// Every call is issued before any result is consumed. A call that errors,
/// panics, or exceeds the per-call timeout becomes an [`AgentFailure`]; a
/// timed-out call keeps its worker thread until it returns, and its result
/// is dropped.
#[derive(Debug, Clone)]
pub struct AgentPool {
    semaphore: Arc<Semaphore>,
    call_timeout: Duration,
}

impl AgentPool {
    pub fn new(max_concurrent: usize, call_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            call_timeout,
        }
    }

    /// Slots not held by a running (or abandoned, still running) call.
    pub fn free_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn fan_out<T, F>(
        &self,
        agents: &[AgentRegistration],
        phase: AgentPhase,
        call: F,
    ) -> PhaseOutcome<T>
    where
        T: Send + 'static,
        F: Fn(&dyn RefactorAgent) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let call = Arc::new(call);
        let futures: Vec<_> = agents
            .iter()
            .map(|registration| {
                let agent = Arc::clone(&registration.agent);
                let agent_id = registration.id().to_string();
                let semaphore = Arc::clone(&self.semaphore);
                let call = Arc::clone(&call);
                let call_timeout = self.call_timeout;

                async move {
                    let permit = match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return (agent_id, Err("agent pool closed".to_string())),
                    };

                    // the permit lives as long as the worker thread
                    let task = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        call(agent.as_ref())
                    });

                    let outcome = match tokio::time::timeout(call_timeout, task).await {
                        Ok(Ok(Ok(value))) => Ok(value),
                        Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
                        Ok(Err(join)) if join.is_panic() => Err("agent panicked".to_string()),
                        Ok(Err(join)) => Err(format!("agent task aborted: {}", join)),
                        Err(_) => {
                            warn!(
                                agent_id = %agent_id,
                                %phase,
                                free_slots = semaphore.available_permits(),
                                "Timed-out call keeps its pool slot until the agent returns"
                            );
                            Err(format!("timed out after {}s", call_timeout.as_secs_f64()))
                        }
                    };
                    (agent_id, outcome)
                }
            })
            .collect();

        let mut outcome = PhaseOutcome {
            results: Vec::with_capacity(futures.len()),
            failures: Vec::new(),
        };
        for (agent_id, result) in join_all(futures).await {
            match result {
                Ok(value) => {
                    debug!(agent_id = %agent_id, %phase, "Agent call succeeded");
                    outcome.results.push((agent_id, value));
                }
                Err(message) => {
                    warn!(agent_id = %agent_id, %phase, error = %message, "Agent call failed");
                    outcome.failures.push(AgentFailure {
                        agent_id,
                        phase,
                        message,
                    });
                }
            }
        }
        outcome
    }
}
