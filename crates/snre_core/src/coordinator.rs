//! The refactoring loop.
//!
//! One [`Coordinator::run`] drives one session: propose, vote, decide, apply,
//! post-validate, record, persist, repeated until nothing more is accepted,
//! the iteration budget or timeout runs out, or cancellation is observed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::RefactorAgent;
use crate::config::SnreConfig;
use crate::consensus::{decide, VoteMatrix};
use crate::error::{CoreError, CoreResult};
use crate::events::{StepEvent, StepListener};
use crate::models::{AgentId, Change, ChangeId, ConsensusDecision};
use crate::pool::{AgentPool, PhaseOutcome};
use crate::registry::{AgentRegistration, AgentRegistry};
use crate::repository::SessionRepository;
use crate::session::{
    AgentFailure, AgentPhase, EvolutionStep, RefactorSession, RefactorStatus, Rejection,
    SnapshotKey, StopReason,
};
use crate::tracker;

/// Drives refactoring sessions against a registry and a repository.
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    repository: Arc<dyn SessionRepository>,
    listeners: Vec<Arc<dyn StepListener>>,
    config: SnreConfig,
    pool: AgentPool,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        repository: Arc<dyn SessionRepository>,
        config: SnreConfig,
    ) -> Self {
        let pool = AgentPool::new(config.max_concurrent_agents, config.agent_timeout());
        Self {
            registry,
            repository,
            listeners: Vec::new(),
            config,
            pool,
        }
    }

    /// Subscribe a listener to step-completed notifications.
    pub fn with_listener(mut self, listener: Arc<dyn StepListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(&self) -> &SnreConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn repository(&self) -> Arc<dyn SessionRepository> {
        Arc::clone(&self.repository)
    }

    /// Create and persist a `PENDING` session.
    ///
    /// Unknown agent ids are rejected here, before any work begins.
    pub async fn create_session(
        &self,
        target: impl Into<String>,
        code: impl Into<String>,
        agent_ids: &[AgentId],
    ) -> CoreResult<RefactorSession> {
        if agent_ids.is_empty() {
            return Err(CoreError::config("a session needs at least one agent"));
        }
        self.registry.resolve(agent_ids)?;

        let session = RefactorSession::new(target, code, agent_ids.to_vec());
        self.persist(&session).await?;
        info!(session_id = %session.id, target = %session.target, agents = ?session.agents, "Session created");
        Ok(session)
    }

    /// Create a session and run it to a terminal state.
    pub async fn refactor(
        &self,
        target: impl Into<String>,
        code: impl Into<String>,
        agent_ids: &[AgentId],
    ) -> CoreResult<RefactorSession> {
        let session = self.create_session(target, code, agent_ids).await?;
        self.run(session, CancellationToken::new()).await
    }

    /// Run `session` until it reaches a terminal state.
    ///
    /// A session that fails is returned as `Ok` with status `FAILED` and its
    /// error recorded; `Err` means the outcome itself could not be persisted.
    pub async fn run(
        &self,
        mut session: RefactorSession,
        cancel: CancellationToken,
    ) -> CoreResult<RefactorSession> {
        let started = Instant::now();
        let outcome = self.drive(&mut session, &cancel, started).await;

        let (status, reason) = match outcome {
            Ok(reason @ StopReason::Cancelled) => (RefactorStatus::Cancelled, reason),
            Ok(reason) => (RefactorStatus::Completed, reason),
            Err(CoreError::SessionTerminal { session_id, status }) => {
                info!(%session_id, %status, "Session finalized elsewhere");
                return self.repository.load(session_id).await;
            }
            Err(e) => {
                error!(session_id = %session.id, iteration = session.iteration(), error = %e, "Session failed");
                session.error = Some(e.to_string());
                (RefactorStatus::Failed, StopReason::Failed)
            }
        };

        self.analyze_final(&mut session).await;
        session.metrics = Some(
            tracker::metrics(
                &session.original_code,
                &session.current_code,
                &session.initial_analysis,
                &session.final_analysis,
            )
            .with_applied(&session.steps),
        );
        session.stop_reason = Some(reason);
        session.transition(status)?;
        self.persist(&session).await?;

        info!(
            session_id = %session.id,
            status = %session.status,
            iterations = session.iteration(),
            stop_reason = ?reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finished"
        );
        Ok(session)
    }

    async fn drive(
        &self,
        session: &mut RefactorSession,
        cancel: &CancellationToken,
        started: Instant,
    ) -> CoreResult<StopReason> {
        let agents = self.registry.resolve(&session.agents)?;
        let priorities: BTreeMap<AgentId, i32> = agents
            .iter()
            .map(|a| (a.id().to_string(), a.priority))
            .collect();

        if self.cancel_observed(session, cancel).await {
            return Ok(StopReason::Cancelled);
        }
        if session.status == RefactorStatus::Pending {
            session.transition(RefactorStatus::InProgress)?;
            self.persist(session).await?;
        }

        if session.initial_analysis.is_empty() {
            let code = session.current_code.clone();
            let outcome = self
                .pool
                .fan_out(&agents, AgentPhase::Analyze, move |agent: &dyn RefactorAgent| {
                    agent.analyze(&code)
                })
                .await;
            self.ensure_survivors(session, AgentPhase::Analyze, &outcome)?;
            session.analysis_failures.extend(outcome.failures);
            if cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            session.initial_analysis = outcome.results.into_iter().map(|(_, a)| a).collect();
        }

        let deadline = started + self.config.timeout();
        loop {
            if self.cancel_observed(session, cancel).await {
                return Ok(StopReason::Cancelled);
            }
            if timed_out(session, deadline) {
                return Ok(StopReason::TimedOut);
            }
            if session.iteration() >= self.config.max_iterations {
                return Ok(StopReason::IterationBudgetExhausted);
            }

            match self.iterate(session, &agents, &priorities, cancel, deadline).await? {
                Some(step) => self.record(session, step).await?,
                None if cancel.is_cancelled() || session.cancel_requested => {
                    return Ok(StopReason::Cancelled)
                }
                None if timed_out(session, deadline) => return Ok(StopReason::TimedOut),
                None => {
                    info!(session_id = %session.id, iteration = session.iteration(), "Converged");
                    return Ok(StopReason::Converged);
                }
            }
        }
    }

    /// One propose/vote/decide/apply/validate round.
    ///
    /// Returns `None` when the session converged, or when cancellation was
    /// seen after a fan-in or before applying a validated change. Otherwise
    /// returns the step to record. Running past `deadline` stops the retry
    /// loop early; the step still records the rejections made so far.
    async fn iterate(
        &self,
        session: &mut RefactorSession,
        agents: &[AgentRegistration],
        priorities: &BTreeMap<AgentId, i32>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> CoreResult<Option<EvolutionStep>> {
        let iteration = session.iteration();
        let mut failures: Vec<AgentFailure> = Vec::new();

        let code = session.current_code.clone();
        let proposed = self
            .pool
            .fan_out(agents, AgentPhase::Propose, move |agent: &dyn RefactorAgent| {
                agent.suggest_changes(&code)
            })
            .await;
        self.ensure_survivors(session, AgentPhase::Propose, &proposed)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        failures.extend(proposed.failures);

        let candidates = filter_candidates(session, agents, proposed.results);
        if candidates.is_empty() {
            return Ok(None);
        }
        let candidate_count = candidates.len();

        let ballots = Arc::new(candidates.clone());
        let voters = Arc::clone(&ballots);
        let voted = self
            .pool
            .fan_out(agents, AgentPhase::Vote, move |agent: &dyn RefactorAgent| agent.vote(&voters))
            .await;
        let mut vote_outcome = PhaseOutcome {
            results: Vec::new(),
            failures: voted.failures,
        };
        let mut matrix = VoteMatrix::new();
        for (agent_id, ballot) in voted.results {
            match complete_ballot(&ballots, ballot) {
                Ok(ballot) => {
                    matrix.insert(agent_id.clone(), ballot);
                    vote_outcome.results.push((agent_id, ()));
                }
                Err(message) => {
                    warn!(session_id = %session.id, iteration, agent_id = %agent_id, error = %message, "Rejected ballot");
                    vote_outcome.failures.push(AgentFailure {
                        agent_id,
                        phase: AgentPhase::Vote,
                        message,
                    });
                }
            }
        }
        self.ensure_survivors(session, AgentPhase::Vote, &vote_outcome)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        failures.extend(vote_outcome.failures);

        let threshold = self.config.consensus_threshold;
        let mut remaining = candidates;
        let mut decision = decide(&remaining, &matrix, threshold, priorities)?;
        if !decision.accepted {
            debug!(session_id = %session.id, iteration, score = decision.score, "No candidate reached the threshold");
            return Ok(None);
        }

        let mut applied: Option<Change> = None;
        let mut rejections = Vec::new();
        while let Some(winner) = decision.winner.clone() {
            let before = session.current_code.clone();
            let lines: Vec<&str> = before.split('\n').collect();
            let after = winner.apply_to(&lines);

            let (original, modified) = (before.clone(), after.clone());
            let validated = self
                .pool
                .fan_out(agents, AgentPhase::Validate, move |agent: &dyn RefactorAgent| {
                    Ok(agent.validate_result(&original, &modified))
                })
                .await;
            self.ensure_survivors(session, AgentPhase::Validate, &validated)?;
            failures.extend(validated.failures);

            let rejected_by: Vec<AgentId> = validated
                .results
                .into_iter()
                .filter(|(_, ok)| !ok)
                .map(|(id, _)| id)
                .collect();

            if rejected_by.is_empty() {
                if self.cancel_observed(session, cancel).await {
                    debug!(session_id = %session.id, iteration, change_id = %winner.id(), "Cancelled before apply");
                    return Ok(None);
                }
                info!(
                    session_id = %session.id,
                    iteration,
                    agent_id = %winner.agent_id(),
                    kind = %winner.kind(),
                    lines = ?winner.lines(),
                    score = decision.score,
                    "Applied change"
                );
                session.current_code = after;
                applied = Some(winner);
                break;
            }

            // the buffer was never replaced, so rolling back is a no-op
            let change_id = winner.id();
            info!(session_id = %session.id, iteration, change_id = %change_id, rejected_by = ?rejected_by, "Change rejected after apply");
            session.excluded_changes.insert(change_id.clone());
            remaining.retain(|c| c.id() != change_id);
            rejections.push(Rejection {
                change_id,
                rejected_by,
            });

            if cancel.is_cancelled() || timed_out(session, deadline) {
                decision = ConsensusDecision {
                    winner: None,
                    accepted: false,
                    ..decision
                };
                break;
            }
            decision = decide(&remaining, &matrix, threshold, priorities)?;
        }

        let snapshot = self
            .config
            .evolution
            .snapshot_due(iteration)
            .then_some(SnapshotKey {
                session_id: session.id,
                iteration,
            });

        Ok(Some(EvolutionStep {
            iteration,
            applied,
            decision,
            timestamp: Utc::now(),
            snapshot,
            candidates: candidate_count,
            agent_failures: failures,
            rejections,
        }))
    }

    /// Re-analyze the final code so `issues_fixed` compares like with like.
    ///
    /// Skipped when nothing changed. Failures are recorded, never fatal.
    async fn analyze_final(&self, session: &mut RefactorSession) {
        if session.current_code == session.original_code || session.initial_analysis.is_empty() {
            return;
        }
        let agents = match self.registry.resolve(&session.agents) {
            Ok(agents) => agents,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Skipping final analysis");
                return;
            }
        };
        let code = session.current_code.clone();
        let outcome = self
            .pool
            .fan_out(&agents, AgentPhase::Analyze, move |agent: &dyn RefactorAgent| {
                agent.analyze(&code)
            })
            .await;
        session.analysis_failures.extend(outcome.failures);
        session.final_analysis = outcome.results.into_iter().map(|(_, a)| a).collect();
    }

    async fn record(&self, session: &mut RefactorSession, step: EvolutionStep) -> CoreResult<()> {
        session.steps.push(step.clone());
        session.updated_at = Utc::now();

        let event = StepEvent {
            session_id: session.id,
            step,
            code: session.current_code.clone(),
        };
        for listener in &self.listeners {
            listener.on_step(&event).await;
        }

        self.persist(session).await
    }

    /// Save with bounded retries on lock contention, doubling the backoff.
    async fn persist(&self, session: &RefactorSession) -> CoreResult<()> {
        let mut backoff = Duration::from_millis(self.config.persist_backoff_ms);
        let mut attempt = 0;
        loop {
            match self.repository.save(session).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.persist_retries => {
                    attempt += 1;
                    warn!(
                        session_id = %session.id,
                        iteration = session.iteration(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Persist contended, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// In-process token or a cancellation persisted by another front-end.
    async fn cancel_observed(&self, session: &mut RefactorSession, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() || session.cancel_requested {
            return true;
        }
        match self.repository.load(session.id).await {
            Ok(stored) if stored.cancel_requested => {
                info!(session_id = %session.id, "Cancellation requested");
                session.cancel_requested = true;
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "Could not read cancellation flag");
                false
            }
        }
    }

    fn ensure_survivors<T>(
        &self,
        session: &RefactorSession,
        phase: AgentPhase,
        outcome: &PhaseOutcome<T>,
    ) -> CoreResult<()> {
        if outcome.results.is_empty() {
            return Err(CoreError::AllAgentsFailed {
                session_id: session.id,
                iteration: session.iteration(),
                phase,
            });
        }
        Ok(())
    }
}

fn timed_out(session: &RefactorSession, deadline: Instant) -> bool {
    if Instant::now() < deadline {
        return false;
    }
    warn!(session_id = %session.id, iteration = session.iteration(), "Session timed out");
    true
}

/// Drop proposals below their proposer's threshold, previously rejected
/// changes, stale ones, and duplicates. None of these are errors.
fn filter_candidates(
    session: &RefactorSession,
    agents: &[AgentRegistration],
    proposals: Vec<(AgentId, Vec<Change>)>,
) -> Vec<Change> {
    let lines: Vec<&str> = session.current_code.split('\n').collect();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for (agent_id, changes) in proposals {
        let min_confidence = agents
            .iter()
            .find(|a| a.id() == agent_id)
            .map(|a| a.min_confidence)
            .unwrap_or(0.0);

        for change in changes {
            let id = change.id();
            if change.agent_id() != agent_id {
                warn!(session_id = %session.id, agent_id = %agent_id, change_id = %id, "Dropping change attributed to another agent");
            } else if change.confidence() < min_confidence {
                debug!(session_id = %session.id, change_id = %id, confidence = change.confidence(), "Below proposer threshold");
            } else if session.excluded_changes.contains(&id) {
                debug!(session_id = %session.id, change_id = %id, "Previously rejected");
            } else if !change.matches(&lines) {
                debug!(session_id = %session.id, change_id = %id, "Stale proposal");
            } else if seen.insert(id) {
                candidates.push(change);
            }
        }
    }
    candidates
}

/// Check that `ballot` scores every candidate with a finite value, clamping
/// scores into `[0.0, 1.0]`.
fn complete_ballot(
    candidates: &[Change],
    ballot: HashMap<ChangeId, f64>,
) -> Result<HashMap<ChangeId, f64>, String> {
    let mut complete = HashMap::with_capacity(candidates.len());
    for change in candidates {
        let id = change.id();
        match ballot.get(&id) {
            Some(score) if score.is_finite() => {
                complete.insert(id, score.clamp(0.0, 1.0));
            }
            Some(score) => return Err(format!("non-finite score {} for change {}", score, id)),
            None => return Err(format!("no score for change {}", id)),
        }
    }
    Ok(complete)
}
