//! Session aggregate, evolution history and derived metrics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{AgentAnalysis, AgentId, Change, ChangeId, ConsensusDecision};

/// Unique identifier of a refactoring session.
pub type SessionId = Uuid;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorStatus {
    #[serde(alias = "started")]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl Default for RefactorStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RefactorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefactorStatus::Pending => "pending",
            RefactorStatus::InProgress => "in_progress",
            RefactorStatus::Completed => "completed",
            RefactorStatus::Failed => "failed",
            RefactorStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefactorStatus::Completed | RefactorStatus::Failed | RefactorStatus::Cancelled
        )
    }

    fn can_transition_to(&self, next: RefactorStatus) -> bool {
        use RefactorStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for RefactorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why the refactoring loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No candidate was proposed or accepted
    Converged,
    /// `max_iterations` reached with work possibly remaining
    IterationBudgetExhausted,
    /// Wall-clock session timeout observed at a loop boundary
    TimedOut,
    /// External cancellation observed
    Cancelled,
    /// Unrecoverable error
    Failed,
}

/// Agent call phase within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Analyze,
    Propose,
    Vote,
    Validate,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentPhase::Analyze => "analyze",
            AgentPhase::Propose => "propose",
            AgentPhase::Vote => "vote",
            AgentPhase::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// An agent call that errored, panicked or timed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent_id: AgentId,
    pub phase: AgentPhase,
    pub message: String,
}

/// A change that passed consensus but failed post-apply validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub change_id: ChangeId,
    pub rejected_by: Vec<AgentId>,
}

/// Storage key of a code snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub session_id: SessionId,
    pub iteration: u32,
}

/// One append-only record of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionStep {
    pub iteration: u32,
    pub applied: Option<Change>,
    pub decision: ConsensusDecision,
    pub timestamp: DateTime<Utc>,
    pub snapshot: Option<SnapshotKey>,
    #[serde(default)]
    pub candidates: usize,
    #[serde(default)]
    pub agent_failures: Vec<AgentFailure>,
    #[serde(default)]
    pub rejections: Vec<Rejection>,
}

/// Before/after measurements, always recomputed from the two code strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefactorMetrics {
    pub lines_changed: usize,
    pub complexity_delta: i64,
    pub issues_fixed: usize,
    pub applied_confidences: Vec<f64>,
    #[serde(default)]
    pub agent_contributions: BTreeMap<AgentId, usize>,
}

impl RefactorMetrics {
    /// Attach per-change statistics from the applied steps.
    pub fn with_applied(mut self, steps: &[EvolutionStep]) -> Self {
        self.applied_confidences.clear();
        self.agent_contributions.clear();
        for change in steps.iter().filter_map(|s| s.applied.as_ref()) {
            self.applied_confidences.push(change.confidence());
            *self
                .agent_contributions
                .entry(change.agent_id().to_string())
                .or_insert(0) += 1;
        }
        self
    }
}

/// Aggregate root for one refactoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactorSession {
    pub id: SessionId,
    /// Identifier of the artifact being refactored (usually a path)
    #[serde(alias = "target_path")]
    pub target: String,
    #[serde(alias = "agent_set")]
    pub agents: Vec<AgentId>,
    pub status: RefactorStatus,
    pub original_code: String,
    /// Code buffer as of the last persisted step
    pub current_code: String,
    #[serde(default)]
    pub steps: Vec<EvolutionStep>,
    #[serde(default)]
    pub initial_analysis: Vec<AgentAnalysis>,
    /// Analysis of the final code, taken when the session ends with changes
    #[serde(default)]
    pub final_analysis: Vec<AgentAnalysis>,
    /// Agents that failed while analyzing the original or final code
    #[serde(default)]
    pub analysis_failures: Vec<AgentFailure>,
    #[serde(default)]
    pub excluded_changes: BTreeSet<ChangeId>,
    pub metrics: Option<RefactorMetrics>,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(alias = "error_message")]
    pub error: Option<String>,
    #[serde(alias = "started_at")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RefactorSession {
    /// Create a new pending session over `code`.
    pub fn new(target: impl Into<String>, code: impl Into<String>, agents: Vec<AgentId>) -> Self {
        let code = code.into();
        let now = Utc::now();
        let mut agents = agents;
        agents.sort();
        agents.dedup();
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            agents,
            status: RefactorStatus::Pending,
            original_code: code.clone(),
            current_code: code,
            steps: Vec::new(),
            initial_analysis: Vec::new(),
            final_analysis: Vec::new(),
            analysis_failures: Vec::new(),
            excluded_changes: BTreeSet::new(),
            metrics: None,
            stop_reason: None,
            cancel_requested: false,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `next`, refusing any transition out of a terminal state.
    pub fn transition(&mut self, next: RefactorStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(if self.status.is_terminal() {
                CoreError::SessionTerminal {
                    session_id: self.id,
                    status: self.status,
                }
            } else {
                CoreError::InvalidTransition {
                    session_id: self.id,
                    from: self.status,
                    to: next,
                }
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of iterations recorded so far.
    pub fn iteration(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Whether the loop stopped because the iteration budget ran out.
    pub fn budget_exhausted(&self) -> bool {
        self.stop_reason == Some(StopReason::IterationBudgetExhausted)
    }

    /// Changes applied so far, in order.
    pub fn applied_changes(&self) -> impl Iterator<Item = &Change> {
        self.steps.iter().filter_map(|s| s.applied.as_ref())
    }
}
