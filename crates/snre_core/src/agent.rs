//! The refactoring agent contract.
//!
//! Agents are independent analyzers that:
//! - Scan code and summarize what they find
//! - Propose line-range edits
//! - Score every proposal in a round, their own included
//! - Veto an applied edit after the fact
//!
//! Calls are synchronous and may be CPU-heavy; the coordinator runs them on
//! blocking worker threads, so implementations never need their own runtime.

use std::collections::HashMap;
use std::fmt;

use crate::models::{AgentAnalysis, Change, ChangeId};

/// One operation of the agent contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Analyze,
    SuggestChanges,
    Vote,
    ValidateResult,
}

impl Capability {
    /// Every operation the coordinator calls.
    pub const ALL: [Capability; 4] = [
        Capability::Analyze,
        Capability::SuggestChanges,
        Capability::Vote,
        Capability::ValidateResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Analyze => "analyze",
            Capability::SuggestChanges => "suggest_changes",
            Capability::Vote => "vote",
            Capability::ValidateResult => "validate_result",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core trait for all refactoring agents.
///
/// Errors are reported through `anyhow` at this boundary; the coordinator turns
/// an error, a panic, or a timeout into a per-agent failure on the step record.
pub trait RefactorAgent: Send + Sync + 'static {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Operations this agent implements.
    ///
    /// Checked once at registration; an agent advertising fewer than
    /// [`Capability::ALL`] is rejected.
    fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL.to_vec()
    }

    /// Summarize issues found in `code`.
    fn analyze(&self, code: &str) -> anyhow::Result<AgentAnalysis>;

    /// Propose edits to `code`; an empty list means nothing to do.
    fn suggest_changes(&self, code: &str) -> anyhow::Result<Vec<Change>>;

    /// Score every change in `changes` within `[0.0, 1.0]`.
    fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>>;

    /// Accept or veto an applied edit. Must not have side effects.
    fn validate_result(&self, original: &str, modified: &str) -> bool;
}
