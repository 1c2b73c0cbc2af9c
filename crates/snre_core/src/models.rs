//! Proposal and decision types exchanged between agents and the coordinator.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Identifier of a registered agent.
pub type AgentId = String;

/// Category of a proposed edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    #[serde(alias = "structure", alias = "optimization", alias = "performance")]
    StructuralSimplification,
    #[serde(alias = "security")]
    SecurityFix,
    #[serde(alias = "readability")]
    StyleNormalization,
    Other,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::StructuralSimplification => "structural_simplification",
            ChangeKind::SecurityFix => "security_fix",
            ChangeKind::StyleNormalization => "style_normalization",
            ChangeKind::Other => "other",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content-derived identity of a [`Change`].
///
/// Two changes with the same proposer, kind, range and text share an id, so a
/// verbatim re-proposal is recognized across iterations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(String);

impl ChangeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A proposed edit over the half-open line range `[line_start, line_end)`.
///
/// Fields are private so that every `Change` in the system satisfies its
/// invariants; deserialization goes through the same validation as [`Change::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChangeRecord")]
pub struct Change {
    agent_id: AgentId,
    kind: ChangeKind,
    original_code: String,
    modified_code: String,
    line_start: usize,
    line_end: usize,
    confidence: f64,
    rationale: String,
}

#[derive(Deserialize)]
struct ChangeRecord {
    agent_id: AgentId,
    kind: ChangeKind,
    original_code: String,
    modified_code: String,
    line_start: usize,
    line_end: usize,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

impl TryFrom<ChangeRecord> for Change {
    type Error = CoreError;

    fn try_from(r: ChangeRecord) -> CoreResult<Self> {
        Ok(Change::new(
            r.agent_id,
            r.kind,
            r.line_start..r.line_end,
            r.original_code,
            r.modified_code,
            r.confidence,
        )?
        .with_rationale(r.rationale))
    }
}

impl Change {
    /// Create a change, rejecting an empty range or a confidence outside `[0.0, 1.0]`.
    pub fn new(
        agent_id: impl Into<AgentId>,
        kind: ChangeKind,
        lines: Range<usize>,
        original_code: impl Into<String>,
        modified_code: impl Into<String>,
        confidence: f64,
    ) -> CoreResult<Self> {
        let agent_id = agent_id.into();
        if lines.start >= lines.end {
            return Err(CoreError::invalid_change(
                agent_id,
                format!("line_start {} must be below line_end {}", lines.start, lines.end),
            ));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::invalid_change(
                agent_id,
                format!("confidence {} outside [0.0, 1.0]", confidence),
            ));
        }
        Ok(Self {
            agent_id,
            kind,
            original_code: original_code.into(),
            modified_code: modified_code.into(),
            line_start: lines.start,
            line_end: lines.end,
            confidence,
            rationale: String::new(),
        })
    }

    /// Set the human-readable rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn original_code(&self) -> &str {
        &self.original_code
    }

    pub fn modified_code(&self) -> &str {
        &self.modified_code
    }

    pub fn line_start(&self) -> usize {
        self.line_start
    }

    pub fn line_end(&self) -> usize {
        self.line_end
    }

    pub fn lines(&self) -> Range<usize> {
        self.line_start..self.line_end
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Content hash identifying this exact edit.
    pub fn id(&self) -> ChangeId {
        let mut hasher = Sha256::new();
        for part in [
            self.agent_id.as_bytes(),
            self.kind.as_str().as_bytes(),
            self.line_start.to_string().as_bytes(),
            self.line_end.to_string().as_bytes(),
            self.original_code.as_bytes(),
            self.modified_code.as_bytes(),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        let digest = hex::encode(hasher.finalize());
        ChangeId(format!("{}@{}-{}#{}", self.agent_id, self.line_start, self.line_end, &digest[..16]))
    }

    /// Whether `original_code` still matches `lines` at the stated range.
    pub fn matches(&self, lines: &[&str]) -> bool {
        self.line_end <= lines.len() && lines[self.lines()].join("\n") == self.original_code
    }

    /// Splice the replacement into `lines`, returning the new buffer.
    ///
    /// Callers check [`Change::matches`] first; an empty replacement deletes the range.
    pub fn apply_to(&self, lines: &[&str]) -> String {
        let mut out: Vec<&str> = Vec::with_capacity(lines.len());
        out.extend_from_slice(&lines[..self.line_start]);
        if !self.modified_code.is_empty() {
            out.extend(self.modified_code.split('\n'));
        }
        out.extend_from_slice(&lines[self.line_end..]);
        out.join("\n")
    }
}

/// Per-agent scan summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAnalysis {
    pub agent_id: AgentId,
    pub issues_found: usize,
    pub patterns: Vec<String>,
    pub suggestions: Vec<String>,
}

impl AgentAnalysis {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    /// Record a detected pattern, counting it as one issue.
    pub fn with_pattern(mut self, label: impl Into<String>) -> Self {
        self.patterns.push(label.into());
        self.issues_found += 1;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Outcome of one voting round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub accepted: bool,
    /// Each voter's score for the selected (or best-ranked) candidate.
    pub votes: BTreeMap<AgentId, f64>,
    pub winner: Option<Change>,
    pub score: f64,
}

impl ConsensusDecision {
    /// A decision over an empty candidate set.
    pub fn empty() -> Self {
        Self {
            accepted: false,
            votes: BTreeMap::new(),
            winner: None,
            score: 0.0,
        }
    }
}
