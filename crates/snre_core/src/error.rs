//! Error types for the core module.

use thiserror::Error;

use crate::session::{AgentPhase, RefactorStatus, SessionId};

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Agent {agent} violates the refactoring contract: missing {missing}")]
    ContractViolation { agent: String, missing: String },

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent not found: {0}")]
    UnknownAgent(String),

    #[error("Invalid change from {agent}: {message}")]
    InvalidChange { agent: String, message: String },

    #[error("Incomplete vote matrix: agent {agent} did not score change {change}")]
    IncompleteVotes { agent: String, change: String },

    #[error("All agents failed during {phase} (session {session_id}, iteration {iteration})")]
    AllAgentsFailed {
        session_id: SessionId,
        iteration: u32,
        phase: AgentPhase,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Lock contention on session {session_id} after {waited_ms}ms")]
    LockContention { session_id: SessionId, waited_ms: u64 },

    #[error("Session {session_id} is terminal ({status}) and cannot be written")]
    SessionTerminal {
        session_id: SessionId,
        status: RefactorStatus,
    },

    #[error("Session {session_id} cannot move from {from} to {to}")]
    InvalidTransition {
        session_id: SessionId,
        from: RefactorStatus,
        to: RefactorStatus,
    },

    #[error("Session {session_id} has not finished (status {status})")]
    NotTerminal {
        session_id: SessionId,
        status: RefactorStatus,
    },

    #[error("Unsupported schema version {found} (newest supported is {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Snapshot already exists: session {session_id}, iteration {iteration}")]
    SnapshotExists { session_id: SessionId, iteration: u32 },

    #[error("Snapshot not found: session {session_id}, iteration {iteration}")]
    SnapshotNotFound { session_id: SessionId, iteration: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Create an invalid change error.
    pub fn invalid_change(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidChange {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a retry after backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
