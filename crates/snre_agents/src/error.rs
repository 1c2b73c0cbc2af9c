//! Error types for agents module.

use thiserror::Error;

use snre_core::CoreError;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while loading profiles or building agents.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Invalid profile for agent {agent}: {message}")]
    InvalidProfile { agent: String, message: String },

    #[error("Invalid profiles file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create an invalid profile error.
    pub fn invalid_profile(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

impl From<AgentError> for CoreError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Core(e) => e,
            AgentError::NotFound(id) => CoreError::UnknownAgent(id),
            AgentError::Io(e) => CoreError::Io(e),
            other => CoreError::config(other.to_string()),
        }
    }
}
