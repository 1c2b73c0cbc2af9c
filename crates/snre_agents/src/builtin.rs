//! Built-in agent kinds and their default profiles.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use snre_core::RefactorAgent;

use crate::error::AgentError;
use crate::loop_simplifier::{LoopSimplifier, LOOP_SIMPLIFIER_ID};
use crate::pattern_optimizer::{PatternOptimizer, PATTERN_OPTIMIZER_ID};
use crate::security_enforcer::{SecurityEnforcer, SECURITY_ENFORCER_ID};

/// Agents shipped with SNRE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAgent {
    LoopSimplifier,
    SecurityEnforcer,
    PatternOptimizer,
}

impl BuiltinAgent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinAgent::LoopSimplifier => LOOP_SIMPLIFIER_ID,
            BuiltinAgent::SecurityEnforcer => SECURITY_ENFORCER_ID,
            BuiltinAgent::PatternOptimizer => PATTERN_OPTIMIZER_ID,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinAgent::LoopSimplifier => "Rewrites range(len()) loops with enumerate()",
            BuiltinAgent::SecurityEnforcer => "Fixes eval of input, formatted SQL and hardcoded credentials",
            BuiltinAgent::PatternOptimizer => "Normalizes None comparisons and trailing whitespace",
        }
    }

    /// Tie-break priority; higher wins.
    pub fn default_priority(&self) -> i32 {
        match self {
            BuiltinAgent::LoopSimplifier => 6,
            BuiltinAgent::SecurityEnforcer => 9,
            BuiltinAgent::PatternOptimizer => 7,
        }
    }

    /// Minimum confidence for this agent's own proposals.
    pub fn default_confidence_threshold(&self) -> f64 {
        match self {
            BuiltinAgent::LoopSimplifier => 0.7,
            BuiltinAgent::SecurityEnforcer => 0.8,
            BuiltinAgent::PatternOptimizer => 0.6,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            BuiltinAgent::LoopSimplifier,
            BuiltinAgent::SecurityEnforcer,
            BuiltinAgent::PatternOptimizer,
        ]
    }

    /// Construct a fresh instance.
    pub fn create(&self) -> Arc<dyn RefactorAgent> {
        match self {
            BuiltinAgent::LoopSimplifier => Arc::new(LoopSimplifier::new()),
            BuiltinAgent::SecurityEnforcer => Arc::new(SecurityEnforcer::new()),
            BuiltinAgent::PatternOptimizer => Arc::new(PatternOptimizer::new()),
        }
    }
}

impl fmt::Display for BuiltinAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BuiltinAgent {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|agent| agent.as_str() == s)
            .ok_or_else(|| AgentError::NotFound(s.to_string()))
    }
}
