//! # snre_agents
//!
//! Built-in refactoring agents for the Swarm Neural Refactoring Engine.
//!
//! ## Available Agents
//!
//! | Agent | Priority | Threshold | Proposes |
//! |-------|----------|-----------|----------|
//! | [`LoopSimplifier`] | 6 | 0.7 | `range(len(x))` loops rewritten with `enumerate` |
//! | [`SecurityEnforcer`] | 9 | 0.8 | `ast.literal_eval`, parameterized SQL, credentials from the environment |
//! | [`PatternOptimizer`] | 7 | 0.6 | `is None` comparisons, trailing whitespace removal |
//!
//! All agents are stateless line and regex matchers. Which of them run, and
//! with what priority and threshold, comes from [`AgentProfiles`].

pub mod builtin;
mod common;
pub mod error;
pub mod loop_simplifier;
pub mod pattern_optimizer;
pub mod profiles;
pub mod security_enforcer;

pub use builtin::BuiltinAgent;
pub use error::{AgentError, AgentResult};
pub use loop_simplifier::LoopSimplifier;
pub use pattern_optimizer::PatternOptimizer;
pub use profiles::{AgentProfile, AgentProfiles};
pub use security_enforcer::SecurityEnforcer;

/// Registry holding every built-in agent with its default profile.
pub fn default_registry() -> AgentResult<snre_core::AgentRegistry> {
    AgentProfiles::builtin().build_registry()
}
