//! Agent profiles: which agents run, and with what priority and threshold.
//!
//! ```yaml
//! agents:
//!   security_enforcer:
//!     enabled: true
//!     priority: 9
//!     confidence_threshold: 0.8
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use snre_core::{AgentId, AgentRegistry};

use crate::builtin::BuiltinAgent;
use crate::error::{AgentError, AgentResult};

fn default_enabled() -> bool {
    true
}

/// Registration settings of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentProfile {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub priority: i32,
    pub confidence_threshold: f64,
}

impl From<BuiltinAgent> for AgentProfile {
    fn from(agent: BuiltinAgent) -> Self {
        Self {
            enabled: true,
            priority: agent.default_priority(),
            confidence_threshold: agent.default_confidence_threshold(),
        }
    }
}

/// Profile set keyed by agent id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentProfiles {
    pub agents: BTreeMap<AgentId, AgentProfile>,
}

impl Default for AgentProfiles {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AgentProfiles {
    /// Every built-in agent with its default settings.
    pub fn builtin() -> Self {
        Self {
            agents: BuiltinAgent::all()
                .into_iter()
                .map(|agent| (agent.as_str().to_string(), AgentProfile::from(agent)))
                .collect(),
        }
    }

    /// Parse a YAML profiles document and validate it.
    pub fn from_yaml_str(content: &str) -> AgentResult<Self> {
        let profiles: Self = serde_yaml::from_str(content)?;
        profiles.validate()?;
        Ok(profiles)
    }

    /// Load a YAML profiles file.
    pub fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Check every id names a built-in agent and every threshold is in range.
    pub fn validate(&self) -> AgentResult<()> {
        for (id, profile) in &self.agents {
            id.parse::<BuiltinAgent>()?;
            if !(0.0..=1.0).contains(&profile.confidence_threshold) {
                return Err(AgentError::invalid_profile(
                    id,
                    format!(
                        "confidence_threshold {} outside [0.0, 1.0]",
                        profile.confidence_threshold
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Ids of enabled agents, sorted.
    pub fn enabled_ids(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Register every enabled agent.
    pub fn build_registry(&self) -> AgentResult<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for (id, profile) in self.agents.iter().filter(|(_, p)| p.enabled) {
            let agent = id.parse::<BuiltinAgent>()?;
            registry.register(agent.create(), profile.priority, profile.confidence_threshold)?;
            info!(
                agent_id = %id,
                priority = profile.priority,
                confidence_threshold = profile.confidence_threshold,
                "Registered agent"
            );
        }
        Ok(registry)
    }
}
