//! Agent registry for managing refactoring agents.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::agent::{Capability, RefactorAgent};
use crate::error::{CoreError, CoreResult};
use crate::models::AgentId;

/// A registered agent with its scheduling metadata.
#[derive(Clone)]
pub struct AgentRegistration {
    pub agent: Arc<dyn RefactorAgent>,
    /// Higher wins consensus tie-breaks
    pub priority: i32,
    /// Own proposals below this confidence are dropped before voting
    pub min_confidence: f64,
}

impl AgentRegistration {
    pub fn id(&self) -> &str {
        self.agent.id()
    }
}

impl std::fmt::Debug for AgentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistration")
            .field("id", &self.agent.id())
            .field("priority", &self.priority)
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

/// A registry of refactoring agents.
///
/// Populated once at process start (by built-in bootstrap or an external
/// plugin step) and then shared read-only with coordinators.
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentId, AgentRegistration>,
}

impl AgentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
        }
    }

    /// Register an agent under its `id()`.
    ///
    /// Fails if the agent does not advertise the full contract, if its id is
    /// already taken, or if `min_confidence` is outside `[0.0, 1.0]`.
    pub fn register(
        &mut self,
        agent: Arc<dyn RefactorAgent>,
        priority: i32,
        min_confidence: f64,
    ) -> CoreResult<()> {
        let id = agent.id().to_string();
        if id.trim().is_empty() {
            return Err(CoreError::ContractViolation {
                agent: id,
                missing: "a non-empty id".to_string(),
            });
        }

        let offered = agent.capabilities();
        let missing: Vec<&str> = Capability::ALL
            .iter()
            .filter(|c| !offered.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::ContractViolation {
                agent: id,
                missing: missing.join(", "),
            });
        }

        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(CoreError::config(format!(
                "confidence threshold for agent {} must be within 0.0..=1.0, got {}",
                id, min_confidence
            )));
        }

        if self.agents.contains_key(&id) {
            return Err(CoreError::DuplicateAgent(id));
        }

        debug!(agent_id = %id, priority, min_confidence, "Registering agent");
        self.agents.insert(
            id,
            AgentRegistration {
                agent,
                priority,
                min_confidence,
            },
        );
        Ok(())
    }

    /// Get an agent registration by id.
    pub fn get(&self, id: &str) -> Option<&AgentRegistration> {
        self.agents.get(id)
    }

    /// Resolve the live agent set for `ids`, ordered by id.
    ///
    /// Fails on the first id that is not registered; duplicates collapse.
    pub fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> CoreResult<Vec<AgentRegistration>> {
        let mut wanted: Vec<&str> = ids.iter().map(|s| s.as_ref()).collect();
        wanted.sort_unstable();
        wanted.dedup();
        wanted
            .into_iter()
            .map(|id| {
                self.agents
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownAgent(id.to_string()))
            })
            .collect()
    }

    /// Check if an agent is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// All registered agent ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.agents.keys().map(|s| s.as_str()).collect()
    }

    /// Priority of every registered agent.
    pub fn priorities(&self) -> BTreeMap<AgentId, i32> {
        self.agents
            .iter()
            .map(|(id, reg)| (id.clone(), reg.priority))
            .collect()
    }

    /// Get the number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentAnalysis, Change, ChangeId};
    use std::collections::HashMap;

    struct TestAgent {
        id: String,
        capabilities: Vec<Capability>,
    }

    impl TestAgent {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                capabilities: Capability::ALL.to_vec(),
            })
        }
    }

    impl RefactorAgent for TestAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> Vec<Capability> {
            self.capabilities.clone()
        }

        fn analyze(&self, _code: &str) -> anyhow::Result<AgentAnalysis> {
            Ok(AgentAnalysis::new(&self.id))
        }

        fn suggest_changes(&self, _code: &str) -> anyhow::Result<Vec<Change>> {
            Ok(Vec::new())
        }

        fn vote(&self, changes: &[Change]) -> anyhow::Result<HashMap<ChangeId, f64>> {
            Ok(changes.iter().map(|c| (c.id(), 1.0)).collect())
        }

        fn validate_result(&self, _original: &str, _modified: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_registry_register() {
        let mut registry = AgentRegistry::new();
        assert!(registry.is_empty());

        registry.register(TestAgent::new("loop"), 6, 0.7).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("loop"));
        assert_eq!(registry.get("loop").unwrap().priority, 6);
    }

    #[test]
    fn test_registry_rejects_contract_violation() {
        let mut registry = AgentRegistry::new();
        let partial = Arc::new(TestAgent {
            id: "partial".to_string(),
            capabilities: vec![Capability::Analyze, Capability::SuggestChanges],
        });

        let err = registry.register(partial, 1, 0.5).unwrap_err();
        match err {
            CoreError::ContractViolation { agent, missing } => {
                assert_eq!(agent, "partial");
                assert_eq!(missing, "vote, validate_result");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_thresholds() {
        let mut registry = AgentRegistry::new();
        registry.register(TestAgent::new("a"), 1, 0.5).unwrap();

        assert!(matches!(
            registry.register(TestAgent::new("a"), 2, 0.5),
            Err(CoreError::DuplicateAgent(_))
        ));
        assert!(matches!(
            registry.register(TestAgent::new("b"), 1, 1.5),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = AgentRegistry::new();
        registry.register(TestAgent::new("security"), 9, 0.8).unwrap();
        registry.register(TestAgent::new("loop"), 6, 0.7).unwrap();
        registry.register(TestAgent::new("pattern"), 7, 0.6).unwrap();

        let resolved = registry.resolve(&["security", "loop", "loop"]).unwrap();
        let ids: Vec<&str> = resolved.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["loop", "security"]);

        assert!(matches!(
            registry.resolve(&["loop", "missing"]),
            Err(CoreError::UnknownAgent(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_registry_ids_sorted() {
        let mut registry = AgentRegistry::new();
        registry.register(TestAgent::new("validate"), 1, 0.0).unwrap();
        registry.register(TestAgent::new("scaffold"), 1, 0.0).unwrap();

        assert_eq!(registry.ids(), vec!["scaffold", "validate"]);
        assert_eq!(registry.priorities().get("scaffold"), Some(&1));
    }
}
