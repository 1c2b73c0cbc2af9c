//! Wiring of config, profiles, storage and the refactoring service.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use snre_agents::AgentProfiles;
use snre_core::{AgentId, Coordinator, EvolutionRecorder, RefactorService, SnreConfig};
use snre_store::{open_evolution_store, open_repository};

use crate::commands::Cli;

/// Everything a command needs, built once per invocation.
pub struct AppContext {
    pub config: SnreConfig,
    pub profiles: AgentProfiles,
    pub service: RefactorService,
    pub recorder: Arc<EvolutionRecorder>,
}

impl AppContext {
    pub async fn from_cli(cli: &Cli) -> Result<Self> {
        Self::build(
            cli.config.as_deref(),
            cli.profiles.as_deref(),
            std::env::vars(),
        )
        .await
    }

    /// Load config and profiles, apply `SNRE_*` overrides from `env`, and
    /// open storage.
    pub async fn build<I>(
        config_path: Option<&Path>,
        profiles_path: Option<&Path>,
        env: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = match config_path {
            Some(path) => SnreConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SnreConfig::default(),
        };
        config.apply_env(env)?;

        let profiles = match profiles_path {
            Some(path) => AgentProfiles::load(path)
                .with_context(|| format!("Failed to load agent profiles {}", path.display()))?,
            None => AgentProfiles::builtin(),
        };
        let registry = profiles.build_registry()?;

        let repository = open_repository(&config.storage)
            .await
            .context("Failed to open session storage")?;
        let store = open_evolution_store(&config.storage).context("Failed to open evolution storage")?;
        let recorder = Arc::new(EvolutionRecorder::new(store, config.evolution.clone()));

        let coordinator = Coordinator::new(Arc::new(registry), repository, config.clone())
            .with_listener(recorder.clone());
        debug!(backend = ?config.storage.backend, "Context ready");

        Ok(Self {
            config,
            profiles,
            service: RefactorService::new(Arc::new(coordinator)),
            recorder,
        })
    }

    /// Requested agents, or every enabled profile when none were given.
    pub fn agents_or_default(&self, requested: Vec<AgentId>) -> Vec<AgentId> {
        if requested.is_empty() {
            self.profiles.enabled_ids()
        } else {
            requested
        }
    }
}
