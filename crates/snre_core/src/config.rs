//! Validated engine configuration.
//!
//! Every recognized option is an explicit field; unknown keys are rejected at
//! load time, both in files (`deny_unknown_fields`) and in `SNRE_*`
//! environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SNRE_";

/// Environment variables under the prefix that locate files rather than set options.
const ENV_LOCATORS: &[&str] = &["SNRE_CONFIG", "SNRE_PROFILES", "SNRE_LOG"];

/// Session storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    File,
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(CoreError::config(format!(
                "storage.backend must be 'file' or 'sqlite', got '{}'",
                other
            ))),
        }
    }
}

/// Evolution history and snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvolutionConfig {
    /// Whether snapshots are scheduled at all
    pub enabled: bool,
    /// Snapshot every Nth iteration
    pub snapshot_frequency: u32,
    /// Snapshots retained per session; oldest pruned first
    pub max_snapshots: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snapshot_frequency: 5,
            max_snapshots: 100,
        }
    }
}

impl EvolutionConfig {
    /// Whether a snapshot is due at `iteration`.
    pub fn snapshot_due(&self, iteration: u32) -> bool {
        self.enabled && self.snapshot_frequency > 0 && iteration % self.snapshot_frequency == 0
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub sessions_dir: PathBuf,
    pub evolution_dir: PathBuf,
    pub database_path: PathBuf,
    /// Bounded wait for a per-session write lock
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            sessions_dir: PathBuf::from("data/sessions"),
            evolution_dir: PathBuf::from("data/evolution"),
            database_path: PathBuf::from("data/snre.db"),
            lock_timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnreConfig {
    pub max_concurrent_agents: usize,
    pub consensus_threshold: f64,
    pub max_iterations: u32,
    pub timeout_secs: u64,
    /// Per-call limit enforced by the agent pool. A timed-out call is
    /// abandoned, but its worker keeps one of the `max_concurrent_agents`
    /// slots until the agent returns.
    pub agent_timeout_secs: u64,
    /// Retries of a write that hit lock contention
    pub persist_retries: u32,
    /// Initial backoff between retries, doubled per attempt
    pub persist_backoff_ms: u64,
    pub evolution: EvolutionConfig,
    pub storage: StorageConfig,
}

impl Default for SnreConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 5,
            consensus_threshold: 0.6,
            max_iterations: 10,
            timeout_secs: 300,
            agent_timeout_secs: 30,
            persist_retries: 3,
            persist_backoff_ms: 50,
            evolution: EvolutionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl SnreConfig {
    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(content: &str) -> CoreResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| CoreError::config(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::config(format!("invalid TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, choosing the format by extension.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(CoreError::config(format!(
                "unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Apply `SNRE_*` overrides from `vars` and re-validate.
    ///
    /// Nested keys use a double underscore, e.g. `SNRE_EVOLUTION__SNAPSHOT_FREQUENCY`.
    pub fn apply_env<I>(&mut self, vars: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if !key.starts_with(ENV_PREFIX) || ENV_LOCATORS.contains(&key.as_str()) {
                continue;
            }
            let name = key[ENV_PREFIX.len()..].to_ascii_lowercase();
            match name.as_str() {
                "max_concurrent_agents" => self.max_concurrent_agents = parse_env(&key, &value)?,
                "consensus_threshold" => self.consensus_threshold = parse_env(&key, &value)?,
                "max_iterations" => self.max_iterations = parse_env(&key, &value)?,
                "timeout_secs" => self.timeout_secs = parse_env(&key, &value)?,
                "agent_timeout_secs" => self.agent_timeout_secs = parse_env(&key, &value)?,
                "persist_retries" => self.persist_retries = parse_env(&key, &value)?,
                "persist_backoff_ms" => self.persist_backoff_ms = parse_env(&key, &value)?,
                "evolution__enabled" => self.evolution.enabled = parse_env(&key, &value)?,
                "evolution__snapshot_frequency" => {
                    self.evolution.snapshot_frequency = parse_env(&key, &value)?
                }
                "evolution__max_snapshots" => self.evolution.max_snapshots = parse_env(&key, &value)?,
                "storage__backend" => self.storage.backend = value.parse()?,
                "storage__sessions_dir" => self.storage.sessions_dir = PathBuf::from(value),
                "storage__evolution_dir" => self.storage.evolution_dir = PathBuf::from(value),
                "storage__database_path" => self.storage.database_path = PathBuf::from(value),
                "storage__lock_timeout_ms" => self.storage.lock_timeout_ms = parse_env(&key, &value)?,
                _ => return Err(CoreError::config(format!("unknown setting {}", key))),
            }
        }
        self.validate()
    }

    /// Check every bound.
    pub fn validate(&self) -> CoreResult<()> {
        check(
            (1..=50).contains(&self.max_concurrent_agents),
            "max_concurrent_agents must be within 1..=50",
        )?;
        check(
            (0.0..=1.0).contains(&self.consensus_threshold),
            "consensus_threshold must be within 0.0..=1.0",
        )?;
        check(
            (1..=100).contains(&self.max_iterations),
            "max_iterations must be within 1..=100",
        )?;
        check(self.timeout_secs >= 1, "timeout_secs must be at least 1")?;
        check(self.agent_timeout_secs >= 1, "agent_timeout_secs must be at least 1")?;
        check(self.persist_retries <= 10, "persist_retries must be at most 10")?;
        check(self.persist_backoff_ms >= 1, "persist_backoff_ms must be at least 1")?;
        check(
            self.evolution.snapshot_frequency >= 1,
            "evolution.snapshot_frequency must be at least 1",
        )?;
        check(
            self.evolution.max_snapshots >= 1,
            "evolution.max_snapshots must be at least 1",
        )?;
        check(
            self.storage.lock_timeout_ms >= 1,
            "storage.lock_timeout_ms must be at least 1",
        )?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

fn check(ok: bool, message: &str) -> CoreResult<()> {
    if ok {
        Ok(())
    } else {
        Err(CoreError::config(message))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::config(format!("invalid value for {}: '{}'", key, value)))
}
