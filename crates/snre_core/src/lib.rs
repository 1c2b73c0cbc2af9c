//! # snre_core
//!
//! Core engine of the Swarm Neural Refactoring Engine.
//!
//! Independent agents propose line-range edits to a code buffer, vote on each
//! other's proposals, and veto bad results; the coordinator applies one
//! accepted edit per iteration until the session converges.
//!
//! # Architecture
//!
//! - **Agents**: implementations of [`RefactorAgent`], held by an [`AgentRegistry`]
//! - **Consensus**: a pure [`decide`] over a complete vote matrix
//! - **Coordinator**: the propose/vote/apply/validate loop, one per session
//! - **Repository**: [`SessionRepository`] backends with per-session write locks
//! - **Recorder**: an [`EvolutionRecorder`] subscribed to step notifications
//! - **Service**: the start/status/result/cancel facade for front-ends
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snre_core::{AgentRegistry, Coordinator, InMemorySessionRepository, SnreConfig};
//!
//! let mut registry = AgentRegistry::new();
//! registry.register(Arc::new(MyAgent), 5, 0.6)?;
//!
//! let coordinator = Coordinator::new(
//!     Arc::new(registry),
//!     Arc::new(InMemorySessionRepository::default()),
//!     SnreConfig::default(),
//! );
//! let session = coordinator.refactor("app.py", source, &["my_agent".into()]).await?;
//! println!("{}", session.status);
//! ```

pub mod agent;
pub mod config;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod memory;
pub mod models;
pub mod pool;
pub mod recorder;
pub mod registry;
pub mod repository;
pub mod service;
pub mod session;
pub mod tracker;

// Re-export main types for convenience
pub use agent::{Capability, RefactorAgent};
pub use config::{EvolutionConfig, SnreConfig, StorageBackend, StorageConfig};
pub use consensus::{decide, VoteMatrix};
pub use coordinator::Coordinator;
pub use error::{CoreError, CoreResult};
pub use events::{StepEvent, StepListener};
pub use memory::{InMemorySessionRepository, MemoryEvolutionStore};
pub use models::{AgentAnalysis, AgentId, Change, ChangeId, ChangeKind, ConsensusDecision};
pub use pool::{AgentPool, PhaseOutcome};
pub use recorder::EvolutionRecorder;
pub use registry::{AgentRegistration, AgentRegistry};
pub use repository::{prepare_write, EvolutionStore, SessionRepository, UpdateFn};
pub use service::{RefactorResult, RefactorService, SessionStatus};
pub use session::{
    AgentFailure, AgentPhase, EvolutionStep, RefactorMetrics, RefactorSession, RefactorStatus,
    Rejection, SessionId, SnapshotKey, StopReason,
};
