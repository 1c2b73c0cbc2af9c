//! # snre_store
//!
//! Durable storage for SNRE sessions and their evolution history.
//!
//! Two interchangeable [`SessionRepository`] backends are provided:
//!
//! - [`FileSessionRepository`]: one JSON file per session with an `fs2`
//!   advisory lock file per session
//! - [`SqliteSessionRepository`]: one SQLite table, WAL journal, immediate
//!   write transactions
//!
//! Both store records in the versioned envelope of [`schema`], so older
//! records stay loadable. [`FileEvolutionStore`] keeps the append-only step
//! history and additive code snapshots.

use std::sync::Arc;

use snre_core::{
    CoreError, CoreResult, EvolutionStore, SessionRepository, StorageBackend, StorageConfig,
};

pub mod error;
pub mod evolution;
pub mod file;
mod lock;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use evolution::FileEvolutionStore;
pub use file::FileSessionRepository;
pub use sqlite::SqliteSessionRepository;

/// Open the session repository selected by `config`.
pub async fn open_repository(config: &StorageConfig) -> CoreResult<Arc<dyn SessionRepository>> {
    let repo: Arc<dyn SessionRepository> = match config.backend {
        StorageBackend::File => Arc::new(FileSessionRepository::new(
            &config.sessions_dir,
            config.lock_timeout(),
        )?),
        StorageBackend::Sqlite => Arc::new(
            SqliteSessionRepository::open(&config.database_path, config.lock_timeout()).await?,
        ),
    };
    tracing::debug!(backend = ?config.backend, "Session repository opened");
    Ok(repo)
}

/// Open the evolution store under `config.evolution_dir`.
pub fn open_evolution_store(config: &StorageConfig) -> CoreResult<Arc<dyn EvolutionStore>> {
    Ok(Arc::new(FileEvolutionStore::new(
        &config.evolution_dir,
        config.lock_timeout(),
    )?))
}

/// Run blocking storage work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> CoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CoreError::Storage(format!("storage task failed: {e}")))?
        .map_err(CoreError::from)
}
