//! Error types for the storage backends.

use thiserror::Error;

use snre_core::CoreError;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised inside the storage backends.
///
/// Everything converts into [`CoreError`] at the repository boundary, so
/// callers see not-found, lock-contention and serialization failures verbatim.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid path pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Core(e) => e,
            StoreError::Io(e) => CoreError::Io(e),
            StoreError::Json(e) => CoreError::Serialization(e.to_string()),
            other => CoreError::Storage(other.to_string()),
        }
    }
}
