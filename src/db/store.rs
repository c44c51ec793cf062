//! Storage abstraction implemented by the SQLite and in-memory backends.

use std::time::Duration;
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// Persistence for probe configs, latest results and bounded history.
///
/// Both backends must behave the same way: results are only accepted for a
/// stored config, deleting a config drops its results and history, and
/// history is pruned to the most recent rows on every write.
pub trait Storage: Send + Sync {
    /// Insert or replace a config.
    fn store_config(&self, config: &ProbeConfig) -> Result<(), DbError>;

    fn get_config(&self, id: &str) -> Result<ProbeConfig, DbError>;

    /// All configs ordered by name.
    fn list_configs(&self) -> Result<Vec<ProbeConfig>, DbError>;

    /// Delete a config together with its result and history.
    fn delete_config(&self, id: &str) -> Result<(), DbError>;

    /// Replace the latest result and append a pruned history row.
    fn store_result(&self, outcome: &ProbeOutcome) -> Result<(), DbError>;

    /// Latest result with its retained history.
    fn get_result(&self, id: &str) -> Result<ProbeOutcome, DbError>;

    /// Latest results, most recently checked first, each with history.
    fn list_results(&self) -> Result<Vec<ProbeOutcome>, DbError>;

    /// History newer than `now - window`, most recent first. A zero window
    /// returns every retained row.
    fn get_history(&self, id: &str, window: Duration) -> Result<Vec<HistoryEntry>, DbError>;
}
