//! Errors surfaced to callers of the engine.

use thiserror::Error;

use crate::db::DbError;
use crate::probe::ProbeError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid probe configuration: {0}")]
    InvalidConfig(String),
    #[error("probe {0} not found")]
    NotFound(String),
    #[error("probe {0} already exists")]
    AlreadyExists(String),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
    #[error("failed to set up probe executor: {0}")]
    Executor(#[from] ProbeError),
}
