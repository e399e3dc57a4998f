//! Error types for the task engine (v0.1)

use thiserror::Error;

/// Errors surfaced by the task engine.
///
/// `execute()` never returns these to its caller: every failure inside a
/// run is converted into a `Failed` status plus a logged diagnostic. The
/// variants escape only through the result-access API (`load_result`,
/// `ResultStore::load`).
#[derive(Error, Debug)]
pub enum TaskError {
    /// The serialized flow definition could not be decoded.
    #[error("Flow decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The execution engine reported a failure.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    /// A result artifact could not be written or read back.
    #[error("Result storage failed: {details}")]
    Storage { details: String },

    /// No persisted result artifact exists (never ran, empty results, or purged).
    #[error("No persisted result: {0}")]
    NotFound(String),
}

impl TaskError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound(_))
    }
}
