//! DataStore error types.

use thiserror::Error;

/// Errors that can occur while executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The store could not be opened or initialized.
    #[error("failed to open data store at '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    /// The expression failed to prepare (syntax, unknown table or column).
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// The expression would modify the store.
    #[error("refusing to run a statement that is not read-only")]
    NotReadOnly,

    /// A parameter could not be bound.
    #[error("unsupported parameter at position {index}: {reason}")]
    UnsupportedParam { index: usize, reason: String },

    /// The statement failed while running.
    #[error("query execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// The blocking worker running the query was lost.
    #[error("query worker failed: {reason}")]
    WorkerFailed { reason: String },
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::ExecutionFailed {
            reason: e.to_string(),
        }
    }
}
