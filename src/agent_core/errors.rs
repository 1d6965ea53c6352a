//! Agent Core error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Request, Source};

// ─── Stage Errors ───────────────────────────────────────────────────────────

/// Which half of the retrieval stage failed. Diagnostic only; callers treat
/// both phases as a data failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPhase {
    Translation,
    Execution,
}

impl fmt::Display for DataPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataPhase::Translation => write!(f, "translation"),
            DataPhase::Execution => write!(f, "execution"),
        }
    }
}

/// Failure of a single pipeline stage. Also the payload of every
/// `error`-intent `AgentMessage`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageError {
    /// The Interpreter could not classify the input.
    #[error("classification failed: {reason}")]
    Classification { reason: String },

    /// The request could not be translated or the DataStore query failed.
    #[error("data retrieval failed during {phase}: {reason}")]
    Data { phase: DataPhase, reason: String },

    /// The Analyzer could not derive metrics from well-formed rows.
    #[error("analysis failed: {reason}")]
    Analysis { reason: String },

    /// The ResultApplier rejected or failed to commit the results.
    #[error("apply failed: {0}")]
    Apply(ApplyError),

    /// The stage exceeded its time budget.
    #[error("stage timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The Request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
}

impl StageError {
    /// Whether a caller-driven retry of the whole Request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StageError::Data { .. } | StageError::Timeout { .. } | StageError::Apply(_)
        )
    }
}

/// Errors from applying results to the host document.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ApplyError {
    /// A write would land outside the sheet's bounds.
    #[error("cell {cell} is outside the sheet bounds ({max_rows} rows x {max_cols} columns)")]
    OutOfBounds {
        cell: String,
        max_rows: u32,
        max_cols: u32,
    },

    /// A layout anchor is not a valid A1 reference.
    #[error("invalid anchor '{anchor}'")]
    InvalidAnchor { anchor: String },

    /// A message the applier cannot apply (e.g. an error message).
    #[error("unexpected message: {reason}")]
    UnexpectedMessage { reason: String },

    /// The staged changes could not be committed.
    #[error("commit failed: {reason}")]
    CommitFailed { reason: String },
}

// ─── Coordination Errors ────────────────────────────────────────────────────

/// The pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    Retrieval,
    Analysis,
    Application,
}

impl Stage {
    /// Source used for messages reported by this stage.
    pub fn source(&self) -> Source {
        match self {
            Stage::Classification => Source::Interpreter,
            Stage::Retrieval => Source::Retriever,
            Stage::Analysis => Source::Analyzer,
            // The applier produces no messages of its own.
            Stage::Application => Source::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classification => "classification",
            Stage::Retrieval => "retrieval",
            Stage::Analysis => "analysis",
            Stage::Application => "application",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Request that ended in the `Failed` state.
///
/// Carries the stage of origin, the original input, the underlying cause,
/// and the failed Request itself so callers can inspect every message that
/// was produced before the failure.
#[derive(Debug, Clone, Error)]
#[error("request failed at {stage} stage: {cause}")]
pub struct CoordinationError {
    pub stage: Stage,
    pub input: String,
    #[source]
    pub cause: StageError,
    pub request: Box<Request>,
}

impl CoordinationError {
    pub fn new(stage: Stage, cause: StageError, request: Request) -> Self {
        Self {
            stage,
            input: request.input.clone(),
            cause,
            request: Box::new(request),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, StageError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, StageError::Cancelled)
    }
}

// ─── History Errors ─────────────────────────────────────────────────────────

/// Errors from the request history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// No Request with the given id.
    #[error("request not found: '{request_id}'")]
    RequestNotFound { request_id: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for HistoryError {
    fn from(e: rusqlite::Error) -> Self {
        HistoryError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::SerializationError {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_causes() {
        assert!(StageError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(StageError::Data {
            phase: DataPhase::Execution,
            reason: "locked".into()
        }
        .is_retryable());
        assert!(!StageError::Cancelled.is_retryable());
        assert!(!StageError::Classification { reason: "x".into() }.is_retryable());
    }

    #[test]
    fn stage_error_display_includes_context() {
        let err = StageError::Data {
            phase: DataPhase::Translation,
            reason: "no line item".into(),
        };
        assert_eq!(
            err.to_string(),
            "data retrieval failed during translation: no line item"
        );
    }

    #[test]
    fn stage_error_serializes_with_type_tag() {
        let json = serde_json::to_value(StageError::Timeout { timeout_ms: 50 }).unwrap();
        assert_eq!(json["type"], "timeout");
        assert_eq!(json["timeout_ms"], 50);

        let back: StageError = serde_json::from_value(json).unwrap();
        assert_eq!(back, StageError::Timeout { timeout_ms: 50 });
    }

    #[test]
    fn coordination_error_preserves_request() {
        let request = Request::new("show revenue");
        let err = CoordinationError::new(Stage::Retrieval, StageError::Cancelled, request);
        assert_eq!(err.input, "show revenue");
        assert_eq!(err.request.input, "show revenue");
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("retrieval"));
    }
}
