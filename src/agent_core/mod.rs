//! Agent Core: coordination pipeline for the spreadsheet add-in.
//!
//! Submodules:
//! - `coordinator`: Request state machine (classify → retrieve → analyze → apply)
//! - `interpreter`: Intent classification seam and keyword classifier
//! - `model_interpreter`: Classifier backed by a chat completion endpoint
//! - `retriever`: Query translation and row retrieval
//! - `analyzer`: Summary, trend and deviation analysis over rows
//! - `applier`: ResultApplier seam to the host document
//! - `history`: SQLite persistence of finished Requests
//! - `types`: Shared types across the agent core
//! - `errors`: Stage and coordination error types

pub mod analyzer;
pub mod applier;
pub mod coordinator;
pub mod errors;
pub mod history;
pub mod interpreter;
pub mod model_interpreter;
pub mod retriever;
pub mod types;

// Re-exports for convenience
pub use analyzer::{AnalysisContext, Analyzer, SummaryAnalyzer};
pub use applier::ResultApplier;
pub use coordinator::Coordinator;
pub use errors::{ApplyError, CoordinationError, DataPhase, HistoryError, Stage, StageError};
pub use history::{RequestHistory, RequestSummary};
pub use interpreter::{Interpreter, KeywordInterpreter};
pub use model_interpreter::ModelInterpreter;
pub use retriever::{QueryTranslator, Retriever, StoreRetriever, TemplateTranslator};
pub use types::{
    AgentMessage, AnalysisReport, CoordinatorState, Insight, InsightKind, Intent,
    Interpretation, MessageContent, Request, RequestStatus, RowSet, Severity, Source,
    StageTimeouts,
};
