//! Shared types for the agent core.
//!
//! The `AgentMessage` envelope passed between stages, the payloads it can
//! carry, and the `Request` record the Coordinator builds for each run.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::StageError;

// ─── Message Envelope ───────────────────────────────────────────────────────

/// Which stage produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Interpreter,
    Retriever,
    Analyzer,
    /// Synthesized by the Coordinator (timeouts, cancellation).
    Error,
}

impl Source {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Interpreter => "interpreter",
            Source::Retriever => "retriever",
            Source::Analyzer => "analyzer",
            Source::Error => "error",
        }
    }
}

/// What a message's payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Query,
    Analysis,
    Format,
    Error,
}

impl Intent {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "query",
            Intent::Analysis => "analysis",
            Intent::Format => "format",
            Intent::Error => "error",
        }
    }

    /// Parse a lower-case intent label. `error` is not a classifiable intent.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "query" => Some(Intent::Query),
            "analysis" => Some(Intent::Analysis),
            "format" => Some(Intent::Format),
            _ => None,
        }
    }
}

/// Payload of an `AgentMessage`. The variant is determined by the intent
/// and the producing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Interpreter output for any classified intent.
    Interpretation(Interpretation),
    /// Retriever output (`intent = query`).
    Rows(RowSet),
    /// Analyzer output (`intent = analysis`).
    Analysis(AnalysisReport),
    /// Failure description (`intent = error`).
    Failure(StageError),
}

/// The unit of inter-stage communication.
///
/// Fields are private so the confidence invariant holds: every message has
/// `confidence` in `[0, 1]`, and error messages always carry `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredMessage")]
pub struct AgentMessage {
    source: Source,
    intent: Intent,
    content: MessageContent,
    confidence: f64,
}

/// Wire form of `AgentMessage`; loading goes back through `AgentMessage::new`.
#[derive(Deserialize)]
struct StoredMessage {
    source: Source,
    intent: Intent,
    content: MessageContent,
    confidence: f64,
}

impl From<StoredMessage> for AgentMessage {
    fn from(stored: StoredMessage) -> Self {
        Self::new(stored.source, stored.intent, stored.content, stored.confidence)
    }
}

impl AgentMessage {
    /// Build a message. Confidence is clamped to `[0, 1]` (NaN becomes 0)
    /// and forced to 0 for `Intent::Error`.
    pub fn new(source: Source, intent: Intent, content: MessageContent, confidence: f64) -> Self {
        let confidence = if intent == Intent::Error || confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            source,
            intent,
            content,
            confidence,
        }
    }

    /// Build an error-intent message describing a stage failure.
    pub fn failure(source: Source, error: StageError) -> Self {
        Self::new(source, Intent::Error, MessageContent::Failure(error), 0.0)
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The failure carried by an error-intent message.
    pub fn failure_cause(&self) -> Option<&StageError> {
        match (&self.intent, &self.content) {
            (Intent::Error, MessageContent::Failure(err)) => Some(err),
            _ => None,
        }
    }

    /// The rows carried by a retriever message.
    pub fn rows(&self) -> Option<&RowSet> {
        match &self.content {
            MessageContent::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// The report carried by an analyzer message.
    pub fn analysis(&self) -> Option<&AnalysisReport> {
        match &self.content {
            MessageContent::Analysis(report) => Some(report),
            _ => None,
        }
    }

    /// The interpretation carried by an interpreter message.
    pub fn interpretation(&self) -> Option<&Interpretation> {
        match &self.content {
            MessageContent::Interpretation(i) => Some(i),
            _ => None,
        }
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

/// What the Interpreter understood from the raw input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Interpretation {
    /// Human-readable suggested action.
    pub suggestion: String,
    /// Keywords or cues that drove the classification.
    #[serde(default)]
    pub signals: Vec<String>,
    /// Display instructions for `format` intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayInstructions>,
}

/// How the host document should present existing values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DisplayInstructions {
    /// Excel-style number format code, e.g. `"$#,##0.00"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
    /// Render values in bold.
    #[serde(default)]
    pub emphasis: bool,
}

/// A uniform table of records returned by a DataStore.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first row whose width differs from the header, if any.
    pub fn first_ragged_row(&self) -> Option<usize> {
        self.rows.iter().position(|r| r.len() != self.columns.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Structured result of the analysis stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: String,
    pub insights: Vec<Insight>,
    pub recommendations: Vec<String>,
    /// Number of rows the analysis was computed over.
    #[serde(default)]
    pub row_count: usize,
}

/// A single derived observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    /// Column or series the insight is about.
    pub subject: String,
    pub value: f64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Total,
    Average,
    Trend,
    Deviation,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Total => "total",
            InsightKind::Average => "average",
            InsightKind::Trend => "trend",
            InsightKind::Deviation => "deviation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Classify a relative change (0.42 = 42%) by magnitude.
    pub fn from_relative_change(change: f64) -> Self {
        let magnitude = change.abs();
        if magnitude > 0.5 {
            Severity::High
        } else if magnitude > 0.3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

// ─── Requests ───────────────────────────────────────────────────────────────

/// Lifecycle status of a Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "completed" => RequestStatus::Completed,
            "failed" => RequestStatus::Failed,
            _ => RequestStatus::Pending,
        }
    }
}

/// States of the coordination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Classifying,
    Retrieving,
    Analyzing,
    Applying,
    Done,
    Failed,
}

/// One end-to-end coordination run.
///
/// Built by explicit, consuming steps: each stage transition returns a new
/// value rather than mutating a shared list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub input: String,
    messages: Vec<AgentMessage>,
    status: RequestStatus,
    transitions: Vec<CoordinatorState>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp of the terminal state.
    pub finished_at: Option<String>,
}

impl Request {
    /// Start a new pending Request in the `Idle` state.
    pub fn new(input: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input: input.to_string(),
            messages: Vec::new(),
            status: RequestStatus::Pending,
            transitions: vec![CoordinatorState::Idle],
            created_at: Utc::now().to_rfc3339(),
            finished_at: None,
        }
    }

    /// Rebuild a stored Request (history reload).
    pub(crate) fn restore(
        id: String,
        input: String,
        messages: Vec<AgentMessage>,
        status: RequestStatus,
        created_at: String,
        finished_at: Option<String>,
    ) -> Self {
        Self {
            id,
            input,
            messages,
            status,
            transitions: Vec::new(),
            created_at,
            finished_at,
        }
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn transitions(&self) -> &[CoordinatorState] {
        &self.transitions
    }

    /// The current state machine state.
    pub fn state(&self) -> CoordinatorState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(CoordinatorState::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RequestStatus::Pending
    }

    /// Append a stage's message.
    pub fn with_message(mut self, message: AgentMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Record a state transition.
    pub fn transition(mut self, state: CoordinatorState) -> Self {
        self.transitions.push(state);
        self
    }

    /// Move to a terminal state (`Done` or `Failed`).
    pub fn finish(self, status: RequestStatus) -> Self {
        let state = if status == RequestStatus::Completed {
            CoordinatorState::Done
        } else {
            CoordinatorState::Failed
        };
        let mut finished = self.transition(state);
        finished.status = status;
        finished.finished_at = Some(Utc::now().to_rfc3339());
        finished
    }
}

// ─── Timeouts ───────────────────────────────────────────────────────────────

/// Per-invocation time budgets for each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub classification: Duration,
    pub retrieval: Duration,
    pub analysis: Duration,
}

impl StageTimeouts {
    /// The same budget for every stage.
    pub fn uniform(budget: Duration) -> Self {
        Self {
            classification: budget,
            retrieval: budget,
            analysis: budget,
        }
    }

    pub fn from_millis(classification_ms: u64, retrieval_ms: u64, analysis_ms: u64) -> Self {
        Self {
            classification: Duration::from_millis(classification_ms),
            retrieval: Duration::from_millis(retrieval_ms),
            analysis: Duration::from_millis(analysis_ms),
        }
    }
}

impl From<Duration> for StageTimeouts {
    fn from(budget: Duration) -> Self {
        Self::uniform(budget)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
