//! Coordinator: the request state machine.
//!
//! ```text
//! Idle → Classifying → (Retrieving → Analyzing)? → Applying → Done
//!                 └──────────── any failure ───────────────→ Failed
//! ```
//!
//! 1. **Classify**: the Interpreter labels the input with an intent.
//! 2. **Retrieve / Analyze**: only for `query` intents. The Retriever runs
//!    with the original input, the Analyzer with the Retriever's rows.
//! 3. **Apply**: the ordered messages go to the ResultApplier.
//!
//! Each stage runs as its own task under the caller's per-stage budget. A
//! timeout, panic, cancellation, or `error`-intent output stops the run
//! before any later stage, and nothing is applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::analyzer::{AnalysisContext, Analyzer};
use super::applier::ResultApplier;
use super::errors::{ApplyError, CoordinationError, DataPhase, Stage, StageError};
use super::interpreter::Interpreter;
use super::retriever::Retriever;
use super::types::{
    AgentMessage, CoordinatorState, Intent, MessageContent, Request, RequestStatus,
    Source, StageTimeouts,
};

// ─── Coordinator ────────────────────────────────────────────────────────────

/// Runs Requests through the stage pipeline.
///
/// Holds only shared handles to its collaborators, so one Coordinator can
/// serve many concurrent submissions.
#[derive(Clone)]
pub struct Coordinator {
    interpreter: Arc<dyn Interpreter>,
    retriever: Arc<dyn Retriever>,
    analyzer: Arc<dyn Analyzer>,
    applier: Arc<dyn ResultApplier>,
}

impl Coordinator {
    pub fn new(
        interpreter: Arc<dyn Interpreter>,
        retriever: Arc<dyn Retriever>,
        analyzer: Arc<dyn Analyzer>,
        applier: Arc<dyn ResultApplier>,
    ) -> Self {
        Self {
            interpreter,
            retriever,
            analyzer,
            applier,
        }
    }

    /// Run one Request to completion.
    ///
    /// `timeouts` is either a `StageTimeouts` or a single `Duration` applied
    /// to every stage. The ResultApplier is never timed out.
    pub async fn submit(
        &self,
        input: &str,
        timeouts: impl Into<StageTimeouts>,
    ) -> Result<Request, CoordinationError> {
        self.submit_with_cancel(input, timeouts, CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), but aborts the in-flight stage when
    /// `cancel` fires. A cancelled Request never reaches the ResultApplier.
    pub async fn submit_with_cancel(
        &self,
        input: &str,
        timeouts: impl Into<StageTimeouts>,
        cancel: CancellationToken,
    ) -> Result<Request, CoordinationError> {
        let timeouts = timeouts.into();
        let request = Request::new(input);
        let span = tracing::info_span!("coordinate", request_id = %request.id);

        async move {
            let started = Instant::now();
            let result = self.run(request, timeouts, &cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(request) => tracing::info!(
                    messages = request.messages().len(),
                    elapsed_ms,
                    "coordinator: request completed"
                ),
                Err(e) => tracing::warn!(
                    stage = %e.stage,
                    error = %e.cause,
                    elapsed_ms,
                    "coordinator: request failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: Request,
        timeouts: StageTimeouts,
        cancel: &CancellationToken,
    ) -> Result<Request, CoordinationError> {
        // ── Classifying ──
        let request = enter(request, CoordinatorState::Classifying);
        let interpreter = Arc::clone(&self.interpreter);
        let input = request.input.clone();
        let handle = tokio::spawn(async move { interpreter.classify(&input).await });
        let message = run_stage(Stage::Classification, timeouts.classification, cancel, handle).await;
        let mut request = accept(request, Stage::Classification, message)?;

        let intent = request
            .messages()
            .last()
            .map(AgentMessage::intent)
            .unwrap_or(Intent::Error);

        if intent == Intent::Query {
            // ── Retrieving ──
            request = enter(request, CoordinatorState::Retrieving);
            let retriever = Arc::clone(&self.retriever);
            let input = request.input.clone();
            let handle = tokio::spawn(async move { retriever.retrieve(&input).await });
            let message = run_stage(Stage::Retrieval, timeouts.retrieval, cancel, handle).await;
            request = accept(request, Stage::Retrieval, message)?;

            // ── Analyzing ──
            let rows = request
                .messages()
                .last()
                .and_then(AgentMessage::rows)
                .cloned()
                .unwrap_or_default();
            request = enter(request, CoordinatorState::Analyzing);
            let analyzer = Arc::clone(&self.analyzer);
            let context = AnalysisContext::new(&request.input);
            let handle = tokio::task::spawn_blocking(move || analyzer.analyze(&rows, &context));
            let message = run_stage(Stage::Analysis, timeouts.analysis, cancel, handle).await;
            request = accept(request, Stage::Analysis, message)?;
        } else {
            tracing::info!(
                intent = intent.as_str(),
                "coordinator: non-query intent, skipping retrieval and analysis"
            );
        }

        // ── Applying ──
        if cancel.is_cancelled() {
            let request =
                request.with_message(AgentMessage::failure(Source::Error, StageError::Cancelled));
            return Err(fail(request, Stage::Application, StageError::Cancelled));
        }

        let request = enter(request, CoordinatorState::Applying);
        match self.applier.apply_results(request.messages()).await {
            Ok(()) => Ok(request.finish(RequestStatus::Completed)),
            Err(e) => {
                let cause = StageError::Apply(e);
                let request = request.with_message(AgentMessage::failure(Source::Error, cause.clone()));
                Err(fail(request, Stage::Application, cause))
            }
        }
    }
}

// ─── Stage Execution ────────────────────────────────────────────────────────

/// Await a stage task under its budget and the cancellation token.
///
/// Always yields a message: timeouts and cancellation become `error`
/// messages from `Source::Error`, a panicked task becomes the stage's own
/// failure.
async fn run_stage(
    stage: Stage,
    budget: Duration,
    cancel: &CancellationToken,
    handle: JoinHandle<AgentMessage>,
) -> AgentMessage {
    let abort = handle.abort_handle();
    let started = Instant::now();

    let message = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            abort.abort();
            tracing::warn!(stage = %stage, "coordinator: stage cancelled");
            AgentMessage::failure(Source::Error, StageError::Cancelled)
        }
        joined = tokio::time::timeout(budget, handle) => match joined {
            Ok(Ok(message)) => message,
            Ok(Err(join_error)) => {
                tracing::warn!(stage = %stage, error = %join_error, "coordinator: stage task failed");
                AgentMessage::failure(
                    stage.source(),
                    stage_failure(stage, format!("stage task failed: {join_error}")),
                )
            }
            Err(_) => {
                // A blocking stage cannot be interrupted; its result is discarded.
                abort.abort();
                let timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(stage = %stage, timeout_ms, "coordinator: stage timed out");
                AgentMessage::failure(Source::Error, StageError::Timeout { timeout_ms })
            }
        }
    };

    tracing::debug!(
        stage = %stage,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "coordinator: stage finished"
    );
    message
}

/// Validate a stage's output and append it, or fail the Request.
fn accept(request: Request, stage: Stage, message: AgentMessage) -> Result<Request, CoordinationError> {
    if let Some(cause) = message.failure_cause().cloned() {
        return Err(fail(request.with_message(message), stage, cause));
    }

    if let Err(reason) = check_contract(stage, &message) {
        let cause = stage_failure(stage, reason);
        let request = request.with_message(AgentMessage::failure(stage.source(), cause.clone()));
        return Err(fail(request, stage, cause));
    }

    tracing::info!(
        stage = %stage,
        intent = message.intent().as_str(),
        confidence = message.confidence(),
        rows = message.rows().map(|r| r.len()),
        "coordinator: stage accepted"
    );
    Ok(request.with_message(message))
}

/// The intent and payload each stage must produce.
fn check_contract(stage: Stage, message: &AgentMessage) -> Result<(), String> {
    let intent = message.intent();
    let ok = match stage {
        Stage::Classification => {
            matches!(intent, Intent::Query | Intent::Analysis | Intent::Format)
                && matches!(message.content(), MessageContent::Interpretation(_))
        }
        Stage::Retrieval => intent == Intent::Query && message.rows().is_some(),
        Stage::Analysis => intent == Intent::Analysis && message.analysis().is_some(),
        Stage::Application => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "{stage} stage produced a '{}' message from {} that violates its contract",
            intent.as_str(),
            message.source().as_str()
        ))
    }
}

/// The stage's own failure category for a reason string.
fn stage_failure(stage: Stage, reason: String) -> StageError {
    match stage {
        Stage::Classification => StageError::Classification { reason },
        Stage::Retrieval => StageError::Data {
            phase: DataPhase::Execution,
            reason,
        },
        Stage::Analysis => StageError::Analysis { reason },
        Stage::Application => StageError::Apply(ApplyError::CommitFailed { reason }),
    }
}

fn enter(request: Request, state: CoordinatorState) -> Request {
    tracing::debug!(state = ?state, "coordinator: transition");
    request.transition(state)
}

fn fail(request: Request, stage: Stage, cause: StageError) -> CoordinationError {
    CoordinationError::new(stage, cause, request.finish(RequestStatus::Failed))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
