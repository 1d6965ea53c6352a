//! Interpreter stage: classify raw user input into an intent.
//!
//! `KeywordInterpreter` scores the input against keyword groups per intent.
//! A model-backed classifier lives in `model_interpreter`.

use async_trait::async_trait;

use super::errors::StageError;
use super::types::{AgentMessage, DisplayInstructions, Intent, Interpretation, MessageContent, Source};

/// Classifies free-form input. Failures are returned as `error`-intent
/// messages, never as panics or `Err`.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn classify(&self, input: &str) -> AgentMessage;
}

// ─── Keyword Groups ─────────────────────────────────────────────────────────

const QUERY_GROUPS: &[&[&str]] = &[
    &[
        "show", "list", "get", "fetch", "display", "find", "pull", "retrieve", "what is",
        "what was", "what were", "how much",
    ],
    &[
        "revenue", "income", "sales", "expense", "asset", "liabilit", "cash", "earnings",
        "profit", "financial",
    ],
    &["year", "quarter", "recent", "latest", "last", "top", "20"],
];

const ANALYSIS_GROUPS: &[&[&str]] = &[
    &["analy", "trend", "compare", "growth", "insight", "forecast", "evaluate"],
    &["why", "explain", "summar", "breakdown", "ratio", "margin"],
    &["red flag", "anomal", "risk", "deviation", "outlier"],
];

const FORMAT_GROUPS: &[&[&str]] = &[
    &["format", "style", "bold", "highlight", "color", "colour", "font"],
    &["currency", "percent", "decimal", "dollar", "number format", "%"],
    &["cell", "column", "row", "range", "sheet", "table"],
];

/// Base confidence for any match; a full match adds `CONFIDENCE_SPAN`.
const CONFIDENCE_BASE: f64 = 0.55;
const CONFIDENCE_SPAN: f64 = 0.30;

// ─── KeywordInterpreter ─────────────────────────────────────────────────────

/// Rule-based classifier. No language-understanding claims; it only
/// satisfies the Interpreter contract.
#[derive(Debug, Clone)]
pub struct KeywordInterpreter {
    min_confidence: f64,
}

impl KeywordInterpreter {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    /// Classify synchronously. Shared by the async trait impl and tests.
    pub fn classify_text(&self, input: &str) -> AgentMessage {
        let lower = input.trim().to_lowercase();
        if lower.is_empty() {
            return classification_failure("input is empty");
        }

        // Order matters: ties resolve to the earlier intent.
        let candidates = [
            (Intent::Query, QUERY_GROUPS),
            (Intent::Analysis, ANALYSIS_GROUPS),
            (Intent::Format, FORMAT_GROUPS),
        ];

        let mut best: Option<(Intent, f64, Vec<String>)> = None;
        for (intent, groups) in candidates {
            let score = keyword_score(&lower, groups);
            if score == 0 {
                continue;
            }
            let ratio = score as f64 / groups.len() as f64;
            if best.as_ref().map_or(true, |(_, r, _)| ratio > *r) {
                best = Some((intent, ratio, matched_terms(&lower, groups)));
            }
        }

        let Some((intent, ratio, signals)) = best else {
            return classification_failure("no intent signals found in input");
        };

        let confidence = CONFIDENCE_BASE + CONFIDENCE_SPAN * ratio;
        if confidence < self.min_confidence {
            return classification_failure(&format!(
                "confidence {confidence:.2} for {} is below the minimum {:.2}",
                intent.as_str(),
                self.min_confidence
            ));
        }

        let display = if intent == Intent::Format {
            detect_display(&lower)
        } else {
            None
        };

        tracing::debug!(
            intent = intent.as_str(),
            confidence = confidence,
            signals = ?signals,
            "interpreter: classified input"
        );

        AgentMessage::new(
            Source::Interpreter,
            intent,
            MessageContent::Interpretation(Interpretation {
                suggestion: suggestion_for(intent, input.trim()),
                signals,
                display,
            }),
            confidence,
        )
    }
}

impl Default for KeywordInterpreter {
    fn default() -> Self {
        Self::new(0.6)
    }
}

#[async_trait]
impl Interpreter for KeywordInterpreter {
    async fn classify(&self, input: &str) -> AgentMessage {
        self.classify_text(input)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Score a message against keyword groups.
///
/// Each group is a set of synonymous terms. A group is "matched" if ANY term
/// in it appears in the message. Returns the count of matched groups.
pub(crate) fn keyword_score(lower_message: &str, groups: &[&[&str]]) -> usize {
    groups
        .iter()
        .filter(|group| group.iter().any(|kw| lower_message.contains(kw)))
        .count()
}

/// First matching term of each matched group.
fn matched_terms(lower_message: &str, groups: &[&[&str]]) -> Vec<String> {
    groups
        .iter()
        .filter_map(|group| group.iter().find(|kw| lower_message.contains(*kw)))
        .map(|kw| kw.trim().to_string())
        .collect()
}

fn detect_display(lower: &str) -> Option<DisplayInstructions> {
    let number_format = if lower.contains("currency") || lower.contains("dollar") || lower.contains('$') {
        Some("$#,##0.00")
    } else if lower.contains("percent") || lower.contains('%') {
        Some("0.00%")
    } else if lower.contains("decimal") || lower.contains("thousands") {
        Some("#,##0.00")
    } else {
        None
    };
    let emphasis = ["bold", "highlight", "emphasi"]
        .iter()
        .any(|kw| lower.contains(kw));

    if number_format.is_none() && !emphasis {
        return None;
    }
    Some(DisplayInstructions {
        number_format: number_format.map(String::from),
        emphasis,
    })
}

fn suggestion_for(intent: Intent, input: &str) -> String {
    match intent {
        Intent::Query => format!("Retrieve financial data for: {input}"),
        Intent::Analysis => format!("Analyze the selected data: {input}"),
        Intent::Format => format!("Apply formatting: {input}"),
        Intent::Error => String::new(),
    }
}

fn classification_failure(reason: &str) -> AgentMessage {
    AgentMessage::failure(
        Source::Interpreter,
        StageError::Classification {
            reason: reason.to_string(),
        },
    )
}
