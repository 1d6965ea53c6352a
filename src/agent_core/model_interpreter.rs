//! Model-backed Interpreter.
//!
//! Asks an OpenAI-compatible endpoint to classify the input and parses a
//! JSON reply of the form `{"intent": "...", "confidence": 0.0, "suggestion": "..."}`.

use async_trait::async_trait;
use serde::Deserialize;

use super::errors::StageError;
use super::interpreter::Interpreter;
use super::types::{AgentMessage, Intent, Interpretation, MessageContent, Source};
use crate::inference::{ChatMessage, InferenceClient};

const CLASSIFY_PROMPT: &str = "You classify requests made inside a spreadsheet financial \
analysis add-in. Reply with a single JSON object and nothing else: \
{\"intent\": \"query\" | \"analysis\" | \"format\", \"confidence\": <number between 0 and 1>, \
\"suggestion\": \"<one short sentence describing the action>\"}. \
Use \"query\" when the user wants financial data fetched, \"analysis\" when they want \
existing data interpreted, and \"format\" when they want cells styled.";

/// Classifier that delegates to a chat model.
pub struct ModelInterpreter {
    client: InferenceClient,
    min_confidence: f64,
}

impl ModelInterpreter {
    pub fn new(client: InferenceClient, min_confidence: f64) -> Self {
        Self {
            client,
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Interpreter for ModelInterpreter {
    async fn classify(&self, input: &str) -> AgentMessage {
        let input = input.trim();
        if input.is_empty() {
            return failure("input is empty".into());
        }

        let messages = vec![ChatMessage::system(CLASSIFY_PROMPT), ChatMessage::user(input)];
        let reply = match self.client.chat_completion(messages, true).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    model = self.client.model_name(),
                    error = %e,
                    "interpreter: model request failed"
                );
                return failure(format!("model request failed: {e}"));
            }
        };

        let parsed = match parse_intent_reply(&reply) {
            Ok(parsed) => parsed,
            Err(reason) => return failure(reason),
        };

        if parsed.confidence < self.min_confidence {
            return failure(format!(
                "model confidence {:.2} is below the minimum {:.2}",
                parsed.confidence, self.min_confidence
            ));
        }

        AgentMessage::new(
            Source::Interpreter,
            parsed.intent,
            MessageContent::Interpretation(Interpretation {
                suggestion: parsed.suggestion,
                signals: vec![format!("model:{}", self.client.model_name())],
                display: None,
            }),
            parsed.confidence,
        )
    }
}

// ─── Reply Parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IntentReply {
    pub intent: Intent,
    pub confidence: f64,
    pub suggestion: String,
}

#[derive(Deserialize)]
struct RawReply {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Parse the model's reply, tolerating code fences and surrounding prose.
pub(crate) fn parse_intent_reply(reply: &str) -> Result<IntentReply, String> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &reply[s..=e],
        _ => return Err(format!("no JSON object in model reply: {}", truncate(reply))),
    };

    let raw: RawReply = serde_json::from_str(json)
        .map_err(|e| format!("unparsable model reply ({e}): {}", truncate(reply)))?;

    let intent = Intent::from_label(&raw.intent)
        .ok_or_else(|| format!("model returned unknown intent '{}'", raw.intent))?;

    let confidence = raw.confidence.unwrap_or(0.0);
    if !confidence.is_finite() {
        return Err("model returned a non-finite confidence".into());
    }

    Ok(IntentReply {
        intent,
        confidence: confidence.clamp(0.0, 1.0),
        suggestion: raw.suggestion.unwrap_or_default(),
    })
}

fn truncate(s: &str) -> String {
    const MAX: usize = 120;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{head}...")
    }
}

fn failure(reason: String) -> AgentMessage {
    AgentMessage::failure(Source::Interpreter, StageError::Classification { reason })
}
