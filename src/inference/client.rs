//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to a model endpoint and
//! returns the assistant's text.

use std::time::Duration;

use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat};
use crate::config::ModelConfig;

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout. The Coordinator's stage budget usually fires first.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── InferenceClient ────────────────────────────────────────────────────────

/// Client for a single chat completion endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: HttpClient,
    base_url: String,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl InferenceClient {
    /// Build a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(config: &ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_name: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Send a non-streaming chat completion request.
    ///
    /// When `json_mode` is set the endpoint is asked for a JSON object.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        json_mode: bool,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: self.model_name.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
            response_format: json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        };

        tracing::debug!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            "inference: chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::InvalidResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion_body(&body_text)
    }
}

/// Extract the first choice's text from a non-streaming response body.
pub fn parse_completion_body(body: &str) -> Result<String, InferenceError> {
    let resp: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::InvalidResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::InvalidResponse {
            reason: "empty choices array".into(),
        })?;

    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(InferenceError::InvalidResponse {
            reason: format!(
                "empty content (finish_reason: {})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            ),
        })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_base_url() {
        let client = InferenceClient::new(&ModelConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..ModelConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
        assert_eq!(client.model_name(), "qwen2.5:7b");
    }

    #[test]
    fn test_parse_completion_body() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"intent\":\"query\"}"},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_completion_body(body).unwrap(), r#"{"intent":"query"}"#);
    }

    #[test]
    fn test_parse_completion_body_empty_choices() {
        let err = parse_completion_body(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_completion_body_empty_content() {
        let body = r#"{"choices":[{"message":{"content":""},"finish_reason":"length"}]}"#;
        let err = parse_completion_body(body).unwrap_err();
        assert!(err.to_string().contains("length"));
    }

    #[test]
    fn test_parse_completion_body_garbage() {
        assert!(parse_completion_body("not json").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let client = InferenceClient::new(&ModelConfig {
            base_url: "http://127.0.0.1:9/v1".into(),
            ..ModelConfig::default()
        })
        .unwrap();
        let err = client
            .chat_completion(vec![ChatMessage::user("hi")], false)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }
}
