//! Inference client: OpenAI-compatible chat completions for the
//! model-backed Interpreter.
//!
//! The client speaks the OpenAI Chat Completions API, so the classifier
//! model is interchangeable via config.

pub mod client;
pub mod errors;
pub mod types;

pub use client::InferenceClient;
pub use errors::InferenceError;
pub use types::{ChatMessage, Role};
