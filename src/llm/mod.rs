//! Gateway to an OpenAI-compatible chat-completions backend.
//!
//! The reasoning engine talks to the model through the [`LlmBackend`]
//! trait; [`OpenAiClient`] is the production implementation and
//! [`mock::ScriptedBackend`] the deterministic test double.

pub mod mock;
pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use openai::OpenAiClient;

/// Built-in system prompt prepended to every request unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable autonomous assistant. \
Reason carefully, use the tools you are given when they help, and answer \
concretely in the language of the user.";

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Chat message roles on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Output token cap.
    pub max_tokens: Option<u32>,
    /// Prior turns appended between the system prompt and the new input.
    pub conversation_history: Vec<ChatMessage>,
    /// Replaces the built-in system prompt when set.
    pub system_prompt_override: Option<String>,
}

impl GenerateOptions {
    /// Options with only a temperature set.
    pub fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total billed tokens.
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another usage record into this one.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One complete model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Response text.
    pub content: String,
    /// Token accounting.
    pub usage: TokenUsage,
    /// Model that produced the response.
    pub model: String,
    /// Backend-reported finish reason, if any.
    pub finish_reason: Option<String>,
}

/// Events emitted by the streaming variant.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One content delta.
    Delta(String),
    /// The terminal event carrying the assembled response.
    Final(Generation),
}

/// Async sequence of streaming events.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A text-completion provider.
///
/// Dropping the future returned by either method aborts the underlying
/// request, which is how cancellation reaches the backend.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Produce one complete response for `prompt`.
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation>;

    /// Produce a stream of content deltas ending in a [`StreamEvent::Final`].
    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GenerationStream>;

    /// Identifier of the configured model.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&ChatRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_usage_absorb() {
        let mut total = TokenUsage::default();
        total.absorb(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.absorb(&TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.total_tokens, 18);
    }

    #[test]
    fn test_usage_deserialize_with_missing_fields() {
        let usage: TokenUsage = serde_json::from_str("{\"prompt_tokens\": 7}").unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.completion_tokens, 0);
    }
}
