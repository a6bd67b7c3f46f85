//! Deterministic mock backends for tests.
//!
//! [`ScriptedBackend`] pops one pre-baked reply per call and records the
//! prompt it saw, so reasoning-engine and agent tests can assert on exact
//! prompt/response sequences without network access.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{AgentError, Result};
use crate::llm::{
    GenerateOptions, Generation, GenerationStream, LlmBackend, StreamEvent, TokenUsage,
};

/// Pre-scripted backend. Each `generate` call consumes the next reply from
/// the front of the queue; when the queue runs dry a fixed fallback string
/// is returned so tests fail visibly instead of hanging.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    /// Every prompt seen, in call order, for post-hoc inspection.
    pub prompts: Arc<Mutex<Vec<String>>>,
    /// Artificial latency before each reply, for cancellation tests.
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Build a backend from an ordered list of replies.
    pub fn new(replies: Vec<impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Convenience: a backend that repeats the same reply many times.
    pub fn always(reply: impl Into<String>) -> Self {
        let r: String = reply.into();
        Self::new(vec![r; 64])
    }

    /// Sleep this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.prompts.lock().push(prompt.to_string());
        let content = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "[scripted backend exhausted]".to_string());
        Ok(Generation {
            content,
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            },
            model: "scripted".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GenerationStream> {
        let full = self.generate(prompt, opts).await?;
        let half = full.content.len() / 2;
        let (a, b) = full.content.split_at(half);
        let events: Vec<Result<StreamEvent>> = vec![
            Ok(StreamEvent::Delta(a.to_string())),
            Ok(StreamEvent::Delta(b.to_string())),
            Ok(StreamEvent::Final(full)),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Backend that always fails with [`AgentError::LlmUnavailable`].
pub struct UnavailableBackend;

#[async_trait]
impl LlmBackend for UnavailableBackend {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        Err(AgentError::LlmUnavailable("backend offline".into()))
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<GenerationStream> {
        Err(AgentError::LlmUnavailable("backend offline".into()))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let backend = ScriptedBackend::new(vec!["first", "second"]);
        let opts = GenerateOptions::default();
        assert_eq!(backend.generate("a", &opts).await.unwrap().content, "first");
        assert_eq!(backend.generate("b", &opts).await.unwrap().content, "second");
        assert!(backend
            .generate("c", &opts)
            .await
            .unwrap()
            .content
            .contains("exhausted"));
    }

    #[tokio::test]
    async fn test_scripted_records_prompts() {
        let backend = ScriptedBackend::new(vec!["ok"]);
        backend
            .generate("the prompt", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.prompts.lock()[0], "the prompt");
    }

    #[tokio::test]
    async fn test_scripted_stream_ends_with_final() {
        let backend = ScriptedBackend::new(vec!["hello world"]);
        let mut stream = backend
            .generate_stream("x", &GenerateOptions::default())
            .await
            .unwrap();
        let mut content = String::new();
        let mut final_seen = false;
        while let Some(ev) = stream.next().await {
            match ev.unwrap() {
                StreamEvent::Delta(d) => content.push_str(&d),
                StreamEvent::Final(gen) => {
                    assert_eq!(gen.content, "hello world");
                    final_seen = true;
                }
            }
        }
        assert_eq!(content, "hello world");
        assert!(final_seen);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let err = UnavailableBackend
            .generate("x", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::LlmUnavailable(_)));
    }
}
