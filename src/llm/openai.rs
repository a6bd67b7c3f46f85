//! OpenAI-compatible chat-completions client.
//!
//! Speaks the standard `/chat/completions` wire format, non-streaming and
//! SSE-streaming. Transport failures, non-2xx statuses, and responses with
//! no choices surface as [`AgentError::LlmUnavailable`] (retryable at the
//! caller); 4xx statuses surface as [`AgentError::LlmBadRequest`] (fatal).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::errors::{AgentError, Result};
use crate::llm::{
    ChatRole, GenerateOptions, Generation, GenerationStream, LlmBackend, StreamEvent,
    TokenUsage, DEFAULT_SYSTEM_PROMPT,
};

/// Default request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    model: String,
    api_key: Option<String>,
    base_url: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client for `model` against the default OpenAI endpoint.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Build a client from the process runtime configuration.
    pub fn from_runtime(runtime: &crate::config::RuntimeConfig) -> Self {
        let mut client = Self::new(runtime.model.clone()).with_base_url(runtime.base_url.clone());
        if let Some(key) = &runtime.api_key {
            client = client.with_api_key(key.clone());
        }
        client
    }

    /// Set the API key explicitly.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the built-in system prompt for every call.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Assemble the wire message array: system prompt, history, new input.
    fn build_messages(&self, prompt: &str, opts: &GenerateOptions) -> Vec<Value> {
        let system = opts
            .system_prompt_override
            .as_deref()
            .unwrap_or(&self.system_prompt);
        let mut messages = vec![json!({ "role": "system", "content": system })];
        for m in &opts.conversation_history {
            messages.push(json!({ "role": role_str(m.role), "content": m.content }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        messages
    }

    fn build_body(&self, prompt: &str, opts: &GenerateOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.build_messages(prompt, opts),
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = opts.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let mut req = self.client.post(self.chat_url()).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::LlmUnavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(AgentError::LlmBadRequest(format!("{}: {}", status, text)))
        } else {
            Err(AgentError::LlmUnavailable(format!("{}: {}", status, text)))
        }
    }
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation> {
        let body = self.build_body(prompt, opts, false);
        log::debug!(
            "chat completion: model={}, {} messages",
            self.model,
            body["messages"].as_array().map_or(0, |m| m.len())
        );

        let resp = self.post(&body).await?;
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::LlmUnavailable(format!("invalid response body: {}", e)))?;

        parse_completion(&envelope, &self.model)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<GenerationStream> {
        let body = self.build_body(prompt, opts, true);
        let resp = self.post(&body).await?;
        let model = self.model.clone();

        // SSE events can split across TCP chunks; carry the partial line in
        // the scan state and emit events only for complete lines.
        let stream = resp
            .bytes_stream()
            .scan(StreamState::new(model), |state, chunk| {
                let events = match chunk {
                    Ok(bytes) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                        state.drain()
                    }
                    Err(e) => vec![Err(AgentError::LlmUnavailable(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Line-buffering state for one SSE response.
struct StreamState {
    buffer: String,
    content: String,
    usage: TokenUsage,
    finish_reason: Option<String>,
    model: String,
    done: bool,
}

impl StreamState {
    fn new(model: String) -> Self {
        Self {
            buffer: String::new(),
            content: String::new(),
            usage: TokenUsage::default(),
            finish_reason: None,
            model,
            done: false,
        }
    }

    /// Drain complete lines from the buffer into stream events.
    fn drain(&mut self) -> Vec<Result<StreamEvent>> {
        let mut events = Vec::new();
        while let Some(nl) = self.buffer.find('\n') {
            let line = self.buffer[..nl].trim_end_matches('\r').to_string();
            self.buffer = self.buffer[nl + 1..].to_string();

            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                if !self.done {
                    self.done = true;
                    events.push(Ok(StreamEvent::Final(Generation {
                        content: std::mem::take(&mut self.content),
                        usage: self.usage,
                        model: self.model.clone(),
                        finish_reason: self.finish_reason.take(),
                    })));
                }
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
                if let Ok(u) = serde_json::from_value::<TokenUsage>(usage.clone()) {
                    self.usage = u;
                }
            }
            let choice = &value["choices"][0];
            if let Some(reason) = choice["finish_reason"].as_str() {
                self.finish_reason = Some(reason.to_string());
            }
            if let Some(delta) = choice["delta"]["content"].as_str() {
                if !delta.is_empty() {
                    self.content.push_str(delta);
                    events.push(Ok(StreamEvent::Delta(delta.to_string())));
                }
            }
        }
        events
    }
}

/// Parse a non-streaming completion envelope.
fn parse_completion(envelope: &Value, fallback_model: &str) -> Result<Generation> {
    let choice = envelope
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| AgentError::LlmUnavailable("response contained no choices".into()))?;

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = envelope
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok())
        .unwrap_or_default();

    Ok(Generation {
        content,
        usage,
        model: envelope
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(fallback_model)
            .to_string(),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|r| r.as_str())
            .map(str::to_string),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
