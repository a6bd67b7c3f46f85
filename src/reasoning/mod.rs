//! Reasoning strategies: the ReAct loop and the Plan-and-Solve pipeline.
//!
//! Both strategies share the same input contract (user input plus an opaque
//! context value in, final answer out) and the same step-logging
//! discipline: every call writes exactly one `reasoning` entry to memory on
//! normal exit, carrying the full trace. A cancelled call propagates
//! [`crate::errors::AgentError::Cancelled`] and persists nothing.

pub mod json;
mod plan_solve;
mod react;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ThinkingMode;
use crate::errors::{AgentError, Result};
use crate::llm::{GenerateOptions, Generation, LlmBackend, TokenUsage};
use crate::memory::{MemoryKind, MemoryStore};
use crate::tools::{ToolRegistry, ToolSelector};

pub use json::{extract_json, extract_json_object};
pub use plan_solve::{ExecutionPlan, PlanStep, StepType, TaskAnalysis};
pub use react::ReactResponse;

/// Fixed apology prefix for errors surfaced to the end user.
pub const APOLOGY_PREFIX: &str = "Sorry, I ran into a problem: ";

/// Fallback answer when a run produced nothing usable.
pub const EMPTY_RESULT_APOLOGY: &str =
    "Sorry, I was unable to produce a useful result for this request.";

// ---------------------------------------------------------------------------
// Trace types
// ---------------------------------------------------------------------------

/// Why a reasoning run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final answer.
    FinalAnswer,
    /// The model asked to stop without a final answer.
    ModelStop,
    /// The iteration cap was reached.
    MaxIterations,
    /// Every plan step was driven to completion.
    PlanCompleted,
    /// An unrecoverable error ended the run.
    Error,
}

/// One thought/action/observation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// The model's reasoning text for this step.
    pub thought: String,
    /// Tool invoked, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Arguments passed to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Tool result or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// Complete trace of one reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    /// The task as given.
    pub task: String,
    /// Strategy used.
    pub mode: ThinkingMode,
    /// Ordered step records.
    pub iterations: Vec<IterationRecord>,
    /// Final answer, when one was produced.
    pub final_answer: Option<String>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// End timestamp.
    pub ended_at: DateTime<Utc>,
    /// Why the run stopped.
    pub stop_reason: StopReason,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    /// Iteration cap for the ReAct loop.
    pub max_iterations: u32,
    /// Sampling temperature for reasoning calls.
    pub temperature: f64,
    /// Output token cap per model call.
    pub max_tokens: u32,
    /// Retry attempts for transient backend failures in plan-solve phases.
    pub retry_attempts: u32,
    /// Base retry delay, doubled per attempt.
    pub retry_delay: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            temperature: 0.3,
            max_tokens: 4096,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Drives one agent's reasoning over its LLM, tools, and memory.
pub struct ReasoningEngine {
    pub(crate) llm: Arc<dyn LlmBackend>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) selector: Arc<ToolSelector>,
    pub(crate) config: ReasoningConfig,
    usage: parking_lot::Mutex<TokenUsage>,
}

impl ReasoningEngine {
    /// Create an engine over the given collaborators.
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        registry: Arc<ToolRegistry>,
        memory: Arc<MemoryStore>,
        config: ReasoningConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            memory,
            selector: Arc::new(ToolSelector::default()),
            config,
            usage: parking_lot::Mutex::new(TokenUsage::default()),
        }
    }

    /// Share a selector (e.g. the agent's) instead of the private default.
    pub fn with_selector(mut self, selector: Arc<ToolSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Token usage accumulated across every model call made by this engine.
    pub fn token_usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    /// Run one reasoning call in the requested mode.
    ///
    /// On normal exit the full trace is persisted to memory and the final
    /// answer returned. Cancellation aborts at the next suspension point
    /// without persisting a trace.
    pub async fn run(
        &self,
        mode: ThinkingMode,
        input: &str,
        context: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        log::info!("reasoning start: mode={}, input_len={}", mode, input.len());
        let trace = match mode {
            ThinkingMode::React => self.run_react(input, context, cancel).await?,
            ThinkingMode::PlanSolve => self.run_plan_solve(input, context, cancel).await?,
        };

        let answer = trace
            .final_answer
            .clone()
            .unwrap_or_else(|| EMPTY_RESULT_APOLOGY.to_string());

        self.persist_trace(&trace).await;
        log::info!(
            "reasoning done: mode={}, stop={:?}, iterations={}",
            mode,
            trace.stop_reason,
            trace.iterations.len()
        );
        Ok(answer)
    }

    /// Write the trace as a single `reasoning` memory entry.
    async fn persist_trace(&self, trace: &ReasoningTrace) {
        let payload = serde_json::json!({
            "task": trace.task,
            "mode": trace.mode,
            "content": trace.final_answer,
            "trace": trace,
        });
        self.memory.add(MemoryKind::Reasoning, payload).await;
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// One cancellable model call. Usage is accumulated on success.
    pub(crate) async fn call_llm(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = self.llm.generate(prompt, opts) => result,
        };
        if let Ok(gen) = &result {
            self.usage.lock().absorb(&gen.usage);
        }
        result
    }

    /// Execute a tool through the registry, recording the outcome in the
    /// selector's usage statistics.
    pub(crate) async fn execute_tool_tracked(&self, name: &str, args: Value) -> Result<Value> {
        let started = std::time::Instant::now();
        let result = self.registry.execute(name, args).await;
        self.selector.record_tool_usage(
            name,
            result.is_ok(),
            started.elapsed().as_millis() as u64,
        );
        result
    }

    /// Model call with exponential-backoff retries on transient failures.
    pub(crate) async fn call_llm_with_retry(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Generation> {
        let mut last_error = None;
        for attempt in 0..self.config.retry_attempts.max(1) {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.pow(attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            match self.call_llm(prompt, opts, cancel).await {
                Ok(gen) => return Ok(gen),
                Err(e) if e.is_retryable() => {
                    log::warn!("model call failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| AgentError::LlmUnavailable("no attempts made".into())))
    }

    /// Render the top relevant memory entries for prompt injection.
    pub(crate) async fn memory_block(&self, query: &str, limit: usize) -> String {
        let entries = self.memory.relevant(query, limit).await;
        if entries.is_empty() {
            return "(none)".to_string();
        }
        entries
            .iter()
            .map(|e| {
                let view = e
                    .payload
                    .get("input")
                    .or_else(|| e.payload.get("text"))
                    .or_else(|| e.payload.get("content"))
                    .or_else(|| e.payload.get("message"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| e.payload.to_string());
                format!("- [{}] {}", e.kind, clip(&view, 300))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the registered tool catalog with parameter schemas.
    pub(crate) async fn tool_catalog_block(&self) -> String {
        let tools = self.registry.list().await;
        if tools.is_empty() {
            return "(no tools available)".to_string();
        }
        tools
            .iter()
            .map(|t| {
                format!(
                    "- {}: {}\n  parameters: {}",
                    t.id,
                    t.description,
                    t.schema_json()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Default generation options for reasoning calls.
    pub(crate) fn default_opts(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        }
    }
}

/// Clip a string to at most `max` characters.
pub(crate) fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{ScriptedBackend, UnavailableBackend};
    use std::time::Duration;

    fn engine_with(llm: Arc<dyn LlmBackend>) -> ReasoningEngine {
        ReasoningEngine::new(
            llm,
            Arc::new(ToolRegistry::new()),
            Arc::new(MemoryStore::new(Duration::from_secs(3600), 100)),
            ReasoningConfig {
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_call_llm_cancelled() {
        let backend =
            Arc::new(ScriptedBackend::new(vec!["x"]).with_delay(Duration::from_secs(5)));
        let engine = engine_with(backend);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .call_llm("p", &GenerateOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_retry_exhausts_on_unavailable() {
        let engine = engine_with(Arc::new(UnavailableBackend));
        let err = engine
            .call_llm_with_retry("p", &GenerateOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::LlmUnavailable(_)));
    }

    #[tokio::test]
    async fn test_memory_block_empty() {
        let engine = engine_with(Arc::new(ScriptedBackend::new(vec!["x"])));
        assert_eq!(engine.memory_block("anything", 3).await, "(none)");
    }

    #[tokio::test]
    async fn test_memory_block_lists_entries() {
        let engine = engine_with(Arc::new(ScriptedBackend::new(vec!["x"])));
        engine
            .memory
            .add(
                MemoryKind::Conversation,
                serde_json::json!({"input": "weather in Paris"}),
            )
            .await;
        let block = engine.memory_block("paris weather", 3).await;
        assert!(block.contains("weather in Paris"));
        assert!(block.contains("conversation"));
    }

    #[tokio::test]
    async fn test_tool_catalog_empty() {
        let engine = engine_with(Arc::new(ScriptedBackend::new(vec!["x"])));
        assert_eq!(engine.tool_catalog_block().await, "(no tools available)");
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("0123456789abc", 10), "0123456789...");
    }

    #[tokio::test]
    async fn test_run_persists_reasoning_entry() {
        let reply = serde_json::json!({
            "reasoning": "trivial",
            "finalAnswer": "done",
            "shouldStop": false
        })
        .to_string();
        let engine = engine_with(Arc::new(ScriptedBackend::new(vec![reply])));
        let answer = engine
            .run(
                ThinkingMode::React,
                "do nothing",
                &Value::Null,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(answer, "done");
        let entries = engine.memory.get_by_kind(MemoryKind::Reasoning).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["task"], "do nothing");
    }
}
