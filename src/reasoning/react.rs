//! The ReAct loop: interleaved thought, action, observation.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, Result};
use crate::reasoning::json::extract_json;
use crate::reasoning::{
    clip, IterationRecord, ReasoningEngine, ReasoningTrace, StopReason, APOLOGY_PREFIX,
};

/// Cap on observation text fed back into the transcript.
const OBSERVATION_CLIP: usize = 2000;

/// The JSON shape the model is asked to answer with on every iteration.
#[derive(Debug, Clone, Default)]
pub struct ReactResponse {
    /// The model's reasoning text.
    pub reasoning: String,
    /// Tool to invoke next, if any.
    pub action: Option<String>,
    /// Arguments for the tool.
    pub args: Option<Value>,
    /// Final answer; terminates the loop when present.
    pub final_answer: Option<String>,
    /// Stop request without a final answer.
    pub should_stop: bool,
}

impl ReactResponse {
    /// Read the response fields out of a parsed JSON value, tolerating
    /// camelCase and snake_case field names and non-string final answers.
    pub fn from_value(value: &Value) -> Self {
        let field = |names: &[&str]| -> Option<Value> {
            names.iter().find_map(|n| value.get(n)).cloned()
        };

        let final_answer = field(&["finalAnswer", "final_answer"]).and_then(|v| match v {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        let action = field(&["action"]).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        });

        Self {
            reasoning: field(&["reasoning", "thought"])
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            action,
            args: field(&["args", "arguments"]).filter(|v| !v.is_null()),
            final_answer,
            should_stop: field(&["shouldStop", "should_stop"])
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

/// Coerce whatever the model put in `args` into an argument object.
///
/// Objects pass through; a string is parsed as JSON when possible and
/// otherwise wrapped as `{query: ...}`; anything else is stringified into
/// the same wrapper.
pub(crate) fn normalize_args(args: Option<Value>) -> Value {
    match args {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(obj @ Value::Object(_)) => obj,
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => serde_json::json!({ "query": s }),
        },
        Some(other) => serde_json::json!({ "query": other.to_string() }),
    }
}

impl ReasoningEngine {
    /// Run the bounded ReAct loop.
    pub(crate) async fn run_react(
        &self,
        input: &str,
        context: &Value,
        cancel: &CancellationToken,
    ) -> Result<ReasoningTrace> {
        let started_at = chrono::Utc::now();
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut final_answer: Option<String> = None;
        let mut stop_reason = StopReason::MaxIterations;

        let memory_block = self.memory_block(input, 3).await;
        let opts = self.default_opts();
        let max = self.config.max_iterations.max(1);

        for iteration in 1..=max {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let catalog = self.tool_catalog_block().await;
            let prompt = build_react_prompt(
                &memory_block,
                &catalog,
                context,
                input,
                &iterations,
                iteration,
                max,
            );

            let generation = match self.call_llm(&prompt, &opts, cancel).await {
                Ok(gen) => gen,
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) if e.is_retryable() => {
                    // Transient backend trouble is observed like any other
                    // failure; the loop keeps going.
                    iterations.push(IterationRecord {
                        thought: String::new(),
                        action: None,
                        args: None,
                        observation: Some(format!("error: {}", e)),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let parsed = match extract_json(&generation.content) {
                Ok(value) => value,
                Err(_) => {
                    iterations.push(IterationRecord {
                        thought: clip(&generation.content, 300),
                        action: None,
                        args: None,
                        observation: Some(
                            "error: model output was not valid JSON".to_string(),
                        ),
                    });
                    continue;
                }
            };
            let response = ReactResponse::from_value(&parsed);

            if let Some(answer) = response.final_answer {
                iterations.push(IterationRecord {
                    thought: response.reasoning,
                    action: None,
                    args: None,
                    observation: None,
                });
                final_answer = Some(answer);
                stop_reason = StopReason::FinalAnswer;
                break;
            }

            if response.should_stop {
                iterations.push(IterationRecord {
                    thought: response.reasoning.clone(),
                    action: None,
                    args: None,
                    observation: None,
                });
                final_answer = Some(render_transcript(&iterations));
                stop_reason = StopReason::ModelStop;
                break;
            }

            match response.action {
                Some(action) => {
                    let args = normalize_args(response.args);
                    let observation = tokio::select! {
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        result = self.execute_tool_tracked(&action, args.clone()) => match result {
                            Ok(value) => clip(&value.to_string(), OBSERVATION_CLIP),
                            Err(e) => format!("error: {}", e),
                        }
                    };
                    iterations.push(IterationRecord {
                        thought: response.reasoning,
                        action: Some(action),
                        args: Some(args),
                        observation: Some(observation),
                    });
                }
                None => {
                    // Neither an action nor an answer: record the thought
                    // and prompt again.
                    iterations.push(IterationRecord {
                        thought: response.reasoning,
                        action: None,
                        args: None,
                        observation: None,
                    });
                }
            }
        }

        if final_answer.is_none() {
            final_answer = Some(format!(
                "{}the reasoning loop reached its iteration limit without a final answer.",
                APOLOGY_PREFIX
            ));
        }

        Ok(ReasoningTrace {
            task: input.to_string(),
            mode: crate::config::ThinkingMode::React,
            iterations,
            final_answer,
            started_at,
            ended_at: chrono::Utc::now(),
            stop_reason,
        })
    }
}

/// Render the accumulated transcript as the answer of record when the
/// model stops without one.
fn render_transcript(iterations: &[IterationRecord]) -> String {
    let mut lines = Vec::new();
    for record in iterations {
        if !record.thought.is_empty() {
            lines.push(record.thought.clone());
        }
        if let Some(obs) = &record.observation {
            lines.push(format!("Observation: {}", obs));
        }
    }
    if lines.is_empty() {
        "The task was stopped before any conclusion was reached.".to_string()
    } else {
        lines.join("\n")
    }
}

/// Assemble the per-iteration prompt.
fn build_react_prompt(
    memory_block: &str,
    catalog: &str,
    context: &Value,
    input: &str,
    iterations: &[IterationRecord],
    iteration: u32,
    max_iterations: u32,
) -> String {
    let transcript = if iterations.is_empty() {
        "(first iteration)".to_string()
    } else {
        iterations
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut line = format!("{}. Thought: {}", i + 1, r.thought);
                if let Some(action) = &r.action {
                    line.push_str(&format!(
                        "\n   Action: {} {}",
                        action,
                        r.args.as_ref().map(|a| a.to_string()).unwrap_or_default()
                    ));
                }
                if let Some(obs) = &r.observation {
                    line.push_str(&format!("\n   Observation: {}", obs));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let context_block = if context.is_null() {
        "(none)".to_string()
    } else {
        context.to_string()
    };

    format!(
        "You are an autonomous agent solving a task step by step.\n\
         \n\
         Relevant memory:\n{memory}\n\
         \n\
         Available tools:\n{catalog}\n\
         \n\
         Context: {context}\n\
         \n\
         Task: {input}\n\
         \n\
         Progress so far:\n{transcript}\n\
         \n\
         This is iteration {iteration} of {max}.\n\
         Respond with a single JSON object:\n\
         {{\"reasoning\": \"your thinking\", \"action\": \"tool name or null\", \
         \"args\": {{}}, \"finalAnswer\": \"answer or null\", \"shouldStop\": false}}\n\
         Use a tool only when it is listed above. Set finalAnswer when you can \
         answer the task; set shouldStop to true only to give up.",
        memory = memory_block,
        catalog = catalog,
        context = context_block,
        input = input,
        transcript = transcript,
        iteration = iteration,
        max = max_iterations,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThinkingMode;
    use crate::llm::mock::ScriptedBackend;
    use crate::memory::{MemoryKind, MemoryStore};
    use crate::reasoning::{ReasoningConfig, ReasoningEngine};
    use crate::tools::{ParamKind, ToolDescriptor, ToolParam, ToolRegistry};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(replies: Vec<String>, registry: Arc<ToolRegistry>) -> ReasoningEngine {
        ReasoningEngine::new(
            Arc::new(ScriptedBackend::new(replies)),
            registry,
            Arc::new(MemoryStore::new(Duration::from_secs(3600), 100)),
            ReasoningConfig {
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    /// Calculator test double that records every invocation.
    fn calculator(calls: Arc<Mutex<Vec<Value>>>) -> ToolDescriptor {
        ToolDescriptor::new(
            "calculator",
            "evaluates an arithmetic expression",
            crate::tools::tool_fn(move |args| {
                let calls = calls.clone();
                async move {
                    calls.lock().push(args.clone());
                    let result = match args["expression"].as_str() {
                        Some("15*23+7") => 352,
                        _ => 0,
                    };
                    Ok(json!({ "result": result }))
                }
            }),
        )
        .with_params(vec![ToolParam::required("expression", ParamKind::String)])
    }

    #[test]
    fn test_response_from_value_camel_case() {
        let value = json!({
            "reasoning": "thinking",
            "action": "search",
            "args": {"query": "x"},
            "finalAnswer": null,
            "shouldStop": false
        });
        let resp = ReactResponse::from_value(&value);
        assert_eq!(resp.reasoning, "thinking");
        assert_eq!(resp.action.as_deref(), Some("search"));
        assert!(resp.final_answer.is_none());
        assert!(!resp.should_stop);
    }

    #[test]
    fn test_response_from_value_snake_case() {
        let value = json!({"final_answer": "done", "should_stop": true});
        let resp = ReactResponse::from_value(&value);
        assert_eq!(resp.final_answer.as_deref(), Some("done"));
        assert!(resp.should_stop);
    }

    #[test]
    fn test_response_non_string_final_answer() {
        let value = json!({"finalAnswer": {"total": 352}});
        let resp = ReactResponse::from_value(&value);
        assert!(resp.final_answer.unwrap().contains("352"));
    }

    #[test]
    fn test_response_empty_action_ignored() {
        let value = json!({"action": ""});
        assert!(ReactResponse::from_value(&value).action.is_none());
    }

    #[test]
    fn test_normalize_args_object() {
        let args = normalize_args(Some(json!({"a": 1})));
        assert_eq!(args, json!({"a": 1}));
    }

    #[test]
    fn test_normalize_args_json_string() {
        let args = normalize_args(Some(json!("{\"city\": \"Hangzhou\"}")));
        assert_eq!(args, json!({"city": "Hangzhou"}));
    }

    #[test]
    fn test_normalize_args_bare_string() {
        let args = normalize_args(Some(json!("weather in Paris")));
        assert_eq!(args, json!({"query": "weather in Paris"}));
    }

    #[test]
    fn test_normalize_args_none() {
        assert_eq!(normalize_args(None), json!({}));
        assert_eq!(normalize_args(Some(Value::Null)), json!({}));
    }

    #[test]
    fn test_normalize_args_number() {
        assert_eq!(normalize_args(Some(json!(7))), json!({"query": "7"}));
    }

    #[tokio::test]
    async fn test_calculator_flow() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(calculator(calls.clone())).await.unwrap();

        let replies = vec![
            json!({
                "reasoning": "I should evaluate the expression with the calculator.",
                "action": "calculator",
                "args": {"expression": "15*23+7"},
                "finalAnswer": null,
                "shouldStop": false
            })
            .to_string(),
            json!({
                "reasoning": "The tool returned 352.",
                "finalAnswer": "15*23+7 = 352",
                "shouldStop": false
            })
            .to_string(),
        ];
        let engine = engine(replies, registry);
        let trace = engine
            .run_react("compute 15*23+7", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.lock().len(), 1);
        assert_eq!(calls.lock()[0], json!({"expression": "15*23+7"}));
        assert!(trace.final_answer.unwrap().contains("352"));
        assert_eq!(trace.stop_reason, StopReason::FinalAnswer);
        assert_eq!(trace.mode, ThinkingMode::React);
    }

    #[tokio::test]
    async fn test_missing_tool_apology_without_invocation() {
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![json!({
            "reasoning": "No weather tool is available.",
            "finalAnswer": "I'm sorry, I have no way to check the weather in Paris.",
            "shouldStop": false
        })
        .to_string()];
        let engine = engine(replies, registry);
        let trace = engine
            .run_react(
                "what is the weather in Paris",
                &Value::Null,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(trace.iterations.len(), 1);
        assert!(trace.iterations[0].action.is_none());
        assert!(trace.final_answer.unwrap().to_lowercase().contains("sorry"));
    }

    #[tokio::test]
    async fn test_unparsable_output_becomes_observation() {
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![
            "I will just chat instead of emitting JSON".to_string(),
            json!({"reasoning": "ok", "finalAnswer": "recovered"}).to_string(),
        ];
        let engine = engine(replies, registry);
        let trace = engine
            .run_react("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(trace.iterations.len(), 2);
        assert!(trace.iterations[0]
            .observation
            .as_ref()
            .unwrap()
            .contains("not valid JSON"));
        assert_eq!(trace.final_answer.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_tool_error_observed_and_loop_continues() {
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![
            json!({
                "reasoning": "try a tool that does not exist",
                "action": "ghost_tool",
                "args": {}
            })
            .to_string(),
            json!({"reasoning": "fall back", "finalAnswer": "done without the tool"}).to_string(),
        ];
        let engine = engine(replies, registry);
        let trace = engine
            .run_react("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert!(trace.iterations[0]
            .observation
            .as_ref()
            .unwrap()
            .starts_with("error:"));
        assert_eq!(trace.stop_reason, StopReason::FinalAnswer);
    }

    #[tokio::test]
    async fn test_should_stop_returns_transcript() {
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![json!({
            "reasoning": "nothing more to do here",
            "shouldStop": true
        })
        .to_string()];
        let engine = engine(replies, registry);
        let trace = engine
            .run_react("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(trace.stop_reason, StopReason::ModelStop);
        assert!(trace.final_answer.unwrap().contains("nothing more to do"));
    }

    #[tokio::test]
    async fn test_iteration_cap_respected() {
        let registry = Arc::new(ToolRegistry::new());
        // The model keeps thinking forever; the loop must stop at the cap.
        let looping = json!({"reasoning": "still thinking"}).to_string();
        let backend = Arc::new(ScriptedBackend::new(vec![looping; 20]));
        let engine = ReasoningEngine::new(
            backend.clone(),
            registry,
            Arc::new(MemoryStore::new(Duration::from_secs(3600), 100)),
            ReasoningConfig {
                max_iterations: 3,
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let trace = engine
            .run_react("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.call_count(), 3);
        assert_eq!(trace.iterations.len(), 3);
        assert_eq!(trace.stop_reason, StopReason::MaxIterations);
        assert!(trace.final_answer.unwrap().contains("iteration limit"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let registry = Arc::new(ToolRegistry::new());
        let engine = engine(vec!["{}".to_string()], registry);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .run_react("task", &Value::Null, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_reasoning_entry_left_by_direct_run_react() {
        // run_react itself never persists; persistence happens in run().
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![json!({"finalAnswer": "x"}).to_string()];
        let engine = engine(replies, registry);
        engine
            .run_react("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();
        assert!(engine
            .memory
            .get_by_kind(MemoryKind::Reasoning)
            .await
            .is_empty());
    }

    #[test]
    fn test_prompt_contains_all_sections() {
        let prompt = build_react_prompt(
            "- memory line",
            "- tool line",
            &json!({"locale": "fr"}),
            "the task",
            &[],
            1,
            10,
        );
        assert!(prompt.contains("- memory line"));
        assert!(prompt.contains("- tool line"));
        assert!(prompt.contains("locale"));
        assert!(prompt.contains("the task"));
        assert!(prompt.contains("iteration 1 of 10"));
        assert!(prompt.contains("finalAnswer"));
    }
}
