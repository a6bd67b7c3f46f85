//! The Plan-and-Solve pipeline: analyze, plan, execute, evaluate.
//!
//! The model first emits a whole plan, which is validated (dependencies
//! must reference strictly earlier steps) and then executed step by step.
//! Step failures are soft: a failed step is recorded, its fallback noted
//! when one exists, and execution continues. Hard failures are an
//! unparseable or invalid plan, which abort the run.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, Result};
use crate::reasoning::json::extract_json;
use crate::reasoning::{
    clip, IterationRecord, ReasoningEngine, ReasoningTrace, StopReason, EMPTY_RESULT_APOLOGY,
};

/// Placeholder referencing an earlier step's result inside `args`.
static STEP_RESULT_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{step_(\d+)_result\}").expect("static pattern"));

// ---------------------------------------------------------------------------
// Plan shapes
// ---------------------------------------------------------------------------

/// Model-produced task analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskAnalysis {
    pub task_type: String,
    pub complexity: String,
    pub requires_tools: bool,
    pub multi_step: bool,
    pub core_requirements: Vec<String>,
    pub suggested_tools: Vec<String>,
    pub estimated_steps: u32,
    pub challenges: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl Default for TaskAnalysis {
    fn default() -> Self {
        Self {
            task_type: "general".to_string(),
            complexity: "medium".to_string(),
            requires_tools: false,
            multi_step: false,
            core_requirements: Vec::new(),
            suggested_tools: Vec::new(),
            estimated_steps: 1,
            challenges: Vec::new(),
            success_criteria: Vec::new(),
        }
    }
}

/// What a plan step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Invoke a registered tool.
    ToolCall,
    /// Dedicated model reasoning over prior results.
    Reasoning,
    /// Integrate prior results into a user-facing answer.
    Synthesis,
}

impl Default for StepType {
    fn default() -> Self {
        StepType::Reasoning
    }
}

/// One planned step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub step_number: u32,
    #[serde(default)]
    pub step_name: String,
    #[serde(rename = "type", default)]
    pub step_type: StepType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub dependencies: Vec<u32>,
    #[serde(default)]
    pub fallback_options: Vec<String>,
}

/// The whole plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Enforce the dependency rule: every dependency must reference a
    /// strictly earlier step number.
    pub fn validate(&self) -> Result<()> {
        for step in &self.steps {
            for &dep in &step.dependencies {
                if dep >= step.step_number {
                    return Err(AgentError::InvalidPlan(format!(
                        "step {} depends on step {}, which is not an earlier step",
                        step.step_number, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of one executed step.
struct StepOutcome {
    success: bool,
    content: Value,
    note: String,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

impl ReasoningEngine {
    /// Run the four-phase Plan-and-Solve pipeline.
    pub(crate) async fn run_plan_solve(
        &self,
        input: &str,
        context: &Value,
        cancel: &CancellationToken,
    ) -> Result<ReasoningTrace> {
        let started_at = chrono::Utc::now();

        // Phase 1: analyze (parse failures fall back to a heuristic).
        let analysis = self.analyze(input, context, cancel).await?;
        log::debug!(
            "task analysis: type={}, steps={}, tools={:?}",
            analysis.task_type,
            analysis.estimated_steps,
            analysis.suggested_tools
        );

        // Phase 2: plan (parse or validation failure aborts the run).
        let plan = self.plan(input, &analysis, cancel).await?;

        // Phase 3: execute in declared order.
        let (iterations, results, last_synthesis, last_success) =
            self.execute_steps(input, &plan, cancel).await?;

        // Phase 4: evaluate.
        let final_answer = pick_final_answer(&results, last_synthesis, last_success);
        self.quality_scorecard(input, &final_answer, cancel).await;

        Ok(ReasoningTrace {
            task: input.to_string(),
            mode: crate::config::ThinkingMode::PlanSolve,
            iterations,
            final_answer: Some(final_answer),
            started_at,
            ended_at: chrono::Utc::now(),
            stop_reason: StopReason::PlanCompleted,
        })
    }

    async fn analyze(
        &self,
        input: &str,
        context: &Value,
        cancel: &CancellationToken,
    ) -> Result<TaskAnalysis> {
        let prompt = format!(
            "Analyze the following task before planning.\n\
             Task: {input}\n\
             Context: {context}\n\
             Respond with a single JSON object:\n\
             {{\"taskType\": \"...\", \"complexity\": \"low|medium|high\", \
             \"requiresTools\": true, \"multiStep\": true, \
             \"coreRequirements\": [], \"suggestedTools\": [], \
             \"estimatedSteps\": 1, \"challenges\": [], \"successCriteria\": []}}",
            input = input,
            context = if context.is_null() {
                "(none)".to_string()
            } else {
                context.to_string()
            },
        );

        let generation = match self
            .call_llm_with_retry(&prompt, &self.default_opts(), cancel)
            .await
        {
            Ok(gen) => gen,
            Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
            Err(e) => {
                log::warn!("analysis call failed ({}), using heuristic analysis", e);
                return Ok(self.default_analysis(input).await);
            }
        };

        match extract_json(&generation.content)
            .and_then(|v| {
                serde_json::from_value::<TaskAnalysis>(v)
                    .map_err(|e| AgentError::Unparsable(e.to_string()))
            }) {
            Ok(analysis) => Ok(analysis),
            Err(_) => {
                log::debug!("analysis output unparseable, synthesizing default");
                Ok(self.default_analysis(input).await)
            }
        }
    }

    /// Keyword-heuristic analysis used when the model output cannot be
    /// parsed.
    async fn default_analysis(&self, input: &str) -> TaskAnalysis {
        let lower = input.to_lowercase();
        let task_type = if ["calculate", "compute", "计算"]
            .iter()
            .any(|k| lower.contains(k))
        {
            "computation"
        } else if ["search", "find", "lookup", "查询", "搜索"]
            .iter()
            .any(|k| lower.contains(k))
        {
            "research"
        } else if ["report", "summarize", "analyze", "分析"]
            .iter()
            .any(|k| lower.contains(k))
        {
            "analysis"
        } else {
            "general"
        };

        let candidates = self.registry.list().await;
        let suggested_tools: Vec<String> = self
            .selector
            .select(input, &candidates)
            .into_iter()
            .map(|r| r.tool.id.clone())
            .collect();

        let multi_step =
            lower.contains(" and ") || lower.contains("然后") || input.chars().count() > 120;

        TaskAnalysis {
            task_type: task_type.to_string(),
            requires_tools: !suggested_tools.is_empty(),
            multi_step,
            estimated_steps: if multi_step { 3 } else { 1 },
            suggested_tools,
            ..Default::default()
        }
    }

    async fn plan(
        &self,
        input: &str,
        analysis: &TaskAnalysis,
        cancel: &CancellationToken,
    ) -> Result<ExecutionPlan> {
        let catalog = self.tool_catalog_block().await;
        let prompt = format!(
            "Create an execution plan for the task.\n\
             Task: {input}\n\
             Analysis: {analysis}\n\
             Available tools:\n{catalog}\n\
             Respond with a single JSON object:\n\
             {{\"steps\": [{{\"stepNumber\": 1, \"stepName\": \"...\", \
             \"type\": \"tool_call|reasoning|synthesis\", \"description\": \"...\", \
             \"tool\": \"tool id or null\", \"args\": {{}}, \
             \"expectedOutput\": \"...\", \"dependencies\": [], \
             \"fallbackOptions\": []}}]}}\n\
             A step may reference an earlier result with the placeholder \
             {{step_N_result}} inside its args. Dependencies must list earlier \
             step numbers only. End with one synthesis step.",
            input = input,
            analysis = serde_json::to_string(analysis).unwrap_or_default(),
            catalog = catalog,
        );

        let generation = self
            .call_llm_with_retry(&prompt, &self.default_opts(), cancel)
            .await?;

        let value = extract_json(&generation.content)
            .map_err(|_| AgentError::UnparsablePlan(clip(&generation.content, 120)))?;
        let plan: ExecutionPlan = serde_json::from_value(value)
            .map_err(|e| AgentError::UnparsablePlan(e.to_string()))?;
        if plan.steps.is_empty() {
            return Err(AgentError::UnparsablePlan("plan has no steps".into()));
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Execute the plan steps in declared order.
    ///
    /// Returns the step records, the per-step result map, the content of
    /// the last successful synthesis step, and the content of the last
    /// successful step of any type.
    async fn execute_steps(
        &self,
        input: &str,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<(
        Vec<IterationRecord>,
        HashMap<u32, Value>,
        Option<String>,
        Option<String>,
    )> {
        let mut iterations = Vec::new();
        let mut results: HashMap<u32, Value> = HashMap::new();
        let mut last_synthesis: Option<String> = None;
        let mut last_success: Option<String> = None;

        for step in &plan.steps {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let outcome = self.execute_one_step(input, step, &results, cancel).await?;

            if outcome.success {
                results.insert(step.step_number, outcome.content.clone());
                let text = value_text(&outcome.content);
                if step.step_type == StepType::Synthesis {
                    last_synthesis = Some(text.clone());
                }
                last_success = Some(text);
            } else {
                log::warn!(
                    "step {} '{}' failed: {}",
                    step.step_number,
                    step.step_name,
                    outcome.note
                );
            }

            iterations.push(IterationRecord {
                thought: format!(
                    "step {} ({}): {}",
                    step.step_number,
                    step.step_name,
                    step.description
                ),
                action: step.tool.clone(),
                args: step.args.clone(),
                observation: Some(if outcome.success {
                    clip(&value_text(&outcome.content), 2000)
                } else {
                    format!("error: {}", outcome.note)
                }),
            });
        }

        Ok((iterations, results, last_synthesis, last_success))
    }

    async fn execute_one_step(
        &self,
        input: &str,
        step: &PlanStep,
        results: &HashMap<u32, Value>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        // Unmet declared dependencies are a soft failure of this step.
        for &dep in &step.dependencies {
            if !results.contains_key(&dep) {
                let err = AgentError::UnmetDependency {
                    step: step.step_number,
                    dependency: dep,
                };
                return Ok(self.soft_failure(step, err.to_string()));
            }
        }

        let args = step
            .args
            .as_ref()
            .map(|a| substitute_placeholders(a, results))
            .unwrap_or(Value::Null);

        let result = match step.step_type {
            StepType::ToolCall => {
                let Some(tool) = step.tool.as_deref().filter(|t| !t.is_empty()) else {
                    return Ok(self.soft_failure(step, "no tool specified".to_string()));
                };
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    result = self.execute_tool_tracked(tool, args) => result,
                }
            }
            StepType::Reasoning => self.reasoning_step(input, step, results, cancel).await,
            StepType::Synthesis => self
                .synthesis_step(input, step, results, cancel)
                .await
                .map(Value::String),
        };

        match result {
            Ok(content) => Ok(StepOutcome {
                success: true,
                content,
                note: String::new(),
            }),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => Ok(self.soft_failure(step, e.to_string())),
        }
    }

    fn soft_failure(&self, step: &PlanStep, note: String) -> StepOutcome {
        let note = match step.fallback_options.first() {
            Some(fallback) => format!("{} (fallback available: {})", note, fallback),
            None => note,
        };
        StepOutcome {
            success: false,
            content: Value::Null,
            note,
        }
    }

    async fn reasoning_step(
        &self,
        input: &str,
        step: &PlanStep,
        results: &HashMap<u32, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let prompt = format!(
            "You are executing one reasoning step of a larger plan.\n\
             Task: {input}\n\
             Step: {name} - {description}\n\
             Prior results: {results}\n\
             Respond with a single JSON object:\n\
             {{\"reasoning\": \"...\", \"insights\": [], \"conclusion\": \"...\", \
             \"confidence\": 0.0, \"supporting_evidence\": []}}",
            input = input,
            name = step.step_name,
            description = step.description,
            results = render_results(results),
        );
        let generation = self
            .call_llm_with_retry(&prompt, &self.default_opts(), cancel)
            .await?;
        // Lenient: an unparseable reasoning step still contributes its raw
        // text as the step result.
        Ok(extract_json(&generation.content)
            .unwrap_or(Value::String(generation.content)))
    }

    async fn synthesis_step(
        &self,
        input: &str,
        step: &PlanStep,
        results: &HashMap<u32, Value>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Integrate the results below into a final answer for the user.\n\
             Task: {input}\n\
             Step: {name} - {description}\n\
             Results: {results}\n\
             Answer directly and concretely; do not mention the plan.",
            input = input,
            name = step.step_name,
            description = step.description,
            results = render_results(results),
        );
        let generation = self
            .call_llm_with_retry(&prompt, &self.default_opts(), cancel)
            .await?;
        Ok(generation.content)
    }

    /// Ask the model for a quality scorecard; failures default silently.
    async fn quality_scorecard(&self, input: &str, answer: &str, cancel: &CancellationToken) {
        let prompt = format!(
            "Rate the answer below for the task on a 0..1 scale.\n\
             Task: {input}\n\
             Answer: {answer}\n\
             Respond with JSON: {{\"score\": 0.0, \"strengths\": [], \"weaknesses\": []}}",
            input = input,
            answer = clip(answer, 1500),
        );
        let scorecard = match self
            .call_llm(&prompt, &self.default_opts(), cancel)
            .await
        {
            Ok(gen) => extract_json(&gen.content)
                .unwrap_or_else(|_| serde_json::json!({ "score": 0.5 })),
            Err(_) => serde_json::json!({ "score": 0.5 }),
        };
        log::debug!(
            "quality scorecard: {}",
            scorecard.get("score").cloned().unwrap_or_default()
        );
    }
}

/// Final-answer preference: last successful synthesis, else last
/// successful step, else concatenated partials, else a fixed apology.
fn pick_final_answer(
    results: &HashMap<u32, Value>,
    last_synthesis: Option<String>,
    last_success: Option<String>,
) -> String {
    if let Some(answer) = last_synthesis {
        return answer;
    }
    if let Some(answer) = last_success {
        return answer;
    }
    if !results.is_empty() {
        let mut keys: Vec<&u32> = results.keys().collect();
        keys.sort();
        return keys
            .into_iter()
            .map(|k| value_text(&results[k]))
            .collect::<Vec<_>>()
            .join("\n\n");
    }
    EMPTY_RESULT_APOLOGY.to_string()
}

/// Replace `{step_N_result}` placeholders inside string leaves with the
/// JSON serialization of the stored result. Placeholders referencing steps
/// with no entry in the result map are left untouched.
fn substitute_placeholders(args: &Value, results: &HashMap<u32, Value>) -> Value {
    match args {
        Value::String(s) => {
            let replaced = STEP_RESULT_PLACEHOLDER.replace_all(s, |caps: &regex::Captures| {
                let n: u32 = caps[1].parse().unwrap_or(0);
                match results.get(&n) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_placeholders(v, results))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_placeholders(v, results)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_results(results: &HashMap<u32, Value>) -> String {
    if results.is_empty() {
        return "(none yet)".to_string();
    }
    let mut keys: Vec<&u32> = results.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("step {}: {}", k, clip(&results[k].to_string(), 500)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedBackend;
    use crate::memory::MemoryStore;
    use crate::reasoning::{ReasoningConfig, ReasoningEngine};
    use crate::tools::{ParamKind, ToolDescriptor, ToolParam, ToolRegistry};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(replies: Vec<String>, registry: Arc<ToolRegistry>) -> ReasoningEngine {
        ReasoningEngine::new(
            Arc::new(ScriptedBackend::new(replies)),
            registry,
            Arc::new(MemoryStore::new(Duration::from_secs(3600), 100)),
            ReasoningConfig {
                retry_attempts: 1,
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    fn lookup_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "lookup",
            "looks up a record by key",
            crate::tools::tool_fn(|args| async move {
                Ok(json!({
                    "found": format!("record for {}", args["key"].as_str().unwrap_or("?"))
                }))
            }),
        )
        .with_params(vec![ToolParam::required("key", ParamKind::String)])
    }

    fn analysis_reply() -> String {
        json!({
            "taskType": "research",
            "complexity": "low",
            "requiresTools": true,
            "multiStep": true,
            "coreRequirements": ["find the record"],
            "suggestedTools": ["lookup"],
            "estimatedSteps": 2,
            "challenges": [],
            "successCriteria": ["record found"]
        })
        .to_string()
    }

    #[test]
    fn test_plan_validate_rejects_forward_reference() {
        let plan = ExecutionPlan {
            steps: vec![
                PlanStep {
                    step_number: 1,
                    step_name: "first".into(),
                    step_type: StepType::Reasoning,
                    description: String::new(),
                    tool: None,
                    args: None,
                    expected_output: String::new(),
                    dependencies: vec![2],
                    fallback_options: vec![],
                },
                PlanStep {
                    step_number: 2,
                    step_name: "second".into(),
                    step_type: StepType::Synthesis,
                    description: String::new(),
                    tool: None,
                    args: None,
                    expected_output: String::new(),
                    dependencies: vec![],
                    fallback_options: vec![],
                },
            ],
        };
        assert!(matches!(
            plan.validate().unwrap_err(),
            AgentError::InvalidPlan(_)
        ));
    }

    #[test]
    fn test_plan_validate_rejects_self_reference() {
        let plan = ExecutionPlan {
            steps: vec![PlanStep {
                step_number: 1,
                step_name: "loop".into(),
                step_type: StepType::Reasoning,
                description: String::new(),
                tool: None,
                args: None,
                expected_output: String::new(),
                dependencies: vec![1],
                fallback_options: vec![],
            }],
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_substitute_placeholders() {
        let mut results = HashMap::new();
        results.insert(1, json!({"found": "alpha"}));

        let args = json!({
            "query": "use {step_1_result} here",
            "nested": { "again": "{step_1_result}" },
            "missing": "{step_9_result}",
            "untouched": 7
        });
        let out = substitute_placeholders(&args, &results);
        assert!(out["query"]
            .as_str()
            .unwrap()
            .contains("{\"found\":\"alpha\"}"));
        assert!(out["nested"]["again"].as_str().unwrap().contains("alpha"));
        assert_eq!(out["missing"], "{step_9_result}");
        assert_eq!(out["untouched"], 7);
    }

    #[test]
    fn test_pick_final_answer_preference() {
        let mut results = HashMap::new();
        results.insert(1, json!("partial one"));
        results.insert(2, json!("partial two"));

        assert_eq!(
            pick_final_answer(&results, Some("synth".into()), Some("last".into())),
            "synth"
        );
        assert_eq!(
            pick_final_answer(&results, None, Some("last".into())),
            "last"
        );
        let concat = pick_final_answer(&results, None, None);
        assert!(concat.contains("partial one"));
        assert!(concat.contains("partial two"));
        assert_eq!(
            pick_final_answer(&HashMap::new(), None, None),
            EMPTY_RESULT_APOLOGY
        );
    }

    #[tokio::test]
    async fn test_full_pipeline_with_tool_and_synthesis() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool()).await.unwrap();

        let plan_reply = json!({
            "steps": [
                {
                    "stepNumber": 1,
                    "stepName": "fetch",
                    "type": "tool_call",
                    "description": "look up the record",
                    "tool": "lookup",
                    "args": {"key": "alpha"},
                    "expectedOutput": "the record",
                    "dependencies": [],
                    "fallbackOptions": []
                },
                {
                    "stepNumber": 2,
                    "stepName": "summarize",
                    "type": "synthesis",
                    "description": "summarize the record",
                    "tool": null,
                    "args": {"source": "{step_1_result}"},
                    "expectedOutput": "summary",
                    "dependencies": [1],
                    "fallbackOptions": []
                }
            ]
        })
        .to_string();

        let replies = vec![
            analysis_reply(),
            plan_reply,
            "The record for alpha was found and is in good shape.".to_string(),
        ];
        let engine = engine(replies, registry);
        let trace = engine
            .run_plan_solve("find the alpha record", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(trace.iterations.len(), 2);
        assert_eq!(trace.stop_reason, StopReason::PlanCompleted);
        assert_eq!(
            trace.final_answer.as_deref(),
            Some("The record for alpha was found and is in good shape.")
        );
        // The tool step observation carries the tool result.
        assert!(trace.iterations[0]
            .observation
            .as_ref()
            .unwrap()
            .contains("record for alpha"));
    }

    #[tokio::test]
    async fn test_unparsable_plan_aborts() {
        let registry = Arc::new(ToolRegistry::new());
        let replies = vec![
            analysis_reply(),
            "I would rather describe the plan in prose.".to_string(),
        ];
        let engine = engine(replies, registry);
        let err = engine
            .run_plan_solve("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnparsablePlan(_)));
    }

    #[tokio::test]
    async fn test_forward_dependency_aborts() {
        let registry = Arc::new(ToolRegistry::new());
        let plan_reply = json!({
            "steps": [{
                "stepNumber": 1,
                "stepName": "bad",
                "type": "reasoning",
                "description": "depends on the future",
                "dependencies": [3]
            }]
        })
        .to_string();
        let engine = engine(vec![analysis_reply(), plan_reply], registry);
        let err = engine
            .run_plan_solve("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_unmet_dependency_is_soft() {
        let registry = Arc::new(ToolRegistry::new());
        // Step 1 fails (tool not registered); step 2 depends on it.
        let plan_reply = json!({
            "steps": [
                {
                    "stepNumber": 1,
                    "stepName": "fetch",
                    "type": "tool_call",
                    "tool": "missing_tool",
                    "args": {},
                    "dependencies": []
                },
                {
                    "stepNumber": 2,
                    "stepName": "analyze",
                    "type": "reasoning",
                    "dependencies": [1]
                }
            ]
        })
        .to_string();
        let engine = engine(vec![analysis_reply(), plan_reply], registry);
        let trace = engine
            .run_plan_solve("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(trace.iterations.len(), 2);
        assert!(trace.iterations[0]
            .observation
            .as_ref()
            .unwrap()
            .starts_with("error:"));
        assert!(trace.iterations[1]
            .observation
            .as_ref()
            .unwrap()
            .contains("depends on step 1"));
        // Nothing succeeded, so the apology lands.
        assert_eq!(trace.final_answer.as_deref(), Some(EMPTY_RESULT_APOLOGY));
    }

    #[tokio::test]
    async fn test_fallback_noted_on_failure() {
        let registry = Arc::new(ToolRegistry::new());
        let plan_reply = json!({
            "steps": [{
                "stepNumber": 1,
                "stepName": "fetch",
                "type": "tool_call",
                "tool": "missing_tool",
                "args": {},
                "dependencies": [],
                "fallbackOptions": ["answer from general knowledge"]
            }]
        })
        .to_string();
        let engine = engine(vec![analysis_reply(), plan_reply], registry);
        let trace = engine
            .run_plan_solve("task", &Value::Null, &CancellationToken::new())
            .await
            .unwrap();
        assert!(trace.iterations[0]
            .observation
            .as_ref()
            .unwrap()
            .contains("fallback available"));
    }

    #[tokio::test]
    async fn test_analysis_parse_failure_uses_heuristic() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool()).await.unwrap();

        let plan_reply = json!({
            "steps": [{
                "stepNumber": 1,
                "stepName": "answer",
                "type": "synthesis",
                "dependencies": []
            }]
        })
        .to_string();
        let replies = vec![
            "definitely not json".to_string(),
            plan_reply,
            "synthesized answer".to_string(),
        ];
        let engine = engine(replies, registry);
        let trace = engine
            .run_plan_solve(
                "please lookup the alpha record",
                &Value::Null,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(trace.final_answer.as_deref(), Some("synthesized answer"));
    }

    #[tokio::test]
    async fn test_default_analysis_keywords() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(lookup_tool()).await.unwrap();
        let engine = engine(vec![], registry);

        let analysis = engine.default_analysis("calculate the total").await;
        assert_eq!(analysis.task_type, "computation");

        let analysis = engine.default_analysis("search for recent papers").await;
        assert_eq!(analysis.task_type, "research");

        let analysis = engine
            .default_analysis("please lookup the record by key")
            .await;
        assert!(analysis.requires_tools);
        assert_eq!(analysis.suggested_tools, vec!["lookup".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_during_execution() {
        let registry = Arc::new(ToolRegistry::new());
        let plan_reply = json!({
            "steps": [{
                "stepNumber": 1,
                "stepName": "think",
                "type": "reasoning",
                "dependencies": []
            }]
        })
        .to_string();
        let engine = engine(vec![analysis_reply(), plan_reply], registry);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .run_plan_solve("task", &Value::Null, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
