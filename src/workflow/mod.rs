//! The universal agent: a fixed four-phase research pipeline.
//!
//! Instead of free-form reasoning, this agent always runs
//! plan → search → analyze → report. The plan names search keywords and
//! topics; every one of them is fed through a single registered
//! search-and-analyze tool; the collected results are compacted and turned
//! into a structured analysis, and finally a Markdown report. The current
//! phase is externally observable for progress reporting.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, Result};
use crate::llm::{GenerateOptions, LlmBackend};
use crate::memory::{MemoryKind, MemoryStore};
use crate::reasoning::json::extract_json;
use crate::tools::ToolRegistry;

/// Per-query result cap carried into the analysis phase.
const TOP_RESULTS_PER_QUERY: usize = 3;

/// Snippet clip length for compacted search results.
const SNIPPET_CLIP: usize = 400;

// ---------------------------------------------------------------------------
// Phases and plan shapes
// ---------------------------------------------------------------------------

/// Externally observable pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Searching,
    Analyzing,
    Reporting,
    Completed,
    Error,
}

/// Report skeleton produced by the planning phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReportStructure {
    pub sections: Vec<String>,
    pub key_points: Vec<String>,
}

/// The workflow plan the model is asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowPlan {
    pub task_objective: String,
    pub search_keywords: Vec<String>,
    pub search_topics: Vec<String>,
    pub analysis_focus: Vec<String>,
    pub report_structure: ReportStructure,
    pub estimated_steps: u32,
}

/// One search invocation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRecord {
    /// The query that was run.
    pub task: String,
    /// Tool result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the query ran.
    pub timestamp: chrono::DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UniversalAgent
// ---------------------------------------------------------------------------

/// Fixed-pipeline agent for research-and-report tasks.
pub struct UniversalAgent {
    llm: Arc<dyn LlmBackend>,
    registry: Arc<ToolRegistry>,
    memory: Arc<MemoryStore>,
    /// Id of the registered search-and-analyze tool the search phase uses.
    search_tool: String,
    phase: RwLock<WorkflowPhase>,
}

impl UniversalAgent {
    /// Create a universal agent using `search_tool` for its search phase.
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        registry: Arc<ToolRegistry>,
        memory: Arc<MemoryStore>,
        search_tool: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            registry,
            memory,
            search_tool: search_tool.into(),
            phase: RwLock::new(WorkflowPhase::Planning),
        }
    }

    /// The phase the pipeline is currently in.
    pub fn phase(&self) -> WorkflowPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: WorkflowPhase) {
        log::debug!("workflow phase: {:?}", phase);
        *self.phase.write() = phase;
    }

    /// Run the whole pipeline and return the final Markdown report.
    pub async fn run(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        let result = self.run_inner(task, cancel).await;
        if result.is_err() {
            self.set_phase(WorkflowPhase::Error);
        }
        result
    }

    async fn run_inner(&self, task: &str, cancel: &CancellationToken) -> Result<String> {
        self.set_phase(WorkflowPhase::Planning);
        let plan = self.plan(task, cancel).await?;

        self.set_phase(WorkflowPhase::Searching);
        let records = self.search(&plan, cancel).await?;

        self.set_phase(WorkflowPhase::Analyzing);
        let analysis = self.analyze(task, &plan, &records, cancel).await?;

        self.set_phase(WorkflowPhase::Reporting);
        let report = self.report(task, &plan, &analysis, cancel).await?;

        self.memory
            .add(
                MemoryKind::Task,
                json!({
                    "text": task,
                    "objective": plan.task_objective,
                    "queries": records.len(),
                    "report": report,
                }),
            )
            .await;

        self.set_phase(WorkflowPhase::Completed);
        Ok(report)
    }

    async fn call_llm(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let opts = GenerateOptions {
            temperature: Some(0.3),
            max_tokens: Some(4096),
            ..Default::default()
        };
        let gen = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.llm.generate(prompt, &opts) => result?,
        };
        Ok(gen.content)
    }

    // -----------------------------------------------------------------------
    // Phase 1: plan
    // -----------------------------------------------------------------------

    async fn plan(&self, task: &str, cancel: &CancellationToken) -> Result<WorkflowPlan> {
        let prompt = format!(
            "Plan a research workflow for the task below.\n\
             Task: {task}\n\
             Respond with a single JSON object:\n\
             {{\"taskObjective\": \"...\", \"searchKeywords\": [\"...\"], \
             \"searchTopics\": [\"...\"], \"analysisFocus\": [\"...\"], \
             \"reportStructure\": {{\"sections\": [\"...\"], \"keyPoints\": [\"...\"]}}, \
             \"estimatedSteps\": 4}}",
            task = task,
        );
        let content = self.call_llm(&prompt, cancel).await?;

        // Fenced markers and prose are tolerated; anything beyond that is
        // a hard planning failure.
        let value = extract_json(&content)
            .map_err(|_| AgentError::UnparsablePlan("workflow plan was not JSON".into()))?;
        let plan: WorkflowPlan = serde_json::from_value(value)
            .map_err(|e| AgentError::UnparsablePlan(e.to_string()))?;
        if plan.search_keywords.is_empty() && plan.search_topics.is_empty() {
            return Err(AgentError::UnparsablePlan(
                "workflow plan names no keywords or topics".into(),
            ));
        }
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Phase 2: search
    // -----------------------------------------------------------------------

    /// Run one search per keyword and per topic. Individual tool failures
    /// are recorded, never propagated.
    async fn search(
        &self,
        plan: &WorkflowPlan,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchRecord>> {
        let queries: Vec<&String> = plan
            .search_keywords
            .iter()
            .chain(plan.search_topics.iter())
            .collect();

        let mut records = Vec::with_capacity(queries.len());
        for query in queries {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let outcome = self
                .registry
                .execute(&self.search_tool, json!({ "query": query }))
                .await;
            records.push(match outcome {
                Ok(result) => SearchRecord {
                    task: query.clone(),
                    result: Some(result),
                    error: None,
                    timestamp: Utc::now(),
                },
                Err(e) => {
                    log::warn!("search query '{}' failed: {}", query, e);
                    SearchRecord {
                        task: query.clone(),
                        result: None,
                        error: Some(e.to_string()),
                        timestamp: Utc::now(),
                    }
                }
            });
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Phase 3: analyze
    // -----------------------------------------------------------------------

    async fn analyze(
        &self,
        task: &str,
        plan: &WorkflowPlan,
        records: &[SearchRecord],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let compacted = compact_results(records);
        let prompt = format!(
            "Analyze the collected research results.\n\
             Task: {task}\n\
             Analysis focus: {focus}\n\
             Results:\n{results}\n\
             Produce a structured analysis covering each focus point, noting \
             gaps where the searches returned nothing.",
            task = task,
            focus = plan.analysis_focus.join(", "),
            results = compacted,
        );
        self.call_llm(&prompt, cancel).await
    }

    // -----------------------------------------------------------------------
    // Phase 4: report
    // -----------------------------------------------------------------------

    async fn report(
        &self,
        task: &str,
        plan: &WorkflowPlan,
        analysis: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Write the final Markdown report.\n\
             Task: {task}\n\
             Sections: {sections}\n\
             Key points to cover: {key_points}\n\
             Analysis:\n{analysis}\n\
             Output only the report, in Markdown, using the sections above.",
            task = task,
            sections = plan.report_structure.sections.join(", "),
            key_points = plan.report_structure.key_points.join(", "),
            analysis = analysis,
        );
        self.call_llm(&prompt, cancel).await
    }
}

/// Compact successful search results into a bounded prompt block: top
/// results per query with clipped snippets.
fn compact_results(records: &[SearchRecord]) -> String {
    if records.is_empty() {
        return "(no searches were run)".to_string();
    }
    records
        .iter()
        .map(|record| {
            let body = match (&record.result, &record.error) {
                (Some(result), _) => {
                    let items = match result.get("results").and_then(|r| r.as_array()) {
                        Some(items) => items
                            .iter()
                            .take(TOP_RESULTS_PER_QUERY)
                            .map(|i| clip_snippet(&i.to_string()))
                            .collect::<Vec<_>>()
                            .join("\n  "),
                        None => clip_snippet(&result.to_string()),
                    };
                    format!("  {}", items)
                }
                (None, Some(error)) => format!("  (failed: {})", error),
                (None, None) => "  (no result)".to_string(),
            };
            format!("- query: {}\n{}", record.task, body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clip_snippet(s: &str) -> String {
    if s.chars().count() <= SNIPPET_CLIP {
        s.to_string()
    } else {
        let cut: String = s.chars().take(SNIPPET_CLIP).collect();
        format!("{}...", cut)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
