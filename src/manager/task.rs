//! Collaborative tasks: decomposition, assignments, and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a collaborative task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet executed.
    Pending,
    /// Subtasks are running.
    InProgress,
    /// At least one assignment succeeded.
    Completed,
    /// No assignment succeeded.
    Failed,
}

/// State of one subtask assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Bound to an agent, not started.
    Assigned,
    /// The agent is working on it.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl AssignmentStatus {
    /// Whether the assignment has finished either way.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Succeeded | AssignmentStatus::Failed)
    }
}

/// One generated subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique subtask id.
    pub id: Uuid,
    /// Phase label (analysis, execution, integration).
    pub phase: String,
    /// Full prompt handed to the assigned agent.
    pub description: String,
}

/// Binding of one subtask to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// The subtask being worked.
    pub subtask_id: Uuid,
    /// The agent working it.
    pub agent_id: Uuid,
    /// Current state.
    pub status: AssignmentStatus,
    /// Result text on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result record of one finished subtask, as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: Uuid,
    pub agent_id: Uuid,
    pub phase: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated outcome of one collaborative task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub description: String,
    pub subtask_results: Vec<SubtaskResult>,
    /// `executed N subtasks, X succeeded, Y failed`
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Options for task creation.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Scheduling priority (higher runs first when queued).
    pub priority: i32,
    /// Optional completion deadline.
    pub deadline: Option<DateTime<Utc>>,
}

/// One collaborative task tracked by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborativeTask {
    pub id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    pub subtasks: Vec<Subtask>,
    pub assignments: Vec<Assignment>,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollaborativeTask {
    /// Create a pending task.
    pub fn new(description: impl Into<String>, opts: TaskOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            status: TaskStatus::Pending,
            subtasks: Vec::new(),
            assignments: Vec::new(),
            priority: opts.priority,
            deadline: opts.deadline,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Default three-way decomposition: analysis, execution, integration.
pub fn default_decomposition(description: &str) -> Vec<Subtask> {
    let phases = [
        (
            "analysis",
            format!(
                "Analyze the following task and identify what is needed to complete it: {}",
                description
            ),
        ),
        (
            "execution",
            format!("Carry out the core work of the following task: {}", description),
        ),
        (
            "integration",
            format!(
                "Integrate the partial results into a coherent final deliverable for: {}",
                description
            ),
        ),
    ];
    phases
        .into_iter()
        .map(|(phase, description)| Subtask {
            id: Uuid::new_v4(),
            phase: phase.to_string(),
            description,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
