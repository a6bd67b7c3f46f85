//! Multi-agent coordination: registration, collaborative tasks, messages.
//!
//! The manager owns the agent table and drives cross-agent work in
//! parallel: a collaborative task is decomposed into subtasks, assigned
//! round-robin to idle agents, and every assignment runs concurrently;
//! individual failures land in their assignment without aborting the rest.
//! A task is `completed` when every assignment is terminal and at least
//! one succeeded, with the failure count reported in the summary.

pub mod message;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::Agent;
use crate::errors::{AgentError, Result};

pub use message::{Message, MessageKind, MessageStatus};
pub use task::{
    default_decomposition, Assignment, AssignmentStatus, CollaborativeTask, SubtaskResult,
    TaskOptions, TaskResult, TaskStatus,
};

/// Default cap on registered agents.
pub const DEFAULT_MAX_AGENTS: usize = 10;

/// Cap on retained per-agent communication history.
const COMM_HISTORY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Agent records
// ---------------------------------------------------------------------------

/// Scheduling state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Free to take assignments.
    Idle,
    /// Working an assignment.
    Busy,
    /// Not accepting work.
    Offline,
}

/// Bookkeeping the manager keeps per agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub id: Uuid,
    pub role: String,
    pub status: AgentStatus,
    /// Tool ids plus reasoning mode, snapshotted at registration.
    pub capabilities: Vec<String>,
    pub current_assignment: Option<Uuid>,
    pub task_history: Vec<Uuid>,
    pub comm_history: Vec<Message>,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

struct RegisteredAgent {
    agent: Arc<Agent>,
    record: AgentRecord,
}

/// Manager statistics surface.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub agents: usize,
    pub idle_agents: usize,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
}

// ---------------------------------------------------------------------------
// AgentManager
// ---------------------------------------------------------------------------

/// Registry and coordinator for a set of collaborating agents.
pub struct AgentManager {
    agents: RwLock<HashMap<Uuid, RegisteredAgent>>,
    tasks: RwLock<HashMap<Uuid, CollaborativeTask>>,
    max_agents: usize,
}

impl AgentManager {
    /// Create a manager admitting at most `max_agents` agents.
    pub fn new(max_agents: usize) -> Arc<Self> {
        Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            max_agents: max_agents.max(1),
        })
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register an agent under a role. Returns the agent's id.
    pub async fn register(self: &Arc<Self>, agent: Arc<Agent>, role: &str) -> Result<Uuid> {
        let id = agent.id();
        let capabilities = agent.capabilities().await;
        {
            let mut agents = self.agents.write().await;
            if agents.len() >= self.max_agents {
                return Err(AgentError::AgentLimit(self.max_agents));
            }
            if agents.contains_key(&id) {
                return Err(AgentError::DuplicateAgent(id.to_string()));
            }
            let now = Utc::now();
            agents.insert(
                id,
                RegisteredAgent {
                    agent: agent.clone(),
                    record: AgentRecord {
                        id,
                        role: role.to_string(),
                        status: AgentStatus::Idle,
                        capabilities,
                        current_assignment: None,
                        task_history: Vec::new(),
                        comm_history: Vec::new(),
                        registered_at: now,
                        last_activity: now,
                    },
                },
            );
        }
        agent.enable_collaboration(self).await;
        log::info!("registered agent {} as '{}'", id, role);
        Ok(id)
    }

    /// Remove an agent from the table.
    pub async fn unregister(&self, id: Uuid) -> Result<()> {
        let mut agents = self.agents.write().await;
        agents
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AgentError::UnknownAgent(id.to_string()))
    }

    /// Number of registered agents.
    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Snapshot of one agent's record.
    pub async fn agent_record(&self, id: Uuid) -> Option<AgentRecord> {
        self.agents.read().await.get(&id).map(|r| r.record.clone())
    }

    /// Ids of currently idle agents, in registration-stable order.
    async fn idle_agents(&self) -> Vec<Uuid> {
        let agents = self.agents.read().await;
        let mut idle: Vec<(DateTime<Utc>, Uuid)> = agents
            .values()
            .filter(|r| r.record.status == AgentStatus::Idle)
            .map(|r| (r.record.registered_at, r.record.id))
            .collect();
        idle.sort();
        idle.into_iter().map(|(_, id)| id).collect()
    }

    async fn set_status(&self, id: Uuid, status: AgentStatus, assignment: Option<Uuid>) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(&id) {
            entry.record.status = status;
            entry.record.current_assignment = assignment;
            entry.record.last_activity = Utc::now();
        }
    }

    // -----------------------------------------------------------------------
    // Collaborative tasks
    // -----------------------------------------------------------------------

    /// Create a pending task. Returns its id.
    pub async fn create_task(&self, description: &str, opts: TaskOptions) -> Uuid {
        let task = CollaborativeTask::new(description, opts);
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        id
    }

    /// Snapshot of one task.
    pub async fn task(&self, id: Uuid) -> Result<CollaborativeTask> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))
    }

    /// Execute a task: decompose, assign round-robin to idle agents, run
    /// all assignments in parallel, and integrate the results.
    pub async fn execute_task(self: &Arc<Self>, task_id: Uuid) -> Result<TaskResult> {
        // Decompose and mark in progress.
        let (description, subtasks) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(&task_id)
                .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::InProgress;
            task.started_at = Some(Utc::now());
            task.subtasks = default_decomposition(&task.description);
            (task.description.clone(), task.subtasks.clone())
        };

        // Assign to idle agents, wrapping round-robin when subtasks
        // outnumber them.
        let idle = self.idle_agents().await;
        if idle.is_empty() {
            let error = "no idle agents available".to_string();
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.status = TaskStatus::Failed;
                task.error = Some(error.clone());
                task.completed_at = Some(Utc::now());
            }
            return Err(AgentError::UnknownAgent(error));
        }

        let mut assignments = Vec::new();
        for (i, subtask) in subtasks.iter().enumerate() {
            let agent_id = idle[i % idle.len()];
            assignments.push(Assignment {
                subtask_id: subtask.id,
                agent_id,
                status: AssignmentStatus::Assigned,
                result: None,
                error: None,
            });
        }
        for assignment in &assignments {
            self.set_status(assignment.agent_id, AgentStatus::Busy, Some(task_id))
                .await;
        }
        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.assignments = assignments.clone();
            }
        }

        // Run every assignment concurrently; a failure settles into its
        // own assignment without aborting the siblings.
        let runs = assignments.iter().zip(subtasks.iter()).map(|(assignment, subtask)| {
            let agent_id = assignment.agent_id;
            let description = subtask.description.clone();
            let this = self.clone();
            async move {
                let agent = {
                    let agents = this.agents.read().await;
                    agents.get(&agent_id).map(|r| r.agent.clone())
                };
                match agent {
                    Some(agent) => agent.process_input(&description, None).await,
                    None => Err(AgentError::UnknownAgent(agent_id.to_string())),
                }
            }
        });
        let outcomes: Vec<Result<String>> = futures::future::join_all(runs).await;

        // Settle assignments and release agents.
        let mut subtask_results = Vec::new();
        let mut succeeded = 0usize;
        for (i, outcome) in outcomes.into_iter().enumerate() {
            let assignment = &mut assignments[i];
            let subtask = &subtasks[i];
            match outcome {
                Ok(content) => {
                    assignment.status = AssignmentStatus::Succeeded;
                    assignment.result = Some(content.clone());
                    succeeded += 1;
                    subtask_results.push(SubtaskResult {
                        subtask_id: subtask.id,
                        agent_id: assignment.agent_id,
                        phase: subtask.phase.clone(),
                        success: true,
                        content: Some(content),
                        error: None,
                    });
                }
                Err(e) => {
                    assignment.status = AssignmentStatus::Failed;
                    assignment.error = Some(e.to_string());
                    subtask_results.push(SubtaskResult {
                        subtask_id: subtask.id,
                        agent_id: assignment.agent_id,
                        phase: subtask.phase.clone(),
                        success: false,
                        content: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        for assignment in &assignments {
            self.set_status(assignment.agent_id, AgentStatus::Idle, None)
                .await;
            let mut agents = self.agents.write().await;
            if let Some(entry) = agents.get_mut(&assignment.agent_id) {
                entry.record.task_history.push(task_id);
            }
        }

        // Integrate.
        let failed = subtask_results.len() - succeeded;
        let result = TaskResult {
            task_id,
            description,
            summary: format!(
                "executed {} subtasks, {} succeeded, {} failed",
                subtask_results.len(),
                succeeded,
                failed
            ),
            subtask_results,
            timestamp: Utc::now(),
        };

        {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(&task_id) {
                task.assignments = assignments;
                task.status = if succeeded > 0 {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                task.completed_at = Some(Utc::now());
                task.result = Some(result.clone());
                if succeeded == 0 {
                    task.error = Some("all subtasks failed".to_string());
                }
            }
        }
        log::info!("task {}: {}", task_id, result.summary);
        Ok(result)
    }

    /// Drop completed and failed tasks. Returns how many were removed.
    pub async fn cleanup_completed(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| {
            !matches!(t.status, TaskStatus::Completed | TaskStatus::Failed)
        });
        before - tasks.len()
    }

    // -----------------------------------------------------------------------
    // Message bus
    // -----------------------------------------------------------------------

    /// Deliver a direct message, recording it in both endpoints'
    /// communication history. Delivery is awaited; the returned message
    /// carries the final status.
    pub async fn send_message(
        &self,
        from: Uuid,
        to: Uuid,
        content: Value,
        kind: MessageKind,
    ) -> Result<Message> {
        let mut msg = Message::direct(from, to, kind, content);

        let receiver = {
            let mut agents = self.agents.write().await;
            if !agents.contains_key(&from) {
                return Err(AgentError::UnknownAgent(from.to_string()));
            }
            let receiver = agents
                .get(&to)
                .map(|r| r.agent.clone())
                .ok_or_else(|| AgentError::UnknownAgent(to.to_string()))?;
            for id in [from, to] {
                if let Some(entry) = agents.get_mut(&id) {
                    push_comm(&mut entry.record, msg.clone());
                    entry.record.last_activity = Utc::now();
                }
            }
            receiver
        };

        // Deliver outside the table lock so handlers may message freely.
        let delivery = receiver.on_message(msg.clone()).await;
        msg.status = match &delivery {
            Ok(_) => MessageStatus::Delivered,
            Err(_) => MessageStatus::Failed,
        };
        {
            let mut agents = self.agents.write().await;
            for id in [from, to] {
                if let Some(entry) = agents.get_mut(&id) {
                    if let Some(stored) =
                        entry.record.comm_history.iter_mut().find(|m| m.id == msg.id)
                    {
                        stored.status = msg.status;
                    }
                }
            }
        }

        if let Err(e) = delivery {
            log::warn!("message {} delivery failed: {}", msg.id, e);
        }
        Ok(msg)
    }

    /// Deliver a message to every agent except the sender, swallowing
    /// individual receiver failures. Returns the number delivered.
    pub async fn broadcast(
        &self,
        from: Uuid,
        content: Value,
        kind: MessageKind,
    ) -> Result<usize> {
        let recipients: Vec<Uuid> = {
            let agents = self.agents.read().await;
            if !agents.contains_key(&from) {
                return Err(AgentError::UnknownAgent(from.to_string()));
            }
            agents.keys().copied().filter(|id| *id != from).collect()
        };

        let mut delivered = 0;
        for to in recipients {
            match self.send_message(from, to, content.clone(), kind).await {
                Ok(msg) if msg.status == MessageStatus::Delivered => delivered += 1,
                Ok(_) => {}
                Err(e) => log::warn!("broadcast to {} failed: {}", to, e),
            }
        }
        Ok(delivered)
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Aggregate statistics.
    pub async fn stats(&self) -> ManagerStats {
        let agents = self.agents.read().await;
        let tasks = self.tasks.read().await;
        ManagerStats {
            agents: agents.len(),
            idle_agents: agents
                .values()
                .filter(|r| r.record.status == AgentStatus::Idle)
                .count(),
            tasks_total: tasks.len(),
            tasks_completed: tasks
                .values()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            tasks_failed: tasks
                .values()
                .filter(|t| t.status == TaskStatus::Failed)
                .count(),
        }
    }
}

fn push_comm(record: &mut AgentRecord, msg: Message) {
    record.comm_history.push(msg);
    if record.comm_history.len() > COMM_HISTORY_LIMIT {
        let excess = record.comm_history.len() - COMM_HISTORY_LIMIT;
        record.comm_history.drain(..excess);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
