//! The agent: one memory, one tool registry, one LLM gateway, and a
//! reasoning strategy, behind a single `process_input` entry point.
//!
//! Agents optionally share a [`ServerPool`]; before every reasoning run
//! the agent refreshes its mirror of MCP-discovered tools so both the
//! prompt catalog and the execution path see the live set. Collaboration
//! goes through the manager: an agent holds only its own id and a weak
//! handle for sending messages, never another agent.

use std::sync::{Arc, Weak};

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{RuntimeConfig, ThinkingMode};
use crate::errors::{AgentError, Result};
use crate::llm::{ChatMessage, LlmBackend, TokenUsage};
use crate::manager::message::{Message, MessageKind};
use crate::manager::AgentManager;
use crate::mcp::pool::{PoolEvent, ServerPool};
use crate::memory::{MemoryKind, MemoryStore};
use crate::reasoning::{ReasoningConfig, ReasoningEngine, APOLOGY_PREFIX};
use crate::tools::{ToolRegistry, ToolSelector};

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Static configuration of one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Display name.
    pub name: String,
    /// Role string used by the manager.
    pub role: String,
    /// Reasoning strategy.
    pub mode: ThinkingMode,
    /// Engine tunables.
    pub reasoning: ReasoningConfig,
    /// Per-task timeout; firing it cancels the run.
    pub task_timeout: std::time::Duration,
    /// Working-memory TTL.
    pub memory_ttl: std::time::Duration,
    /// Working-memory entry cap.
    pub max_memory_size: usize,
    /// Whether this agent participates in collaboration.
    pub collaboration_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            role: "assistant".to_string(),
            mode: ThinkingMode::React,
            reasoning: ReasoningConfig::default(),
            task_timeout: std::time::Duration::from_secs(30),
            memory_ttl: std::time::Duration::from_secs(1800),
            max_memory_size: 1000,
            collaboration_enabled: false,
        }
    }
}

impl AgentConfig {
    /// Derive an agent configuration from the process runtime config.
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            name: runtime.agent_name.clone(),
            role: runtime.agent_role.clone(),
            mode: runtime.thinking_mode,
            reasoning: ReasoningConfig {
                max_iterations: runtime.max_iterations,
                ..ReasoningConfig::default()
            },
            task_timeout: runtime.task_timeout,
            memory_ttl: runtime.memory_ttl,
            max_memory_size: runtime.max_memory_size,
            collaboration_enabled: runtime.collaboration_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// One autonomous agent.
pub struct Agent {
    id: Uuid,
    config: AgentConfig,
    memory: Arc<MemoryStore>,
    registry: Arc<ToolRegistry>,
    selector: Arc<ToolSelector>,
    engine: ReasoningEngine,
    pool: RwLock<Option<Arc<ServerPool>>>,
    history: Mutex<Vec<ChatMessage>>,
    current_task: Mutex<Option<String>>,
    manager: RwLock<Option<Weak<AgentManager>>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("role", &self.config.role)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create an agent over the given backend.
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmBackend>) -> Arc<Self> {
        let memory = Arc::new(MemoryStore::new(config.memory_ttl, config.max_memory_size));
        let registry = Arc::new(ToolRegistry::new());
        let selector = Arc::new(ToolSelector::default());
        let engine = ReasoningEngine::new(
            llm,
            registry.clone(),
            memory.clone(),
            config.reasoning.clone(),
        )
        .with_selector(selector.clone());

        Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            memory,
            registry,
            selector,
            engine,
            pool: RwLock::new(None),
            history: Mutex::new(Vec::new()),
            current_task: Mutex::new(None),
            manager: RwLock::new(None),
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Stable agent id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Static configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// This agent's working memory.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// This agent's tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// This agent's tool selector.
    pub fn selector(&self) -> &Arc<ToolSelector> {
        &self.selector
    }

    /// Snapshot of the conversation history.
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().await.clone()
    }

    /// The task currently being processed, if any.
    pub async fn current_task(&self) -> Option<String> {
        self.current_task.lock().await.clone()
    }

    /// Whether the agent is free to accept new work.
    pub async fn is_idle(&self) -> bool {
        self.current_task.lock().await.is_none()
    }

    /// Token usage accumulated across every model call by this agent.
    pub fn token_usage(&self) -> TokenUsage {
        self.engine.token_usage()
    }

    /// Capability snapshot for the manager: registered tool ids plus the
    /// reasoning mode.
    pub async fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = self
            .registry
            .list()
            .await
            .iter()
            .map(|t| t.id.clone())
            .collect();
        caps.push(format!("mode:{}", self.config.mode));
        caps
    }

    // -----------------------------------------------------------------------
    // MCP wiring
    // -----------------------------------------------------------------------

    /// Opt in to a shared server pool.
    ///
    /// Binds the agent's registry for tool mirroring and tracks server
    /// failures in the selector so ranked tools reflect server health.
    pub async fn set_server_manager(self: &Arc<Self>, pool: Arc<ServerPool>) {
        pool.bind_registry(&self.registry).await;

        let selector = self.selector.clone();
        let mut events = pool.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    PoolEvent::ServerError { id, .. } => selector.set_server_failed(&id, true),
                    PoolEvent::ServerConnected { id } => selector.set_server_failed(&id, false),
                    PoolEvent::ToolsChanged { .. } => {}
                }
            }
        });

        *self.pool.write().await = Some(pool);
    }

    /// Re-sync the registry with the pool's current tool mirror, dropping
    /// stale wrappers and registering new ones.
    pub async fn refresh_mcp_tools(&self) {
        let pool = self.pool.read().await.clone();
        if let Some(pool) = pool {
            pool.sync_registry(&self.registry).await;
        }
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Process one user input and return the agent's answer.
    ///
    /// The per-task timeout fires an internal cancellation; see
    /// [`Agent::process_input_with_cancel`] for caller-driven cancellation.
    pub async fn process_input(&self, input: &str, context: Option<Value>) -> Result<String> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(
            self.config.task_timeout,
            self.process_inner(input, context, &cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                *self.current_task.lock().await = None;
                log::warn!(
                    "agent '{}': task timed out after {:?}",
                    self.config.name,
                    self.config.task_timeout
                );
                Err(AgentError::Cancelled)
            }
        }
    }

    /// Like [`Agent::process_input`] but driven by the caller's token.
    pub async fn process_input_with_cancel(
        &self,
        input: &str,
        context: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.process_inner(input, context, cancel).await
    }

    async fn process_inner(
        &self,
        input: &str,
        context: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.history.lock().await.push(ChatMessage::user(input));
        self.memory
            .add(
                MemoryKind::Conversation,
                json!({ "input": input, "role": "user" }),
            )
            .await;
        *self.current_task.lock().await = Some(input.to_string());

        self.refresh_mcp_tools().await;

        let context = context.unwrap_or(Value::Null);
        let outcome = self
            .engine
            .run(self.config.mode, input, &context, cancel)
            .await;

        *self.current_task.lock().await = None;

        let answer = match outcome {
            Ok(answer) => answer,
            Err(AgentError::Cancelled) => {
                // No assistant turn and no terminal trace on cancellation.
                return Err(AgentError::Cancelled);
            }
            Err(e) => {
                log::error!("agent '{}' reasoning failed: {}", self.config.name, e);
                format!("{}{}", APOLOGY_PREFIX, e)
            }
        };

        self.history
            .lock()
            .await
            .push(ChatMessage::assistant(answer.clone()));
        self.memory
            .add(
                MemoryKind::Conversation,
                json!({ "content": answer, "role": "assistant" }),
            )
            .await;
        Ok(answer)
    }

    // -----------------------------------------------------------------------
    // Collaboration
    // -----------------------------------------------------------------------

    /// Join a manager's collaboration fabric.
    pub async fn enable_collaboration(&self, manager: &Arc<AgentManager>) {
        *self.manager.write().await = Some(Arc::downgrade(manager));
    }

    async fn manager_handle(&self) -> Result<Arc<AgentManager>> {
        self.manager
            .read()
            .await
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| AgentError::UnknownAgent("collaboration is not enabled".into()))
    }

    /// Send a direct message to another agent through the manager.
    pub async fn send_message(
        &self,
        to: Uuid,
        content: Value,
        kind: MessageKind,
    ) -> Result<Message> {
        let manager = self.manager_handle().await?;
        Box::pin(manager.send_message(self.id, to, content, kind)).await
    }

    /// Broadcast to every other agent through the manager.
    pub async fn broadcast(&self, content: Value, kind: MessageKind) -> Result<usize> {
        let manager = self.manager_handle().await?;
        manager.broadcast(self.id, content, kind).await
    }

    /// Handle one incoming message.
    ///
    /// A `task_request` is accepted only when the agent is idle: the
    /// content becomes a `process_input` call and the result is sent back
    /// as a `task_response`. Every other kind is appended to collaboration
    /// memory.
    pub async fn on_message(&self, msg: Message) -> Result<()> {
        match msg.kind {
            MessageKind::TaskRequest => {
                if !self.is_idle().await {
                    self.memory
                        .add(
                            MemoryKind::Collaboration,
                            json!({
                                "message": msg.content_text(),
                                "from": msg.from_agent,
                                "kind": msg.kind,
                                "note": "declined: agent busy",
                            }),
                        )
                        .await;
                    return Ok(());
                }
                let task = msg.content_text();
                let answer = self.process_input(&task, None).await?;
                self.send_message(
                    msg.from_agent,
                    json!({ "task": task, "result": answer }),
                    MessageKind::TaskResponse,
                )
                .await?;
                Ok(())
            }
            _ => {
                self.memory
                    .add(
                        MemoryKind::Collaboration,
                        json!({
                            "message": msg.content_text(),
                            "from": msg.from_agent,
                            "kind": msg.kind,
                        }),
                    )
                    .await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
