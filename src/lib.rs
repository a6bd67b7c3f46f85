//! # agentmesh
//!
//! An autonomous agent runtime: LLM-driven reasoning loops (ReAct and
//! Plan-and-Solve), a uniform tool layer that mirrors remote MCP servers
//! into local registries, bounded TTL working memory with relevance
//! retrieval, and a manager that coordinates collaborative tasks across
//! several agents in parallel.

pub mod agent;
pub mod config;
pub mod errors;
pub mod llm;
pub mod manager;
pub mod mcp;
pub mod memory;
pub mod reasoning;
pub mod tools;
pub mod workflow;

pub use agent::{Agent, AgentConfig};
pub use config::{RuntimeConfig, ThinkingMode};
pub use errors::{AgentError, Result};
pub use llm::{LlmBackend, OpenAiClient};
pub use manager::{AgentManager, TaskOptions, TaskResult};
pub use mcp::{McpServerConfig, ServerPool, TransportMode};
pub use memory::{MemoryKind, MemoryStore};
pub use reasoning::{ReasoningConfig, ReasoningEngine};
pub use tools::{ToolDescriptor, ToolRegistry, ToolSelector};
pub use workflow::{UniversalAgent, WorkflowPhase};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
