//! Runtime configuration loaded from environment variables.
//!
//! Every knob the core consumes has a documented default, so a bare
//! environment yields a usable (if offline) configuration. Malformed
//! numeric values fall back to the default rather than aborting startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, Result};

/// Default reasoning iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
/// Default working-memory TTL in seconds (30 minutes).
pub const DEFAULT_MEMORY_TTL_SECS: u64 = 1800;
/// Default working-memory entry cap.
pub const DEFAULT_MAX_MEMORY_SIZE: usize = 1000;
/// Default per-task timeout in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 30;
/// Default cap on concurrently configured MCP servers.
pub const DEFAULT_MAX_MCP_CONNECTIONS: usize = 10;
/// Default MCP connect/request timeout in seconds.
pub const DEFAULT_MCP_TIMEOUT_SECS: u64 = 30;
/// Default MCP retry attempts.
pub const DEFAULT_MCP_RETRY_ATTEMPTS: u32 = 3;
/// Default MCP retry base delay in milliseconds.
pub const DEFAULT_MCP_RETRY_DELAY_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// ThinkingMode
// ---------------------------------------------------------------------------

/// Which reasoning strategy an agent runs.
///
/// The historical `decision` mode was an earlier plan-execute pipeline and
/// parses as [`ThinkingMode::PlanSolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Interleaved thought / action / observation loop.
    React,
    /// Whole-plan-first execution pipeline.
    PlanSolve,
}

impl Default for ThinkingMode {
    fn default() -> Self {
        ThinkingMode::React
    }
}

impl ThinkingMode {
    /// Parse a mode string (case-insensitive). `decision` maps to plan-solve.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "react" => Ok(ThinkingMode::React),
            "plan_solve" | "plan-solve" | "decision" => Ok(ThinkingMode::PlanSolve),
            other => Err(AgentError::Unparsable(format!(
                "unrecognized thinking mode '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ThinkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThinkingMode::React => write!(f, "react"),
            ThinkingMode::PlanSolve => write!(f, "plan_solve"),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Aggregated runtime configuration for one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// API key for the LLM backend (`OPENAI_API_KEY`).
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model identifier (`OPENAI_MODEL`).
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint (`OPENAI_BASE_URL`).
    pub base_url: String,
    /// Display name for the default agent (`AGENT_NAME`).
    pub agent_name: String,
    /// Role string for the default agent (`AGENT_ROLE`).
    pub agent_role: String,
    /// Reasoning strategy (`THINKING_MODE`).
    pub thinking_mode: ThinkingMode,
    /// Iteration cap for the reasoning loop (`MAX_ITERATIONS`).
    pub max_iterations: u32,
    /// Working-memory TTL (`MEMORY_TTL`, seconds).
    pub memory_ttl: Duration,
    /// Working-memory entry cap (`MAX_MEMORY_SIZE`).
    pub max_memory_size: usize,
    /// Whether inter-agent collaboration is enabled (`COLLABORATION_ENABLED`).
    pub collaboration_enabled: bool,
    /// Per-task timeout (`TASK_TIMEOUT`, seconds).
    pub task_timeout: Duration,
    /// Cap on configured MCP servers (`MAX_MCP_CONNECTIONS`).
    pub max_mcp_connections: usize,
    /// MCP connect/request timeout (`MCP_CONNECTION_TIMEOUT`, seconds).
    pub mcp_connection_timeout: Duration,
    /// MCP retry attempts (`MCP_RETRY_ATTEMPTS`).
    pub mcp_retry_attempts: u32,
    /// MCP retry base delay (`MCP_RETRY_DELAY`, milliseconds).
    pub mcp_retry_delay: Duration,
    /// Log level string (`LOG_LEVEL`), consumed by the logging subscriber.
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            agent_name: "agent".to_string(),
            agent_role: "assistant".to_string(),
            thinking_mode: ThinkingMode::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            memory_ttl: Duration::from_secs(DEFAULT_MEMORY_TTL_SECS),
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
            collaboration_enabled: false,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            max_mcp_connections: DEFAULT_MAX_MCP_CONNECTIONS,
            mcp_connection_timeout: Duration::from_secs(DEFAULT_MCP_TIMEOUT_SECS),
            mcp_retry_attempts: DEFAULT_MCP_RETRY_ATTEMPTS,
            mcp_retry_delay: Duration::from_millis(DEFAULT_MCP_RETRY_DELAY_MS),
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the process environment.
    ///
    /// Unset variables use the defaults above; malformed numeric or boolean
    /// values are logged and replaced with the default rather than failing.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_string("OPENAI_API_KEY"),
            model: env_string("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: env_string("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            agent_name: env_string("AGENT_NAME").unwrap_or(defaults.agent_name),
            agent_role: env_string("AGENT_ROLE").unwrap_or(defaults.agent_role),
            thinking_mode: env_string("THINKING_MODE")
                .and_then(|s| match ThinkingMode::parse(&s) {
                    Ok(mode) => Some(mode),
                    Err(_) => {
                        log::warn!("THINKING_MODE '{}' not recognized, using default", s);
                        None
                    }
                })
                .unwrap_or(defaults.thinking_mode),
            max_iterations: env_parse("MAX_ITERATIONS", defaults.max_iterations),
            memory_ttl: Duration::from_secs(env_parse(
                "MEMORY_TTL",
                defaults.memory_ttl.as_secs(),
            )),
            max_memory_size: env_parse("MAX_MEMORY_SIZE", defaults.max_memory_size),
            collaboration_enabled: env_bool("COLLABORATION_ENABLED", false),
            task_timeout: Duration::from_secs(env_parse(
                "TASK_TIMEOUT",
                defaults.task_timeout.as_secs(),
            )),
            max_mcp_connections: env_parse("MAX_MCP_CONNECTIONS", defaults.max_mcp_connections),
            mcp_connection_timeout: Duration::from_secs(env_parse(
                "MCP_CONNECTION_TIMEOUT",
                defaults.mcp_connection_timeout.as_secs(),
            )),
            mcp_retry_attempts: env_parse("MCP_RETRY_ATTEMPTS", defaults.mcp_retry_attempts),
            mcp_retry_delay: Duration::from_millis(env_parse(
                "MCP_RETRY_DELAY",
                defaults.mcp_retry_delay.as_millis() as u64,
            )),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// Initialize the process logger, honoring `LOG_LEVEL` (and `RUST_LOG`,
/// which wins when set). Safe to call more than once.
pub fn init_logging(config: &RuntimeConfig) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(&config.log_level);
    }
    if builder.try_init().is_err() {
        log::debug!("logger was already initialized");
    }
}

/// Read a non-empty environment string.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment value, falling back to `default`.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("{}='{}' is not a valid value, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a boolean environment value ("true"/"1"/"yes" are truthy).
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
