//! Error taxonomy for the agent runtime.
//!
//! One variant per failure kind the runtime distinguishes. Errors produced
//! inside a reasoning iteration are converted into observations the model
//! can read in the next iteration; errors at phase boundaries are either
//! retried or recorded as failed steps. Cancellation is never swallowed.

use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// All failure kinds the agent runtime distinguishes.
#[derive(Debug, Error)]
pub enum AgentError {
    // ---- Memory ----
    /// A memory kind string outside the fixed set.
    #[error("unknown memory kind: {0}")]
    UnknownKind(String),

    /// Lookup of a missing memory entry, task, or record.
    #[error("not found: {0}")]
    NotFound(String),

    // ---- Tool dispatch ----
    /// A descriptor failed registration validation (empty name/description).
    #[error("invalid tool: {0}")]
    InvalidTool(String),

    /// No registered tool resolves to the requested name.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// A required parameter is absent from the call arguments.
    #[error("tool '{tool}': missing required parameter '{param}'")]
    MissingParam { tool: String, param: String },

    /// A parameter value does not match its declared primitive type.
    #[error("tool '{tool}': parameter '{param}' expects {expected}")]
    TypeMismatch {
        tool: String,
        param: String,
        expected: &'static str,
    },

    /// A parameter value is outside its declared enum.
    #[error("tool '{tool}': parameter '{param}' must be one of {allowed}")]
    EnumViolation {
        tool: String,
        param: String,
        allowed: String,
    },

    /// A tool body failed during execution.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// A configuration document or entry failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ---- MCP ----
    /// JSON-RPC-level error returned by a remote server.
    #[error("MCP error {code}: {message}")]
    McpError { code: i64, message: String },

    /// The target server is not in the connected state.
    #[error("MCP server '{0}' is not connected")]
    ServerNotConnected(String),

    /// An SSE response stream ended without producing any payload.
    #[error("event stream produced no data")]
    NoStreamData,

    /// A response body that is neither a JSON-RPC envelope nor SSE.
    #[error("malformed MCP response: {0}")]
    MalformedResponse(String),

    /// HTTP-level transport failure (network, timeout, non-2xx).
    #[error("MCP transport failure: {0}")]
    Transport(String),

    // ---- LLM ----
    /// Transient backend failure: network error, non-2xx, empty choices.
    #[error("LLM backend unavailable: {0}")]
    LlmUnavailable(String),

    /// The backend rejected the request as malformed; not retryable.
    #[error("LLM backend rejected request: {0}")]
    LlmBadRequest(String),

    // ---- Reasoning ----
    /// Model output not decodable as the expected JSON schema.
    #[error("model output not parseable: {0}")]
    Unparsable(String),

    /// The planning phase produced no parseable plan.
    #[error("plan not parseable: {0}")]
    UnparsablePlan(String),

    /// A plan whose structure violates the dependency rules.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A step references a dependency with no recorded result.
    #[error("step {step} depends on step {dependency}, which produced no result")]
    UnmetDependency { step: u32, dependency: u32 },

    /// Cooperative abort requested by the caller.
    #[error("operation cancelled")]
    Cancelled,

    // ---- Manager ----
    /// The manager's agent table is full.
    #[error("agent limit reached ({0} agents)")]
    AgentLimit(usize),

    /// An agent with this id is already registered.
    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    /// No agent with this id is registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// No collaborative task with this id exists.
    #[error("task not found: {0}")]
    TaskNotFound(String),
}

impl AgentError {
    /// Whether a retry at the caller may succeed.
    ///
    /// Only transient transport and backend failures qualify; everything
    /// else is deterministic and retrying would repeat the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::LlmUnavailable(_) | AgentError::Transport(_) | AgentError::NoStreamData
        )
    }

    /// Whether this error is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
