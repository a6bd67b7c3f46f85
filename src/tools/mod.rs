//! Tool catalog: registration, validation, dispatch, and selection.
//!
//! Built-in tools and tools mirrored from remote MCP servers share one
//! descriptor shape and one execution path. The registry validates declared
//! parameters before dispatch; the selector ranks candidate tools against a
//! task description using keyword overlap and historical success rates.

pub mod registry;
pub mod selector;

pub use registry::{
    tool_fn, McpToolMeta, ParamKind, ToolDescriptor, ToolExecuteFn, ToolParam, ToolRegistry,
};
pub use selector::{RankedTool, ToolSelector, DEFAULT_MAX_SELECTED};
