//! Model Context Protocol client: wire transport and server pool.
//!
//! The transport speaks JSON-RPC 2.0 over HTTP POST, handling both plain
//! JSON responses and server-sent-event streams, with an automatic
//! downgrade for servers that claim streaming but answer plainly. The pool
//! manages multiple servers, mirrors their discovered tools into local
//! tool registries, and emits lifecycle events.

pub mod config;
pub mod pool;
pub mod protocol;
pub mod transport;

pub use config::{McpServerConfig, McpServerEntry, McpServersDocument};
pub use pool::{PoolEvent, PoolStats, ServerPool, ServerState};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpPromptInfo, McpResourceInfo, McpToolInfo,
    PROTOCOL_VERSION,
};
pub use transport::{HttpTransport, StreamHandler, TransportMode};
