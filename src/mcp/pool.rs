//! Multi-server connection lifecycle and capability mirroring.
//!
//! Per server: `disconnected → connecting → connected`, dropping to
//! `failed` on any connection or transport error; `failed → connecting`
//! again on retry. On entering `connected` the pool mirrors the server's
//! tools, resources, and prompts, and registers one wrapper descriptor per
//! tool (id `"<server_id>:<tool_name>"`) into every bound tool registry.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::errors::{AgentError, Result};
use crate::mcp::config::McpServerConfig;
use crate::mcp::protocol::{McpPromptInfo, McpResourceInfo, McpToolInfo};
use crate::mcp::transport::HttpTransport;
use crate::tools::registry::{
    tool_fn, McpToolMeta, ParamKind, ToolDescriptor, ToolParam, ToolRegistry,
};

/// Capacity of the pool's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// State and events
// ---------------------------------------------------------------------------

/// Connection lifecycle state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Known but not yet connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Initialized and serving.
    Connected,
    /// Last connection or request failed.
    Failed,
}

/// Lifecycle events observable by the agent layer, totally ordered.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A server completed its handshake.
    ServerConnected { id: String },
    /// A server failed to connect or errored during a request.
    ServerError { id: String, message: String },
    /// A server's mirrored tool set changed.
    ToolsChanged { id: String },
}

/// One tool mirrored from a remote server.
#[derive(Debug, Clone)]
pub struct MirroredTool {
    /// Owning server id.
    pub server_id: String,
    /// Registry id, `"<server_id>:<tool_name>"`.
    pub full_id: String,
    /// Server-side tool description.
    pub info: McpToolInfo,
}

/// Per-server statistics row.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub id: String,
    pub state: ServerState,
    pub tools_count: usize,
    pub error_count: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Pool-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub servers: Vec<ServerStats>,
    pub connected: usize,
    pub total_tools: usize,
}

// ---------------------------------------------------------------------------
// Managed server record
// ---------------------------------------------------------------------------

struct ManagedServer {
    id: String,
    name: String,
    config: McpServerConfig,
    transport: Arc<HttpTransport>,
    state: ServerState,
    last_connected_at: Option<DateTime<Utc>>,
    error_count: u32,
    tools: Vec<McpToolInfo>,
    resources: Vec<McpResourceInfo>,
    prompts: Vec<McpPromptInfo>,
}

impl ManagedServer {
    fn new(id: String, config: McpServerConfig) -> Self {
        let mut transport = HttpTransport::new(config.url.clone(), config.transport)
            .with_timeouts(config.request_timeout, config.connect_timeout);
        if let Some(key) = &config.api_key {
            transport = transport.with_api_key(key);
        }
        Self {
            name: config.name.clone().unwrap_or_else(|| id.clone()),
            id,
            config,
            transport: Arc::new(transport),
            state: ServerState::Disconnected,
            last_connected_at: None,
            error_count: 0,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerPool
// ---------------------------------------------------------------------------

/// Shared pool of MCP server connections.
///
/// Shared read-write across agents; internal tables are lock-protected and
/// events are observed in the order they occur.
pub struct ServerPool {
    servers: RwLock<HashMap<String, ManagedServer>>,
    registries: RwLock<Vec<Weak<ToolRegistry>>>,
    events: broadcast::Sender<PoolEvent>,
    max_connections: usize,
}

impl ServerPool {
    /// Create a pool admitting at most `max_connections` servers.
    pub fn new(max_connections: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
            registries: RwLock::new(Vec::new()),
            events,
            max_connections: max_connections.max(1),
        })
    }

    /// Observe lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PoolEvent) {
        // No receivers is fine; events are best-effort observability.
        let _ = self.events.send(event);
    }

    /// Bind a tool registry; current and future mirrored tools are
    /// registered into it.
    pub async fn bind_registry(self: &Arc<Self>, registry: &Arc<ToolRegistry>) {
        self.registries.write().await.push(Arc::downgrade(registry));
        self.sync_registry(registry).await;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Add a server and connect to it.
    ///
    /// On success the server's capabilities are mirrored and its tools
    /// registered into every bound registry. On failure the server is
    /// recorded in the `failed` state and the error is returned.
    pub async fn add_server(self: &Arc<Self>, id: &str, config: McpServerConfig) -> Result<()> {
        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(id) {
                return Err(AgentError::InvalidConfig(format!(
                    "server '{}' is already configured",
                    id
                )));
            }
            if servers.len() >= self.max_connections {
                return Err(AgentError::InvalidConfig(format!(
                    "server limit reached ({})",
                    self.max_connections
                )));
            }
            servers.insert(id.to_string(), ManagedServer::new(id.to_string(), config));
        }
        self.connect(id).await
    }

    /// Remove a server, dropping its mirrored tools from every registry.
    pub async fn remove_server(&self, id: &str) -> Result<()> {
        let removed = {
            let mut servers = self.servers.write().await;
            servers.remove(id)
        };
        let server = removed.ok_or_else(|| AgentError::NotFound(format!("server '{}'", id)))?;
        server.transport.clear_session();

        let full_ids: Vec<String> = server
            .tools
            .iter()
            .map(|t| format!("{}:{}", id, t.name))
            .collect();
        for registry in self.live_registries().await {
            for full_id in &full_ids {
                registry.unregister(full_id).await;
            }
        }
        self.emit(PoolEvent::ToolsChanged { id: id.to_string() });
        log::info!("removed MCP server '{}'", id);
        Ok(())
    }

    /// Reconnect every server not currently connected. Returns how many
    /// came back.
    pub async fn reconnect_all(self: &Arc<Self>) -> usize {
        let targets: Vec<String> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .filter(|s| s.state != ServerState::Connected)
                .map(|s| s.id.clone())
                .collect()
        };
        let mut recovered = 0;
        for id in targets {
            if self.connect(&id).await.is_ok() {
                recovered += 1;
            }
        }
        recovered
    }

    /// Drive one server through `connecting → connected`, mirroring its
    /// capabilities, with exponential-backoff retries.
    async fn connect(self: &Arc<Self>, id: &str) -> Result<()> {
        let (transport, attempts, base_delay) = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(id)
                .ok_or_else(|| AgentError::NotFound(format!("server '{}'", id)))?;
            server.state = ServerState::Connecting;
            (
                server.transport.clone(),
                server.config.retry_attempts.max(1),
                server.config.retry_delay,
            )
        };

        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                // 1x, 2x, 4x the base delay between attempts.
                tokio::time::sleep(base_delay * 2u32.pow(attempt - 1)).await;
                log::info!("retrying MCP server '{}' (attempt {})", id, attempt + 1);
            }
            match transport.initialize().await {
                Ok(_) => {
                    last_error = None;
                    break;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(err) = last_error {
            self.mark_failed(id, &err.to_string()).await;
            return Err(err);
        }

        // Mirror capabilities. The tool catalog is load-bearing; resource
        // and prompt listings are optional extras on many servers.
        let tools = match transport.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                self.mark_failed(id, &err.to_string()).await;
                return Err(err);
            }
        };
        let resources = transport.list_resources().await.unwrap_or_else(|e| {
            log::debug!("server '{}' resources/list failed: {}", id, e);
            Vec::new()
        });
        let prompts = transport.list_prompts().await.unwrap_or_else(|e| {
            log::debug!("server '{}' prompts/list failed: {}", id, e);
            Vec::new()
        });

        {
            let mut servers = self.servers.write().await;
            if let Some(server) = servers.get_mut(id) {
                server.state = ServerState::Connected;
                server.last_connected_at = Some(Utc::now());
                server.tools = tools;
                server.resources = resources;
                server.prompts = prompts;
            }
        }
        self.emit(PoolEvent::ServerConnected { id: id.to_string() });
        log::info!("MCP server '{}' connected", id);

        for registry in self.live_registries().await {
            self.sync_registry(&registry).await;
        }
        self.emit(PoolEvent::ToolsChanged { id: id.to_string() });
        Ok(())
    }

    async fn mark_failed(&self, id: &str, message: &str) {
        {
            let mut servers = self.servers.write().await;
            if let Some(server) = servers.get_mut(id) {
                server.state = ServerState::Failed;
                server.error_count += 1;
            }
        }
        log::error!("MCP server '{}' failed: {}", id, message);
        self.emit(PoolEvent::ServerError {
            id: id.to_string(),
            message: message.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute a mirrored tool by its full id (`server:tool`).
    ///
    /// Fails fast when the owning server is not connected; it never blocks
    /// waiting for a reconnect.
    pub async fn execute_tool(&self, full_id: &str, args: Value) -> Result<Value> {
        let (server_id, tool_name) = full_id.split_once(':').ok_or_else(|| {
            AgentError::ToolNotFound(format!("'{}' is not a server-qualified tool id", full_id))
        })?;

        let transport = {
            let servers = self.servers.read().await;
            let server = servers
                .get(server_id)
                .ok_or_else(|| AgentError::ServerNotConnected(server_id.to_string()))?;
            if server.state != ServerState::Connected {
                return Err(AgentError::ServerNotConnected(server_id.to_string()));
            }
            if !server.tools.iter().any(|t| t.name == tool_name) {
                return Err(AgentError::ToolNotFound(full_id.to_string()));
            }
            server.transport.clone()
        };

        match transport.call_tool(tool_name, args, None).await {
            Ok(result) => Ok(result),
            Err(err) => {
                // Transport-level trouble poisons the connection; a JSON-RPC
                // error is just a failed call on a healthy server.
                if matches!(
                    err,
                    AgentError::Transport(_) | AgentError::NoStreamData
                ) {
                    self.mark_failed(server_id, &err.to_string()).await;
                }
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mirror queries
    // -----------------------------------------------------------------------

    /// Every mirrored tool across connected servers.
    pub async fn all_tools(&self) -> Vec<MirroredTool> {
        let servers = self.servers.read().await;
        let mut out = Vec::new();
        for server in servers.values() {
            if server.state != ServerState::Connected {
                continue;
            }
            for info in &server.tools {
                out.push(MirroredTool {
                    server_id: server.id.clone(),
                    full_id: format!("{}:{}", server.id, info.name),
                    info: info.clone(),
                });
            }
        }
        out.sort_by(|a, b| a.full_id.cmp(&b.full_id));
        out
    }

    /// Current state of one server.
    pub async fn server_state(&self, id: &str) -> Option<ServerState> {
        self.servers.read().await.get(id).map(|s| s.state)
    }

    /// Mirrored resources of one server.
    pub async fn server_resources(&self, id: &str) -> Vec<McpResourceInfo> {
        let servers = self.servers.read().await;
        servers
            .get(id)
            .map(|s| s.resources.clone())
            .unwrap_or_default()
    }

    /// Mirrored prompts of one server.
    pub async fn server_prompts(&self, id: &str) -> Vec<McpPromptInfo> {
        let servers = self.servers.read().await;
        servers
            .get(id)
            .map(|s| s.prompts.clone())
            .unwrap_or_default()
    }

    /// Read a resource from one connected server.
    pub async fn read_resource(&self, server_id: &str, uri: &str) -> Result<Value> {
        let transport = self.connected_transport(server_id).await?;
        transport.read_resource(uri).await
    }

    /// Fetch a prompt from one connected server.
    pub async fn get_prompt(&self, server_id: &str, name: &str, arguments: Value) -> Result<Value> {
        let transport = self.connected_transport(server_id).await?;
        transport.get_prompt(name, arguments).await
    }

    async fn connected_transport(&self, server_id: &str) -> Result<Arc<HttpTransport>> {
        let servers = self.servers.read().await;
        let server = servers
            .get(server_id)
            .ok_or_else(|| AgentError::ServerNotConnected(server_id.to_string()))?;
        if server.state != ServerState::Connected {
            return Err(AgentError::ServerNotConnected(server_id.to_string()));
        }
        Ok(server.transport.clone())
    }

    /// Session id currently held for one server.
    pub async fn server_session(&self, id: &str) -> Option<String> {
        let servers = self.servers.read().await;
        servers.get(id).and_then(|s| s.transport.session_id())
    }

    /// Pool statistics.
    pub async fn stats(&self) -> PoolStats {
        let servers = self.servers.read().await;
        let mut rows: Vec<ServerStats> = servers
            .values()
            .map(|s| ServerStats {
                id: s.id.clone(),
                state: s.state,
                tools_count: s.tools.len(),
                error_count: s.error_count,
                last_connected_at: s.last_connected_at,
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        PoolStats {
            connected: rows
                .iter()
                .filter(|r| r.state == ServerState::Connected)
                .count(),
            total_tools: rows.iter().map(|r| r.tools_count).sum(),
            servers: rows,
        }
    }

    // -----------------------------------------------------------------------
    // Registry synchronization
    // -----------------------------------------------------------------------

    /// Bring one registry in line with the current mirror: stale wrappers
    /// out, missing wrappers in.
    pub async fn sync_registry(self: &Arc<Self>, registry: &Arc<ToolRegistry>) {
        let mirrored = self.all_tools().await;
        let current_ids: std::collections::HashSet<String> =
            mirrored.iter().map(|t| t.full_id.clone()).collect();

        // Drop wrappers whose server or tool has gone away.
        for tool in registry.list().await {
            if tool.mcp.is_some() && !current_ids.contains(&tool.id) {
                registry.unregister(&tool.id).await;
            }
        }

        let server_names: HashMap<String, String> = {
            let servers = self.servers.read().await;
            servers
                .values()
                .map(|s| (s.id.clone(), s.name.clone()))
                .collect()
        };

        for tool in mirrored {
            let server_name = server_names
                .get(&tool.server_id)
                .cloned()
                .unwrap_or_else(|| tool.server_id.clone());
            let descriptor = self.make_descriptor(&tool, server_name);
            if let Err(e) = registry.register(descriptor).await {
                log::warn!("could not register mirrored tool '{}': {}", tool.full_id, e);
            }
        }
    }

    /// Build the local wrapper descriptor for one mirrored tool.
    fn make_descriptor(self: &Arc<Self>, tool: &MirroredTool, server_name: String) -> ToolDescriptor {
        let description = if tool.info.description.trim().is_empty() {
            format!("MCP tool '{}' on server '{}'", tool.info.name, server_name)
        } else {
            tool.info.description.clone()
        };

        let pool: Weak<ServerPool> = Arc::downgrade(self);
        let full_id = tool.full_id.clone();
        let execute = tool_fn(move |args: Value| {
            let pool = pool.clone();
            let full_id = full_id.clone();
            async move {
                let pool = pool
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("server pool was dropped"))?;
                pool.execute_tool(&full_id, args)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))
            }
        });

        ToolDescriptor::new(tool.full_id.clone(), description, execute)
            .with_display_name(tool.info.name.clone())
            .with_category("mcp")
            .with_params(params_from_schema(&tool.info.input_schema))
            .with_mcp(McpToolMeta {
                server_id: tool.server_id.clone(),
                server_name,
                original_name: tool.info.name.clone(),
            })
    }

    async fn live_registries(&self) -> Vec<Arc<ToolRegistry>> {
        let mut registries = self.registries.write().await;
        registries.retain(|w| w.strong_count() > 0);
        registries.iter().filter_map(Weak::upgrade).collect()
    }

    /// Test hook: install a server record already in the connected state
    /// with a fixed tool mirror, skipping the network handshake.
    #[cfg(test)]
    pub(crate) async fn inject_connected_server(
        self: &Arc<Self>,
        id: &str,
        tools: Vec<McpToolInfo>,
    ) {
        {
            let mut servers = self.servers.write().await;
            let mut server = ManagedServer::new(
                id.to_string(),
                McpServerConfig::new(format!("http://127.0.0.1:1/{}", id)),
            );
            server.state = ServerState::Connected;
            server.last_connected_at = Some(Utc::now());
            server.tools = tools;
            servers.insert(id.to_string(), server);
        }
        for registry in self.live_registries().await {
            self.sync_registry(&registry).await;
        }
        self.emit(PoolEvent::ToolsChanged { id: id.to_string() });
    }
}

/// Translate a JSON-Schema `inputSchema` object into declared parameters.
fn params_from_schema(schema: &Value) -> Vec<ToolParam> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let kind = prop
                .get("type")
                .and_then(|t| t.as_str())
                .map(ParamKind::from_schema_type)
                .unwrap_or(ParamKind::String);
            let mut param = ToolParam {
                name: name.clone(),
                kind,
                description: prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                required: required.contains(&name.as_str()),
                allowed: None,
            };
            if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                param.allowed = Some(allowed.clone());
            }
            param
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_from_schema() {
        let schema = json!({
            "properties": {
                "city": { "type": "string", "description": "city name" },
                "days": { "type": "integer" },
                "units": { "type": "string", "enum": ["metric", "imperial"] }
            },
            "required": ["city"]
        });
        let params = params_from_schema(&schema);
        assert_eq!(params.len(), 3);

        let city = params.iter().find(|p| p.name == "city").unwrap();
        assert!(city.required);
        assert_eq!(city.kind, ParamKind::String);
        assert_eq!(city.description, "city name");

        let days = params.iter().find(|p| p.name == "days").unwrap();
        assert!(!days.required);
        assert_eq!(days.kind, ParamKind::Integer);

        let units = params.iter().find(|p| p.name == "units").unwrap();
        assert_eq!(units.allowed.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_params_from_empty_schema() {
        assert!(params_from_schema(&json!({})).is_empty());
        assert!(params_from_schema(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn test_execute_tool_requires_qualified_id() {
        let pool = ServerPool::new(4);
        let err = pool.execute_tool("bare_name", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_tool_unknown_server() {
        let pool = ServerPool::new(4);
        let err = pool
            .execute_tool("ghost:lookup", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ServerNotConnected(_)));
    }

    #[tokio::test]
    async fn test_add_server_enforces_limit() {
        let pool = ServerPool::new(1);
        // The connect attempt fails fast against an unroutable port, but
        // the record stays in the failed state and still occupies a slot.
        let config = McpServerConfig::new("http://127.0.0.1:1/rpc")
            .with_retries(1, std::time::Duration::from_millis(1));
        let _ = pool.add_server("first", config.clone()).await;

        let err = pool.add_server("second", config).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_add_server_duplicate_rejected() {
        let pool = ServerPool::new(4);
        let config = McpServerConfig::new("http://127.0.0.1:1/rpc")
            .with_retries(1, std::time::Duration::from_millis(1));
        let _ = pool.add_server("s", config.clone()).await;
        let err = pool.add_server("s", config).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_failed_connect_marks_failed_and_emits() {
        let pool = ServerPool::new(4);
        let mut events = pool.subscribe();
        let config = McpServerConfig::new("http://127.0.0.1:1/rpc")
            .with_retries(1, std::time::Duration::from_millis(1));
        assert!(pool.add_server("dead", config).await.is_err());
        assert_eq!(
            pool.server_state("dead").await,
            Some(ServerState::Failed)
        );

        let stats = pool.stats().await;
        assert_eq!(stats.servers.len(), 1);
        assert_eq!(stats.servers[0].error_count, 1);
        assert_eq!(stats.connected, 0);

        match events.try_recv() {
            Ok(PoolEvent::ServerError { id, .. }) => assert_eq!(id, "dead"),
            other => panic!("expected ServerError event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_server_missing() {
        let pool = ServerPool::new(4);
        assert!(matches!(
            pool.remove_server("nope").await.unwrap_err(),
            AgentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_server_clears_record() {
        let pool = ServerPool::new(4);
        let config = McpServerConfig::new("http://127.0.0.1:1/rpc")
            .with_retries(1, std::time::Duration::from_millis(1));
        let _ = pool.add_server("s", config).await;
        pool.remove_server("s").await.unwrap();
        assert!(pool.server_state("s").await.is_none());
        assert!(pool.stats().await.servers.is_empty());
    }

    #[tokio::test]
    async fn test_all_tools_empty_without_connections() {
        let pool = ServerPool::new(4);
        assert!(pool.all_tools().await.is_empty());
    }

    fn weather_tool_info() -> McpToolInfo {
        serde_json::from_value(json!({
            "name": "maps_weather",
            "description": "city weather lookup",
            "inputSchema": {
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_discovered_tools_mirrored_into_registry() {
        let pool = ServerPool::new(4);
        let registry = Arc::new(ToolRegistry::new());
        pool.bind_registry(&registry).await;

        pool.inject_connected_server("S", vec![weather_tool_info()])
            .await;

        // The wrapper carries the qualified id and the bare original name.
        let tool = registry.get("S:maps_weather").await.expect("mirrored tool");
        let mcp = tool.mcp.as_ref().unwrap();
        assert_eq!(mcp.original_name, "maps_weather");
        assert_eq!(mcp.server_id, "S");
        let city = tool.params.iter().find(|p| p.name == "city").unwrap();
        assert!(city.required);

        // The bare server-side name resolves to the same descriptor.
        let resolved = registry.resolve("maps_weather").await.unwrap();
        assert_eq!(resolved.id, "S:maps_weather");
    }

    #[tokio::test]
    async fn test_remove_server_unregisters_mirrored_tools() {
        let pool = ServerPool::new(4);
        let registry = Arc::new(ToolRegistry::new());
        pool.bind_registry(&registry).await;
        pool.inject_connected_server("S", vec![weather_tool_info()])
            .await;
        assert_eq!(registry.len().await, 1);

        pool.remove_server("S").await.unwrap();
        assert!(registry.get("S:maps_weather").await.is_none());
        assert!(registry.resolve("maps_weather").await.is_none());
    }

    #[tokio::test]
    async fn test_sync_registry_drops_stale_wrappers() {
        let pool = ServerPool::new(4);
        let registry = Arc::new(ToolRegistry::new());
        pool.bind_registry(&registry).await;
        pool.inject_connected_server("S", vec![weather_tool_info()])
            .await;

        // The server's catalog shrinks; a re-sync must drop the wrapper.
        {
            let mut servers = pool.servers.write().await;
            servers.get_mut("S").unwrap().tools.clear();
        }
        pool.sync_registry(&registry).await;
        assert!(registry.get("S:maps_weather").await.is_none());
    }

    #[tokio::test]
    async fn test_execute_tool_routes_to_owning_server_only() {
        let pool = ServerPool::new(4);
        pool.inject_connected_server("S", vec![weather_tool_info()])
            .await;
        pool.inject_connected_server("T", vec![]).await;

        // The tool lives on S, so the same name qualified with T is unknown.
        let err = pool
            .execute_tool("T:maps_weather", json!({"city": "Hangzhou"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }
}
