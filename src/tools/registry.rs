//! Named tool catalog: register, validate parameters, execute.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::errors::{AgentError, Result};

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

/// Primitive JSON types a declared parameter may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Any string value.
    String,
    /// Any JSON number.
    Number,
    /// An integral JSON number.
    Integer,
    /// A boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl ParamKind {
    /// Human-readable type name used in error messages.
    pub fn expected(&self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Number => "a number",
            ParamKind::Integer => "an integer",
            ParamKind::Boolean => "a boolean",
            ParamKind::Array => "an array",
            ParamKind::Object => "an object",
        }
    }

    /// Whether `value` satisfies this kind.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    /// Map a JSON-Schema `type` string onto a kind. Unknown strings default
    /// to [`ParamKind::String`], which is what remote schemas mean in
    /// practice when they omit or misspell the type.
    pub fn from_schema_type(s: &str) -> Self {
        match s {
            "number" => ParamKind::Number,
            "integer" => ParamKind::Integer,
            "boolean" => ParamKind::Boolean,
            "array" => ParamKind::Array,
            "object" => ParamKind::Object,
            _ => ParamKind::String,
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    /// Parameter name as it appears in call arguments.
    pub name: String,
    /// Required primitive type.
    pub kind: ParamKind,
    /// Human-readable description shown to the model.
    #[serde(default)]
    pub description: String,
    /// Whether the parameter must be present.
    #[serde(default)]
    pub required: bool,
    /// Closed set of allowed values, if any.
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
}

impl ToolParam {
    /// Create a required parameter.
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: true,
            allowed: None,
        }
    }

    /// Create an optional parameter.
    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: false,
            allowed: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restrict values to a closed set.
    pub fn with_allowed(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Provenance metadata for a tool mirrored from a remote MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolMeta {
    /// Id of the owning server in the pool.
    pub server_id: String,
    /// Display name of the owning server.
    pub server_name: String,
    /// Bare tool name on the server side, without the `server:` prefix.
    pub original_name: String,
}

/// Boxed async tool body. Receives the (already validated) argument object.
pub type ToolExecuteFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`ToolExecuteFn`].
pub fn tool_fn<F, Fut>(f: F) -> ToolExecuteFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| {
        let fut: BoxFuture<'static, anyhow::Result<Value>> = Box::pin(f(args));
        fut
    })
}

/// One registered tool.
///
/// For mirrored MCP tools the id is `"<server_id>:<tool_name>"` and
/// `mcp.original_name` retains the bare server-side name so the model may
/// emit either form.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Unique registry id.
    pub id: String,
    /// Display name shown in prompt catalogs.
    pub display_name: String,
    /// Description shown to the model.
    pub description: String,
    /// Grouping category (e.g. "search", "mcp", "utility").
    pub category: String,
    /// Declared parameters.
    pub params: Vec<ToolParam>,
    /// Async tool body.
    pub execute: ToolExecuteFn,
    /// Set for tools mirrored from an MCP server.
    pub mcp: Option<McpToolMeta>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("category", &self.category)
            .field("params", &self.params)
            .field("mcp", &self.mcp)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// Create a descriptor with the given body.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        execute: ToolExecuteFn,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: description.into(),
            category: "general".to_string(),
            params: Vec::new(),
            execute,
            mcp: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Declare the parameters.
    pub fn with_params(mut self, params: Vec<ToolParam>) -> Self {
        self.params = params;
        self
    }

    /// Attach MCP provenance metadata.
    pub fn with_mcp(mut self, mcp: McpToolMeta) -> Self {
        self.mcp = Some(mcp);
        self
    }

    /// The parameter catalog as a JSON-Schema-shaped object, for prompts.
    pub fn schema_json(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            let mut prop = serde_json::Map::new();
            prop.insert(
                "type".to_string(),
                Value::String(
                    match p.kind {
                        ParamKind::String => "string",
                        ParamKind::Number => "number",
                        ParamKind::Integer => "integer",
                        ParamKind::Boolean => "boolean",
                        ParamKind::Array => "array",
                        ParamKind::Object => "object",
                    }
                    .to_string(),
                ),
            );
            if !p.description.is_empty() {
                prop.insert(
                    "description".to_string(),
                    Value::String(p.description.clone()),
                );
            }
            if let Some(allowed) = &p.allowed {
                prop.insert("enum".to_string(), Value::Array(allowed.clone()));
            }
            properties.insert(p.name.clone(), Value::Object(prop));
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryInner {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    /// Registration order, for deterministic listing and first-match
    /// resolution of bare MCP names.
    order: Vec<String>,
}

/// Named tool catalog shared by the reasoning engine and the MCP pool.
///
/// Edits (MCP refresh) serialize with `execute` through the single-writer /
/// multi-reader lock: an in-flight execution holds its own `Arc` to the
/// descriptor, so removing a tool never interrupts a call already past
/// resolution.
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                tools: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register a descriptor.
    ///
    /// Registration is idempotent by id: a duplicate id is silently kept as
    /// the first registration. A descriptor with an empty id, name, or
    /// description is rejected.
    pub async fn register(&self, descriptor: ToolDescriptor) -> Result<()> {
        if descriptor.id.trim().is_empty() || descriptor.display_name.trim().is_empty() {
            return Err(AgentError::InvalidTool("tool name must be non-empty".into()));
        }
        if descriptor.description.trim().is_empty() {
            return Err(AgentError::InvalidTool(format!(
                "tool '{}' has an empty description",
                descriptor.id
            )));
        }

        let mut inner = self.inner.write().await;
        if inner.tools.contains_key(&descriptor.id) {
            log::debug!("tool '{}' already registered, keeping existing", descriptor.id);
            return Ok(());
        }
        let id = descriptor.id.clone();
        inner.tools.insert(id.clone(), Arc::new(descriptor));
        inner.order.push(id);
        Ok(())
    }

    /// Remove a tool by id. Returns whether it was present.
    pub async fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.tools.remove(id).is_some();
        if removed {
            inner.order.retain(|i| i != id);
        }
        removed
    }

    /// Look up a tool by its exact id.
    pub async fn get(&self, id: &str) -> Option<Arc<ToolDescriptor>> {
        self.inner.read().await.tools.get(id).cloned()
    }

    /// All registered tools, in registration order.
    pub async fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.tools.get(id).cloned())
            .collect()
    }

    /// All tools in one category, in registration order.
    pub async fn by_category(&self, category: &str) -> Vec<Arc<ToolDescriptor>> {
        self.list()
            .await
            .into_iter()
            .filter(|t| t.category == category)
            .collect()
    }

    /// Number of registered tools.
    pub async fn len(&self) -> usize {
        self.inner.read().await.tools.len()
    }

    /// Whether the registry holds no tools.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolve a tool name the way the model may emit it.
    ///
    /// Order matters: exact id first (covers both built-ins and the
    /// `server:tool` form), then the first registered descriptor whose MCP
    /// `original_name` equals the requested name.
    pub async fn resolve(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        let inner = self.inner.read().await;
        if let Some(tool) = inner.tools.get(name) {
            return Some(tool.clone());
        }
        inner
            .order
            .iter()
            .filter_map(|id| inner.tools.get(id))
            .find(|t| {
                t.mcp
                    .as_ref()
                    .map_or(false, |m| m.original_name == name)
            })
            .cloned()
    }

    /// Validate arguments against a descriptor's declared parameters.
    ///
    /// Unknown extra arguments are forwarded untouched.
    pub fn validate_args(descriptor: &ToolDescriptor, args: &Value) -> Result<()> {
        let map = match args {
            Value::Object(map) => map,
            Value::Null => {
                // No arguments supplied: only valid when nothing is required.
                return match descriptor.params.iter().find(|p| p.required) {
                    Some(p) => Err(AgentError::MissingParam {
                        tool: descriptor.id.clone(),
                        param: p.name.clone(),
                    }),
                    None => Ok(()),
                };
            }
            _ => {
                return Err(AgentError::TypeMismatch {
                    tool: descriptor.id.clone(),
                    param: "<arguments>".to_string(),
                    expected: "an object",
                })
            }
        };

        for param in &descriptor.params {
            match map.get(&param.name) {
                None => {
                    if param.required {
                        return Err(AgentError::MissingParam {
                            tool: descriptor.id.clone(),
                            param: param.name.clone(),
                        });
                    }
                }
                Some(value) => {
                    if !param.kind.matches(value) {
                        return Err(AgentError::TypeMismatch {
                            tool: descriptor.id.clone(),
                            param: param.name.clone(),
                            expected: param.kind.expected(),
                        });
                    }
                    if let Some(allowed) = &param.allowed {
                        if !allowed.contains(value) {
                            return Err(AgentError::EnumViolation {
                                tool: descriptor.id.clone(),
                                param: param.name.clone(),
                                allowed: serde_json::to_string(allowed)
                                    .unwrap_or_else(|_| "[]".to_string()),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve, validate, and run a tool.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        let descriptor = self
            .resolve(name)
            .await
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        Self::validate_args(&descriptor, &args)?;

        log::debug!("executing tool '{}'", descriptor.id);
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args
        };
        (descriptor.execute)(args)
            .await
            .map_err(|e| AgentError::ToolExecution {
                tool: descriptor.id.clone(),
                message: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(id: &str) -> ToolDescriptor {
        ToolDescriptor::new(id, "echoes its arguments", tool_fn(|args| async move { Ok(args) }))
    }

    fn calculator() -> ToolDescriptor {
        ToolDescriptor::new(
            "calculator",
            "evaluates an arithmetic expression",
            tool_fn(|args| async move {
                let expr = args["expression"].as_str().unwrap_or_default();
                // Tiny fixed-answer evaluator, enough for dispatch tests.
                let result = match expr {
                    "15*23+7" => 352,
                    _ => 0,
                };
                Ok(json!({ "result": result }))
            }),
        )
        .with_category("math")
        .with_params(vec![ToolParam::required("expression", ParamKind::String)])
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        assert!(registry.get("echo").await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_noop() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        let replacement =
            echo_tool("echo").with_display_name("replacement that should not land");
        registry.register(replacement).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get("echo").await.unwrap().display_name, "echo");
    }

    #[tokio::test]
    async fn test_register_rejects_empty_description() {
        let registry = ToolRegistry::new();
        let tool = ToolDescriptor::new("bad", "", tool_fn(|args| async move { Ok(args) }));
        assert!(matches!(
            registry.register(tool).await,
            Err(AgentError::InvalidTool(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let registry = ToolRegistry::new();
        let tool = echo_tool("  ");
        assert!(matches!(
            registry.register(tool).await,
            Err(AgentError::InvalidTool(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        assert!(registry.unregister("echo").await);
        assert!(!registry.unregister("echo").await);
        assert!(registry.get("echo").await.is_none());
    }

    #[tokio::test]
    async fn test_list_preserves_registration_order() {
        let registry = ToolRegistry::new();
        for id in ["c", "a", "b"] {
            registry.register(echo_tool(id)).await.unwrap();
        }
        let ids: Vec<String> = registry.list().await.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_by_category() {
        let registry = ToolRegistry::new();
        registry.register(calculator()).await.unwrap();
        registry.register(echo_tool("echo")).await.unwrap();
        let math = registry.by_category("math").await;
        assert_eq!(math.len(), 1);
        assert_eq!(math[0].id, "calculator");
    }

    #[tokio::test]
    async fn test_execute_validates_required_param() {
        let registry = ToolRegistry::new();
        registry.register(calculator()).await.unwrap();
        let err = registry.execute("calculator", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingParam { .. }));
    }

    #[tokio::test]
    async fn test_execute_validates_type() {
        let registry = ToolRegistry::new();
        registry.register(calculator()).await.unwrap();
        let err = registry
            .execute("calculator", json!({"expression": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_execute_validates_enum() {
        let registry = ToolRegistry::new();
        let tool = echo_tool("mode_tool").with_params(vec![ToolParam::required(
            "mode",
            ParamKind::String,
        )
        .with_allowed(vec![json!("fast"), json!("slow")])]);
        registry.register(tool).await.unwrap();

        assert!(registry
            .execute("mode_tool", json!({"mode": "fast"}))
            .await
            .is_ok());
        let err = registry
            .execute("mode_tool", json!({"mode": "medium"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EnumViolation { .. }));
    }

    #[tokio::test]
    async fn test_execute_forwards_extra_args() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        let out = registry
            .execute("echo", json!({"unexpected": true}))
            .await
            .unwrap();
        assert_eq!(out["unexpected"], json!(true));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let registry = ToolRegistry::new();
        registry.register(calculator()).await.unwrap();
        let out = registry
            .execute("calculator", json!({"expression": "15*23+7"}))
            .await
            .unwrap();
        assert_eq!(out["result"], json!(352));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_original_name() {
        let registry = ToolRegistry::new();
        let tool = echo_tool("amap:maps_weather").with_mcp(McpToolMeta {
            server_id: "amap".into(),
            server_name: "Amap".into(),
            original_name: "maps_weather".into(),
        });
        registry.register(tool).await.unwrap();

        // Both the prefixed id and the bare server-side name resolve.
        assert!(registry.resolve("amap:maps_weather").await.is_some());
        let bare = registry.resolve("maps_weather").await.unwrap();
        assert_eq!(bare.id, "amap:maps_weather");
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let registry = ToolRegistry::new();
        let tool = echo_tool("srv:lookup").with_mcp(McpToolMeta {
            server_id: "srv".into(),
            server_name: "srv".into(),
            original_name: "lookup".into(),
        });
        registry.register(tool).await.unwrap();

        let once = registry.resolve("lookup").await.unwrap();
        let twice = registry.resolve(&once.id).await.unwrap();
        assert_eq!(once.id, twice.id);
    }

    #[tokio::test]
    async fn test_null_args_ok_without_required_params() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).await.unwrap();
        assert!(registry.execute("echo", Value::Null).await.is_ok());
    }

    #[test]
    fn test_schema_json_shape() {
        let schema = calculator().schema_json();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["expression"]["type"], "string");
        assert_eq!(schema["required"][0], "expression");
    }
}
