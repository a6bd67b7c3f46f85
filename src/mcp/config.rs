//! MCP server configuration: runtime settings and the persisted document.
//!
//! The persisted document is the JSON shape external tooling reads and
//! writes (`{servers: [...], lastUpdated}`); file persistence itself lives
//! outside the core, only the model and its validation rules are here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_MCP_RETRY_ATTEMPTS, DEFAULT_MCP_RETRY_DELAY_MS, DEFAULT_MCP_TIMEOUT_SECS,
};
use crate::errors::{AgentError, Result};
use crate::mcp::transport::TransportMode;

/// Server ids are restricted to URL- and filename-safe characters.
static SERVER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]+$").expect("static pattern"));

// ---------------------------------------------------------------------------
// Runtime config
// ---------------------------------------------------------------------------

/// Connection settings for one server in the pool.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// JSON-RPC endpoint URL.
    pub url: String,
    /// Per-server key, appended to the URL as a query parameter.
    pub api_key: Option<String>,
    /// Expected response mode.
    pub transport: TransportMode,
    /// Display name (defaults to the server id).
    pub name: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Initialize-probe timeout.
    pub connect_timeout: Duration,
    /// Connection retry attempts.
    pub retry_attempts: u32,
    /// Base delay between retries (doubled per attempt).
    pub retry_delay: Duration,
}

impl McpServerConfig {
    /// Config for `url` with default timeouts and standard transport.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            transport: TransportMode::Standard,
            name: None,
            request_timeout: Duration::from_secs(DEFAULT_MCP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(10),
            retry_attempts: DEFAULT_MCP_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_MCP_RETRY_DELAY_MS),
        }
    }

    /// Set the per-server key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the transport mode.
    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set retry behavior.
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }
}

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

/// One server entry in the persisted configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    /// Stable id, matching `^[A-Za-z0-9_-]+$`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Absolute endpoint URL.
    pub server_url: String,
    /// Transport type: `standard` or `streamable-http`.
    #[serde(rename = "type")]
    pub server_type: String,
    /// Optional per-server key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Last observed status string.
    #[serde(default)]
    pub status: String,
    /// Tool count at the last check.
    #[serde(default)]
    pub tools_count: u64,
    /// When the server was last probed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    /// Entry creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Entry update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl McpServerEntry {
    /// Validate the id pattern, transport type, and URL shape.
    pub fn validate(&self) -> Result<()> {
        if !SERVER_ID_PATTERN.is_match(&self.id) {
            return Err(AgentError::InvalidConfig(format!(
                "server id '{}' must match ^[A-Za-z0-9_-]+$",
                self.id
            )));
        }
        if TransportMode::parse(&self.server_type).is_none() {
            return Err(AgentError::InvalidConfig(format!(
                "server '{}' has unknown type '{}'",
                self.id, self.server_type
            )));
        }
        let url = reqwest::Url::parse(&self.server_url).map_err(|e| {
            AgentError::InvalidConfig(format!(
                "server '{}' URL '{}' is not absolute: {}",
                self.id, self.server_url, e
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AgentError::InvalidConfig(format!(
                "server '{}' URL scheme '{}' is not http(s)",
                self.id,
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Convert the persisted entry into runtime connection settings.
    pub fn to_config(&self) -> Result<McpServerConfig> {
        self.validate()?;
        let transport =
            TransportMode::parse(&self.server_type).expect("validated transport type");
        let mut config = McpServerConfig::new(self.server_url.clone())
            .with_transport(transport)
            .with_name(if self.name.is_empty() {
                self.id.clone()
            } else {
                self.name.clone()
            });
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key.clone());
        }
        Ok(config)
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServersDocument {
    /// Configured servers.
    #[serde(default)]
    pub servers: Vec<McpServerEntry>,
    /// Last write timestamp.
    pub last_updated: DateTime<Utc>,
}

impl McpServersDocument {
    /// Validate every entry and reject duplicate ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.servers {
            entry.validate()?;
            if !seen.insert(entry.id.as_str()) {
                return Err(AgentError::InvalidConfig(format!(
                    "duplicate server id '{}'",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
