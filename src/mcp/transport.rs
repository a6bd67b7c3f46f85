//! JSON-RPC 2.0 over HTTP POST, with SSE streaming responses.
//!
//! Response handling is selected by the response `Content-Type`: plain
//! JSON-RPC envelopes resolve directly, `text/event-stream` bodies are
//! parsed frame by frame until a final frame arrives. A server configured
//! as streamable that answers a discovery call with plain JSON is
//! downgraded to standard mode once and the working mode is remembered.
//!
//! The `mcp-session-id` value is opaque: whichever source supplies it
//! first (initialize-response body or response header) wins, and the same
//! value is echoed on every subsequent request to that server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::errors::{AgentError, Result};
use crate::mcp::protocol::{
    initialize_params, methods, JsonRpcRequest, JsonRpcResponse, McpPromptInfo, McpResourceInfo,
    McpToolInfo,
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shorter timeout used for the initialize probe.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked for every non-final SSE frame.
pub type StreamHandler = dyn Fn(&Value) + Send + Sync;

// ---------------------------------------------------------------------------
// TransportMode
// ---------------------------------------------------------------------------

/// How the server is expected to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Plain JSON-RPC envelope per response.
    Standard,
    /// SSE frame stream per response.
    StreamableHttp,
}

impl TransportMode {
    /// Parse a mode string (both `-` and `_` separators accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Some(TransportMode::Standard),
            "streamable-http" | "streamable_http" => Some(TransportMode::StreamableHttp),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Standard => write!(f, "standard"),
            TransportMode::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// One server's wire connection.
pub struct HttpTransport {
    url: String,
    configured_mode: TransportMode,
    working_mode: Mutex<TransportMode>,
    session_id: Mutex<Option<String>>,
    client: reqwest::Client,
    request_timeout: Duration,
    init_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for `url` in the given mode.
    pub fn new(url: impl Into<String>, mode: TransportMode) -> Self {
        Self {
            url: url.into(),
            configured_mode: mode,
            working_mode: Mutex::new(mode),
            session_id: Mutex::new(None),
            client: reqwest::Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach the per-server key as a URL query parameter.
    pub fn with_api_key(mut self, key: &str) -> Self {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        self.url = format!("{}{}key={}", self.url, sep, key);
        self
    }

    /// Override the request and initialize timeouts.
    pub fn with_timeouts(mut self, request: Duration, init: Duration) -> Self {
        self.request_timeout = request;
        self.init_timeout = init;
        self
    }

    /// The mode requests are currently issued in (after any downgrade).
    pub fn working_mode(&self) -> TransportMode {
        *self.working_mode.lock()
    }

    /// The mode the server was configured with.
    pub fn configured_mode(&self) -> TransportMode {
        self.configured_mode
    }

    /// The session id learned so far, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Forget the session (used on disconnect).
    pub fn clear_session(&self) {
        *self.session_id.lock() = None;
    }

    /// Record a session id; the first value seen wins.
    fn learn_session(&self, value: &str) {
        let mut session = self.session_id.lock();
        if session.is_none() && !value.is_empty() {
            log::debug!("learned mcp session id for {}", self.url);
            *session = Some(value.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Request path
    // -----------------------------------------------------------------------

    /// Issue a JSON-RPC request and resolve its result.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_handler(method, params, None).await
    }

    /// Issue a JSON-RPC request, feeding intermediate SSE frames to
    /// `handler`. Applies the one-shot standard-mode downgrade on
    /// discovery calls when a streamable server answers plainly.
    pub async fn request_with_handler(
        &self,
        method: &str,
        params: Value,
        handler: Option<&StreamHandler>,
    ) -> Result<Value> {
        match self.attempt(method, params.clone(), handler).await {
            Err(err)
                if downgrade_applies(&err)
                    && self.working_mode() == TransportMode::StreamableHttp
                    && is_discovery_method(method) =>
            {
                log::warn!(
                    "server {} does not stream ({}); downgrading to standard mode",
                    self.url,
                    err
                );
                *self.working_mode.lock() = TransportMode::Standard;
                self.attempt(method, params, handler).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        method: &str,
        params: Value,
        handler: Option<&StreamHandler>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = JsonRpcRequest::new(id, method, params);

        let timeout = if method == methods::INITIALIZE {
            self.init_timeout
        } else {
            self.request_timeout
        };

        let fut = self.send_and_consume(method, &envelope, handler);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Transport(format!(
                "request '{}' timed out after {:?}",
                method, timeout
            ))),
        }
    }

    async fn send_and_consume(
        &self,
        method: &str,
        envelope: &JsonRpcRequest,
        handler: Option<&StreamHandler>,
    ) -> Result<Value> {
        let mut req = self
            .client
            .post(&self.url)
            .json(envelope)
            .header("Accept", "application/json, text/event-stream");
        if let Some(session) = self.session_id() {
            req = req.header("mcp-session-id", session);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        // Header session id can arrive on any response, including initialize.
        if let Some(session) = resp
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            self.learn_session(session);
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Transport(format!("HTTP {}: {}", status, body)));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        let result = match self.working_mode() {
            TransportMode::StreamableHttp => {
                if content_type.contains("text/event-stream") {
                    self.consume_sse(resp, handler).await
                } else {
                    // A streamable server must answer with a stream.
                    Err(AgentError::NoStreamData)
                }
            }
            TransportMode::Standard => {
                if content_type.contains("text/event-stream") {
                    self.consume_sse(resp, handler).await
                } else {
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| AgentError::Transport(e.to_string()))?;
                    parse_json_envelope(&body)
                }
            }
        }?;

        if method == methods::INITIALIZE {
            if let Some(session) = result
                .get("sessionId")
                .or_else(|| result.get("session_id"))
                .and_then(|v| v.as_str())
            {
                self.learn_session(session);
            }
        }
        Ok(result)
    }

    async fn consume_sse(
        &self,
        resp: reqwest::Response,
        handler: Option<&StreamHandler>,
    ) -> Result<Value> {
        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AgentError::Transport(e.to_string()))?;
            if let Some(resolution) =
                parser.push(&String::from_utf8_lossy(&chunk), handler)
            {
                return resolution;
            }
        }
        parser.finish()
    }

    // -----------------------------------------------------------------------
    // MCP method surface
    // -----------------------------------------------------------------------

    /// Perform the protocol handshake and return the server's capabilities.
    pub async fn initialize(&self) -> Result<Value> {
        self.request(methods::INITIALIZE, initialize_params()).await
    }

    /// Fetch the server's tool catalog.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let result = self.request(methods::TOOLS_LIST, json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(json!([]));
        serde_json::from_value(tools)
            .map_err(|e| AgentError::MalformedResponse(format!("tools/list: {}", e)))
    }

    /// Invoke a tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        handler: Option<&StreamHandler>,
    ) -> Result<Value> {
        self.request_with_handler(
            methods::TOOLS_CALL,
            json!({ "name": name, "arguments": arguments }),
            handler,
        )
        .await
    }

    /// Fetch the server's resource catalog.
    pub async fn list_resources(&self) -> Result<Vec<McpResourceInfo>> {
        let result = self.request(methods::RESOURCES_LIST, json!({})).await?;
        let resources = result.get("resources").cloned().unwrap_or(json!([]));
        serde_json::from_value(resources)
            .map_err(|e| AgentError::MalformedResponse(format!("resources/list: {}", e)))
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        self.request(methods::RESOURCES_READ, json!({ "uri": uri }))
            .await
    }

    /// Subscribe to change notifications for a resource.
    pub async fn subscribe_resource(&self, uri: &str) -> Result<Value> {
        self.request(methods::RESOURCES_SUBSCRIBE, json!({ "uri": uri }))
            .await
    }

    /// Fetch the server's prompt catalog.
    pub async fn list_prompts(&self) -> Result<Vec<McpPromptInfo>> {
        let result = self.request(methods::PROMPTS_LIST, json!({})).await?;
        let prompts = result.get("prompts").cloned().unwrap_or(json!([]));
        serde_json::from_value(prompts)
            .map_err(|e| AgentError::MalformedResponse(format!("prompts/list: {}", e)))
    }

    /// Fetch one prompt with arguments.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            methods::PROMPTS_GET,
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}

/// Whether an error on a streamable discovery call triggers the downgrade.
fn downgrade_applies(err: &AgentError) -> bool {
    matches!(
        err,
        AgentError::NoStreamData | AgentError::MalformedResponse(_)
    )
}

/// The downgrade probe applies to the handshake and the first discovery.
fn is_discovery_method(method: &str) -> bool {
    method == methods::INITIALIZE || method == methods::TOOLS_LIST
}

// ---------------------------------------------------------------------------
// Envelope and SSE parsing
// ---------------------------------------------------------------------------

/// Parse a plain JSON-RPC envelope body into its result.
pub(crate) fn parse_json_envelope(body: &str) -> Result<Value> {
    let response: JsonRpcResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::MalformedResponse(format!("not a JSON-RPC envelope: {}", e)))?;
    if let Some(err) = response.error {
        return Err(AgentError::McpError {
            code: err.code,
            message: err.message,
        });
    }
    response
        .result
        .ok_or_else(|| AgentError::MalformedResponse("envelope has neither result nor error".into()))
}

/// Incremental SSE frame parser with a carry-over line buffer.
///
/// Frames may be split across chunks; only complete lines are consumed.
/// Tolerates both strict SSE (`data:`-prefixed) lines and servers that
/// emit bare JSON lines.
pub(crate) struct SseParser {
    buffer: String,
    last_payload: Option<Value>,
}

impl SseParser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: String::new(),
            last_payload: None,
        }
    }

    /// Feed a chunk. Returns `Some` when a frame produced a final
    /// resolution (success or failure).
    pub(crate) fn push(
        &mut self,
        chunk: &str,
        handler: Option<&StreamHandler>,
    ) -> Option<Result<Value>> {
        self.buffer.push_str(chunk);
        while let Some(nl) = self.buffer.find('\n') {
            let line = self.buffer[..nl].trim_end_matches('\r').to_string();
            self.buffer = self.buffer[nl + 1..].to_string();
            if let Some(resolution) = self.handle_line(&line, handler) {
                return Some(resolution);
            }
        }
        None
    }

    /// Resolution once the stream has ended without a final frame.
    pub(crate) fn finish(&mut self) -> Result<Value> {
        // A trailing unterminated line still counts.
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(resolution) = self.handle_line(line.trim_end(), None) {
                return resolution;
            }
        }
        match self.last_payload.take() {
            Some(payload) => Ok(payload),
            None => Err(AgentError::NoStreamData),
        }
    }

    fn handle_line(
        &mut self,
        line: &str,
        handler: Option<&StreamHandler>,
    ) -> Option<Result<Value>> {
        let payload = if let Some(rest) = line.strip_prefix("data:") {
            rest.trim()
        } else if line.starts_with('{') {
            // Some servers emit bare JSON lines without SSE prefixes.
            line
        } else {
            // event:/id:/comment/blank lines carry no payload.
            return None;
        };

        if payload.is_empty() || payload == "[DONE]" {
            return None;
        }
        let Ok(frame) = serde_json::from_str::<Value>(payload) else {
            return None;
        };
        if let Some(err) = frame.get("error").filter(|e| !e.is_null()) {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32000);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error")
                .to_string();
            return Some(Err(AgentError::McpError { code, message }));
        }

        let is_final = frame.get("type").and_then(|t| t.as_str()) == Some("final")
            || frame.get("final").and_then(|f| f.as_bool()) == Some(true)
            || frame.get("result").is_some();
        if is_final {
            let value = frame.get("result").cloned().unwrap_or(frame);
            return Some(Ok(value));
        }

        if let Some(handler) = handler {
            handler(&frame);
        }
        self.last_payload = Some(frame);
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mode_parse() {
        assert_eq!(TransportMode::parse("standard"), Some(TransportMode::Standard));
        assert_eq!(
            TransportMode::parse("streamable-http"),
            Some(TransportMode::StreamableHttp)
        );
        assert_eq!(
            TransportMode::parse("STREAMABLE_HTTP"),
            Some(TransportMode::StreamableHttp)
        );
        assert_eq!(TransportMode::parse("websocket"), None);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(TransportMode::Standard.to_string(), "standard");
        assert_eq!(TransportMode::StreamableHttp.to_string(), "streamable-http");
    }

    #[test]
    fn test_api_key_placed_on_url() {
        let t = HttpTransport::new("https://mcp.example.com/rpc", TransportMode::Standard)
            .with_api_key("s3cret");
        assert!(t.url.ends_with("?key=s3cret"));

        let t = HttpTransport::new("https://mcp.example.com/rpc?v=1", TransportMode::Standard)
            .with_api_key("s3cret");
        assert!(t.url.ends_with("&key=s3cret"));
    }

    #[test]
    fn test_session_first_writer_wins() {
        let t = HttpTransport::new("https://x.example/rpc", TransportMode::Standard);
        assert!(t.session_id().is_none());
        t.learn_session("first");
        t.learn_session("second");
        assert_eq!(t.session_id().as_deref(), Some("first"));
        t.clear_session();
        assert!(t.session_id().is_none());
    }

    #[test]
    fn test_parse_json_envelope_result() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        let result = parse_json_envelope(body).unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn test_parse_json_envelope_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad params"}}"#;
        let err = parse_json_envelope(body).unwrap_err();
        match err {
            AgentError::McpError { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_envelope_garbage() {
        assert!(matches!(
            parse_json_envelope("<html>not json</html>"),
            Err(AgentError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_sse_final_frame_with_result() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push("data: {\"result\":{\"answer\":42}}\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution["answer"], 42);
    }

    #[test]
    fn test_sse_final_flag_without_result() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push("data: {\"final\":true,\"content\":\"done\"}\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution["content"], "done");
    }

    #[test]
    fn test_sse_type_final() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push("data: {\"type\":\"final\",\"content\":\"x\"}\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution["content"], "x");
    }

    #[test]
    fn test_sse_error_frame() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push(
                "data: {\"error\":{\"code\":-32000,\"message\":\"boom\"}}\n",
                None,
            )
            .unwrap();
        assert!(matches!(resolution, Err(AgentError::McpError { .. })));
    }

    #[test]
    fn test_sse_done_only_is_no_data() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: [DONE]\n", None).is_none());
        assert!(matches!(parser.finish(), Err(AgentError::NoStreamData)));
    }

    #[test]
    fn test_sse_empty_stream_is_no_data() {
        let mut parser = SseParser::new();
        assert!(matches!(parser.finish(), Err(AgentError::NoStreamData)));
    }

    #[test]
    fn test_sse_intermediate_frames_reach_handler() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = move |frame: &Value| {
            seen_clone.lock().push(frame.clone());
        };

        let mut parser = SseParser::new();
        assert!(parser
            .push("data: {\"type\":\"progress\",\"pct\":50}\n", Some(&handler))
            .is_none());
        let resolution = parser
            .push("data: {\"result\":\"finished\"}\n", Some(&handler))
            .unwrap()
            .unwrap();
        assert_eq!(resolution, "finished");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0]["pct"], 50);
    }

    #[test]
    fn test_sse_frame_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: {\"resu", None).is_none());
        let resolution = parser.push("lt\":{\"ok\":1}}\n", None).unwrap().unwrap();
        assert_eq!(resolution["ok"], 1);
    }

    #[test]
    fn test_sse_bare_json_lines() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push("{\"result\":{\"bare\":true}}\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution["bare"], true);
    }

    #[test]
    fn test_sse_ignores_event_and_id_fields() {
        let mut parser = SseParser::new();
        assert!(parser.push("event: message\nid: 3\n", None).is_none());
        let resolution = parser
            .push("data: {\"result\":\"ok\"}\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution, "ok");
    }

    #[test]
    fn test_sse_stream_without_final_resolves_last_payload() {
        let mut parser = SseParser::new();
        assert!(parser
            .push("data: {\"type\":\"progress\",\"pct\":10}\n", None)
            .is_none());
        assert!(parser
            .push("data: {\"type\":\"progress\",\"pct\":90}\n", None)
            .is_none());
        let resolution = parser.finish().unwrap();
        assert_eq!(resolution["pct"], 90);
    }

    #[test]
    fn test_sse_crlf_lines() {
        let mut parser = SseParser::new();
        let resolution = parser
            .push("data: {\"result\":\"crlf\"}\r\n", None)
            .unwrap()
            .unwrap();
        assert_eq!(resolution, "crlf");
    }

    #[test]
    fn test_downgrade_predicates() {
        assert!(downgrade_applies(&AgentError::NoStreamData));
        assert!(downgrade_applies(&AgentError::MalformedResponse("x".into())));
        assert!(!downgrade_applies(&AgentError::Transport("x".into())));
        assert!(is_discovery_method(methods::INITIALIZE));
        assert!(is_discovery_method(methods::TOOLS_LIST));
        assert!(!is_discovery_method(methods::TOOLS_CALL));
    }

    // -- end-to-end against a canned local HTTP server ----------------------

    fn http_request_complete(data: &[u8]) -> bool {
        let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        data.len() >= header_end + 4 + content_length
    }

    /// Serve every request with the same canned response body.
    async fn spawn_canned_server(content_type: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut data = Vec::new();
                    let mut buf = [0u8; 4096];
                    while !http_request_complete(&data) {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => data.extend_from_slice(&buf[..n]),
                        }
                    }
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        content_type,
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_streamable_server_answering_json_downgrades_to_standard() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","sessionId":"sess-1"}}"#;
        let url = spawn_canned_server("application/json", body).await;

        let transport = HttpTransport::new(url, TransportMode::StreamableHttp)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        assert_eq!(transport.working_mode(), TransportMode::StreamableHttp);

        // First attempt sees plain JSON where a stream was expected, the
        // retry in standard mode succeeds, and the mode sticks.
        let result = transport.initialize().await.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(transport.working_mode(), TransportMode::Standard);
        assert_eq!(transport.configured_mode(), TransportMode::StreamableHttp);

        // The session id came from the initialize body, first writer wins.
        assert_eq!(transport.session_id().as_deref(), Some("sess-1"));

        // Later calls are issued in standard mode directly.
        let again = transport.request(methods::TOOLS_LIST, json!({})).await;
        assert!(again.is_ok());
        assert_eq!(transport.working_mode(), TransportMode::Standard);
    }

    #[tokio::test]
    async fn test_standard_mode_accepts_event_stream_response() {
        let body = concat!(
            "data: {\"type\":\"progress\",\"pct\":10}\n\n",
            "data: {\"result\":{\"tools\":[]}}\n\n",
            "data: [DONE]\n\n",
        );
        let url = spawn_canned_server("text/event-stream", body).await;

        let transport = HttpTransport::new(url, TransportMode::Standard)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let result = transport.request(methods::TOOLS_LIST, json!({})).await.unwrap();
        assert_eq!(result["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_streamable_server_consumes_stream() {
        let body = concat!(
            "data: {\"type\":\"final\",\"content\":\"streamed\"}\n\n",
            "data: [DONE]\n\n",
        );
        let url = spawn_canned_server("text/event-stream", body).await;

        let transport = HttpTransport::new(url, TransportMode::StreamableHttp)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let result = transport
            .request(methods::TOOLS_CALL, json!({"name": "x", "arguments": {}}))
            .await
            .unwrap();
        assert_eq!(result["content"], "streamed");
        assert_eq!(transport.working_mode(), TransportMode::StreamableHttp);
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_from_live_server() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#;
        let url = spawn_canned_server("application/json", body).await;

        let transport = HttpTransport::new(url, TransportMode::Standard)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let err = transport
            .request(methods::PROMPTS_LIST, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::McpError { code: -32601, .. }));
    }
}
