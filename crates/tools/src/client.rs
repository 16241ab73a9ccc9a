//! MCP client.
//!
//! JSON-RPC 2.0 over newline-delimited JSON. A session is normally backed by
//! a child process (`McpClient::spawn`), but any reader/writer pair works,
//! which lets tests drive the protocol over an in-memory duplex stream.

use async_trait::async_trait;
use avs_core::McpServerConfig;
use avs_core::error::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A live connection to one tool-provider server.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// The declared server name this session belongs to.
    fn server_name(&self) -> &str;

    /// List the tools the server advertises.
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, SessionError>;

    /// Call a tool. Timeouts are the caller's responsibility.
    async fn call_tool(&self, name: &str, arguments: Value)
    -> Result<CallToolResult, SessionError>;

    /// Release the session. Never fails; calling it twice is a no-op.
    async fn close(&self);
}

/// Information about a tool provided by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// The payload of a `tools/call` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// One element of a tool result's `content` array.
///
/// Only text parts matter for context assembly; images, resources and
/// anything newer are kept as `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl CallToolResult {
    /// A successful result with a single text part.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// All text parts joined with `\n`, or `None` when there are none.
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The framed byte stream plus the process behind it, if any.
struct Channel {
    server: String,
    writer: BoxedWriter,
    reader: BoxedReader,
    process: Option<Child>,
    closed: bool,
}

impl Channel {
    fn transport_error(&self, reason: impl std::fmt::Display) -> SessionError {
        SessionError::Transport {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }

    async fn send(&mut self, message: &Value) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(message).map_err(|e| self.transport_error(e))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to server stdin: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush server stdin: {e}")))
    }

    async fn notify(&mut self, method: &str) -> Result<(), SessionError> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": {} }))
            .await
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Blank lines, non-JSON output (server logs), notifications and
    /// responses to abandoned requests are skipped.
    async fn request(
        &mut self,
        id: u64,
        method: &str,
        params: Value,
        read_timeout: Option<Duration>,
    ) -> Result<Value, SessionError> {
        if self.closed {
            return Err(self.transport_error("session is closed"));
        }

        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line);
            let bytes_read = match read_timeout {
                Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                    SessionError::Timeout {
                        server: self.server.clone(),
                        method: method.to_string(),
                        timeout_secs: limit.as_secs(),
                    }
                })?,
                None => read.await,
            }
            .map_err(|e| self.transport_error(format!("failed to read server stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error("server closed stdout (process may have exited)"));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                trace!(server = %self.server, line = trimmed, "Skipping non-JSON output");
                continue;
            };

            if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                continue;
            }

            if let Some(error) = response.error {
                return Err(SessionError::Rpc {
                    server: self.server.clone(),
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.writer.shutdown().await;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill().await;
        }
    }
}

/// MCP client for one server.
pub struct McpClient {
    server: String,
    channel: Mutex<Channel>,
    request_id: AtomicU64,
    response_timeout: Duration,
    server_info: Value,
}

impl McpClient {
    /// Launch the declared command and perform the `initialize` handshake.
    ///
    /// The child inherits the current environment overlaid with the
    /// declaration's `env`. It is killed when the client is dropped.
    pub async fn spawn(
        config: &McpServerConfig,
        response_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(env) = &config.env {
            cmd.envs(env);
        }

        let mut process = cmd.spawn().map_err(|e| SessionError::LaunchFailed {
            server: config.name.clone(),
            reason: format!("{} (command: {})", e, config.command),
        })?;

        let launch_error = |what: &str| SessionError::LaunchFailed {
            server: config.name.clone(),
            reason: format!("failed to capture {what}"),
        };
        let stdin = process.stdin.take().ok_or_else(|| launch_error("stdin"))?;
        let stdout = process.stdout.take().ok_or_else(|| launch_error("stdout"))?;

        debug!(
            server = %config.name,
            command = %config.command,
            pid = process.id(),
            "MCP server process started"
        );

        Self::handshake(
            config.name.clone(),
            Box::new(stdout),
            Box::new(stdin),
            Some(process),
            response_timeout,
        )
        .await
    }

    /// Run the protocol over an existing reader/writer pair.
    pub async fn connect<R, W>(
        server: impl Into<String>,
        reader: R,
        writer: W,
        response_timeout: Duration,
    ) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::handshake(
            server.into(),
            Box::new(reader),
            Box::new(writer),
            None,
            response_timeout,
        )
        .await
    }

    /// `initialize`, then the `notifications/initialized` notification.
    async fn handshake(
        server: String,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: BoxedWriter,
        process: Option<Child>,
        response_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut channel = Channel {
            server: server.clone(),
            writer,
            reader: BufReader::new(reader),
            process,
            closed: false,
        };
        let request_id = AtomicU64::new(1);

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "avs",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let id = request_id.fetch_add(1, Ordering::SeqCst);
        let handshake = match channel
            .request(id, "initialize", params, Some(response_timeout))
            .await
        {
            Ok(result) => channel
                .notify("notifications/initialized")
                .await
                .map(|()| result),
            Err(e) => Err(e),
        };

        let result = match handshake {
            Ok(result) => result,
            Err(e) => {
                channel.close().await;
                return Err(SessionError::HandshakeFailed {
                    server,
                    reason: e.to_string(),
                });
            }
        };

        debug!(
            server = %server,
            protocol = result.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "MCP session initialized"
        );

        Ok(Self {
            server,
            channel: Mutex::new(channel),
            request_id,
            response_timeout,
            server_info: result.get("serverInfo").cloned().unwrap_or(Value::Null),
        })
    }

    /// The `serverInfo` the server reported during the handshake.
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    async fn send_request(
        &self,
        method: &str,
        params: Value,
        read_timeout: Option<Duration>,
    ) -> Result<Value, SessionError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let mut channel = self.channel.lock().await;
        channel.request(id, method, params, read_timeout).await
    }
}

#[async_trait]
impl ToolSession for McpClient {
    fn server_name(&self) -> &str {
        &self.server
    }

    /// Every advertised tool, following `nextCursor` across pages.
    async fn list_tools(&self) -> Result<Vec<McpToolInfo>, SessionError> {
        let mut tools = Vec::new();
        let mut seen_cursors = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self
                .send_request("tools/list", params, Some(self.response_timeout))
                .await?;

            if let Some(page) = result.get("tools").and_then(Value::as_array) {
                tools.extend(
                    page.iter()
                        .filter_map(|tool| serde_json::from_value::<McpToolInfo>(tool.clone()).ok()),
                );
            }

            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => {
                    if seen_cursors.iter().any(|c| c == next) {
                        warn!(server = %self.server, cursor = %next, "tools/list repeated a cursor, stopping");
                        break;
                    }
                    seen_cursors.push(next.to_string());
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, SessionError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.send_request("tools/call", params, None).await?;
        serde_json::from_value(result).map_err(|e| SessionError::Transport {
            server: self.server.clone(),
            reason: format!("malformed tools/call result: {e}"),
        })
    }

    async fn close(&self) {
        self.channel.lock().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, DuplexStream};

    /// A scripted MCP server on the far end of a duplex stream.
    ///
    /// Prefixes every response with log noise and a notification so the
    /// client has to skip them.
    async fn fake_server(stream: DuplexStream, methods: Arc<std::sync::Mutex<Vec<String>>>) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            let method = msg["method"].as_str().unwrap().to_string();
            methods.lock().unwrap().push(method.clone());
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };

            let response = match method.as_str() {
                "initialize" => json!({
                    "jsonrpc": "2.0", "id": id,
                    "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "serverInfo": { "name": "fake" }
                    }
                }),
                "tools/list" => match msg["params"]["cursor"].as_str() {
                    None => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {
                            "tools": [
                                { "name": "scrape", "description": "Scrape a page" },
                                { "name": "search" }
                            ],
                            "nextCursor": "page-2"
                        }
                    }),
                    Some("page-2") => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": { "tools": [{ "name": "crawl" }], "nextCursor": "page-2" }
                    }),
                    Some(_) => json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": { "code": -32602, "message": "bad cursor" }
                    }),
                },
                "tools/call" => match msg["params"]["name"].as_str().unwrap() {
                    "fail" => json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": { "code": -32602, "message": "unknown tool" }
                    }),
                    _ => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": { "content": [
                            { "type": "text", "text": "PAGE" },
                            { "type": "image", "data": "aGk=", "mimeType": "image/png" },
                            { "type": "text", "text": format!("args={}", msg["params"]["arguments"]) }
                        ]}
                    }),
                },
                _ => continue,
            };

            let noise = "npm warn exec some log line\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n";
            write.write_all(noise.as_bytes()).await.unwrap();
            write
                .write_all(format!("{response}\n").as_bytes())
                .await
                .unwrap();
        }
    }

    async fn connected() -> (McpClient, Arc<std::sync::Mutex<Vec<String>>>) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let methods = Arc::new(std::sync::Mutex::new(Vec::new()));
        tokio::spawn(fake_server(server_end, methods.clone()));
        let (read, write) = tokio::io::split(client_end);
        let client = McpClient::connect("fake", read, write, Duration::from_secs(5))
            .await
            .unwrap();
        (client, methods)
    }

    #[tokio::test]
    async fn handshake_then_list_tools() {
        let (client, methods) = connected().await;
        assert_eq!(client.server_name(), "fake");
        assert_eq!(client.server_info()["name"], "fake");

        let tools = client.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        // Second page repeats its own cursor; listing stops there.
        assert_eq!(names, vec!["scrape", "search", "crawl"]);
        assert_eq!(tools[0].description, "Scrape a page");

        assert_eq!(
            *methods.lock().unwrap(),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );
    }

    #[tokio::test]
    async fn call_tool_joins_text_parts() {
        let (client, _) = connected().await;
        let result = client
            .call_tool("scrape", json!({ "url": "https://example.com" }))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 3);
        assert_eq!(
            result.joined_text().unwrap(),
            "PAGE\nargs={\"url\":\"https://example.com\"}"
        );
    }

    #[tokio::test]
    async fn rpc_error_is_reported() {
        let (client, _) = connected().await;
        let err = client.call_tool("fail", json!({})).await.unwrap_err();
        match err {
            SessionError::Rpc { code, message, .. } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown tool");
            }
            other => panic!("Expected Rpc error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_calls() {
        let (client, _) = connected().await;
        client.close().await;
        client.close().await;
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_fails_handshake() {
        let (client_end, _server_end) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client_end);
        let err = McpClient::connect("mute", read, write, Duration::from_secs(30))
            .await
            .err()
            .unwrap();
        match err {
            SessionError::HandshakeFailed { server, reason } => {
                assert_eq!(server, "mute");
                assert!(reason.contains("initialize"));
            }
            other => panic!("Expected HandshakeFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_stream_fails_handshake() {
        let (client_end, server_end) = tokio::io::duplex(1024);
        drop(server_end);
        let (read, write) = tokio::io::split(client_end);
        let result = McpClient::connect("gone", read, write, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(SessionError::HandshakeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails_launch() {
        let config = McpServerConfig::new(
            "ghost",
            "avs-definitely-not-a-real-command-12345",
            vec![],
        );
        let result = McpClient::spawn(&config, Duration::from_secs(5)).await;
        match result {
            Err(SessionError::LaunchFailed { server, .. }) => assert_eq!(server, "ghost"),
            Err(other) => panic!("Expected LaunchFailed, got: {other:?}"),
            Ok(_) => panic!("Expected LaunchFailed, got a session"),
        }
    }

    #[test]
    fn unknown_content_parts_are_tolerated() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                { "type": "resource", "resource": { "uri": "file:///x" } },
                { "type": "text", "text": "only this" }
            ],
            "isError": true
        }))
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.joined_text().as_deref(), Some("only this"));
        assert_eq!(CallToolResult::default().joined_text(), None);
    }
}
