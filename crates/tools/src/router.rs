//! Tool invocation router.
//!
//! Finds which declared server advertises a tool and calls it there. Every
//! failure comes back as text the assembler can store in the manifest entry;
//! nothing here panics or aborts the run.

use avs_core::error::ToolError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manager::ConnectionManager;

pub struct ToolRouter {
    manager: Arc<ConnectionManager>,
    call_timeout: Duration,
}

impl ToolRouter {
    pub fn new(manager: Arc<ConnectionManager>, call_timeout: Duration) -> Self {
        Self {
            manager,
            call_timeout,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Call `tool` on `server` and return its text, or the error text.
    pub async fn invoke(&self, server: &str, tool: &str, arguments: Value) -> String {
        match self.try_invoke(server, tool, arguments).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }

    /// Call `tool` on `server`.
    ///
    /// A result without text parts is not an error; it yields a warning
    /// string instead. A result flagged `isError` is.
    pub async fn try_invoke(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<String, ToolError> {
        let failed = |reason: String| ToolError::CallFailed {
            tool_name: tool.to_string(),
            server: server.to_string(),
            reason,
        };

        let session = self
            .manager
            .obtain(server)
            .await
            .map_err(|e| failed(e.to_string()))?;

        debug!(server, tool, "Calling MCP tool");
        let result = tokio::time::timeout(self.call_timeout, session.call_tool(tool, arguments))
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: tool.to_string(),
                server: server.to_string(),
                timeout_secs: self.call_timeout.as_secs(),
            })?
            .map_err(|e| failed(e.to_string()))?;

        let text = result.joined_text();
        if result.is_error {
            return Err(failed(
                text.unwrap_or_else(|| "tool reported an error".to_string()),
            ));
        }
        Ok(text.unwrap_or_else(|| format!("Warning: Tool '{tool}' returned no text content.")))
    }

    /// First declared server, in declaration order, that advertises `tool`.
    ///
    /// Servers that fail to start or to list their tools are skipped.
    pub async fn discover(&self, tool: &str) -> Option<String> {
        for server in self.manager.server_names() {
            let session = match self.manager.obtain(server).await {
                Ok(session) => session,
                Err(e) => {
                    warn!(server, error = %e, "Skipping server during tool discovery");
                    continue;
                }
            };
            match session.list_tools().await {
                Ok(tools) if tools.iter().any(|t| t.name == tool) => {
                    info!(server, tool, "Tool discovered");
                    return Some(server.to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(server, error = %e, "Failed to list tools, skipping server");
                }
            }
        }
        None
    }

    /// Discover a server for `tool` and call it there.
    pub async fn execute(&self, tool: &str, arguments: Value) -> Result<String, ToolError> {
        let server = self
            .discover(tool)
            .await
            .ok_or_else(|| ToolError::NoServer(tool.to_string()))?;
        self.try_invoke(&server, tool, arguments).await
    }
}
