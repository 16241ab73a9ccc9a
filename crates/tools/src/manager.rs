//! Connection manager: one lazily-launched session per declared server.
//!
//! Sessions are registered in acquisition order and released together by a
//! single [`ConnectionManager::shutdown`], in reverse order. Each assembly
//! run owns its own manager; nothing is shared across documents.

use async_trait::async_trait;
use avs_core::McpServerConfig;
use avs_core::error::SessionError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{McpClient, ToolSession};

/// Starts a session for a server declaration.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, config: &McpServerConfig) -> Result<Arc<dyn ToolSession>, SessionError>;
}

/// Launches servers as child processes speaking MCP over stdio.
pub struct StdioLauncher {
    handshake_timeout: Duration,
}

impl StdioLauncher {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for StdioLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SessionLauncher for StdioLauncher {
    async fn launch(&self, config: &McpServerConfig) -> Result<Arc<dyn ToolSession>, SessionError> {
        let client = McpClient::spawn(config, self.handshake_timeout).await?;
        Ok(Arc::new(client))
    }
}

pub struct ConnectionManager {
    servers: Vec<McpServerConfig>,
    launcher: Arc<dyn SessionLauncher>,
    /// Live sessions in acquisition order.
    sessions: Mutex<Vec<(String, Arc<dyn ToolSession>)>>,
    shutdowns: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(servers: Vec<McpServerConfig>, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            servers,
            launcher,
            sessions: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Declared server names, in declaration order.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|s| s.name.as_str())
    }

    /// Return the cached session for `server`, launching it on first use.
    ///
    /// The registry lock is held while launching, so concurrent callers for
    /// the same name end up sharing one session. A failed launch leaves
    /// nothing behind and only fails this call.
    pub async fn obtain(&self, server: &str) -> Result<Arc<dyn ToolSession>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some((_, session)) = sessions.iter().find(|(name, _)| name == server) {
            return Ok(session.clone());
        }

        let config = self
            .servers
            .iter()
            .find(|s| s.name == server)
            .ok_or_else(|| SessionError::NotDeclared(server.to_string()))?;

        info!(server = %config.name, command = %config.command, "Launching MCP server");
        let session = self.launcher.launch(config).await.inspect_err(|e| {
            warn!(server = %config.name, error = %e, "MCP server failed to start");
        })?;

        sessions.push((config.name.clone(), session.clone()));
        Ok(session)
    }

    /// Release every session in reverse acquisition order.
    ///
    /// Idempotent; dead servers are ignored. Returns how many sessions were
    /// closed by this call.
    pub async fn shutdown(&self) -> usize {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.sessions.lock().await);
        let count = drained.len();
        for (name, session) in drained.into_iter().rev() {
            debug!(server = %name, "Closing MCP session");
            session.close().await;
        }
        if count > 0 {
            info!(sessions = count, "MCP sessions closed");
        }
        count
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// How many times `shutdown` has been called.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// A manager dropped with live sessions (e.g. a cancelled assembly) still
/// closes them, in reverse order, on a background task. Without a runtime the
/// sessions are simply dropped and `kill_on_drop` reaps the children.
impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let drained = std::mem::take(self.sessions.get_mut());
        if drained.is_empty() {
            return;
        }
        warn!(sessions = drained.len(), "Connection manager dropped without shutdown, closing sessions");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for (name, session) in drained.into_iter().rev() {
                    debug!(server = %name, "Closing abandoned MCP session");
                    session.close().await;
                }
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::{CallToolResult, McpToolInfo};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    /// In-process session that records what happens to it.
    pub(crate) struct MockSession {
        pub name: String,
        pub tools: Vec<String>,
        pub reply: Option<CallToolResult>,
        pub closes: StdMutex<usize>,
        pub calls: StdMutex<Vec<(String, Value)>>,
        pub journal: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolSession for MockSession {
        fn server_name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<McpToolInfo>, SessionError> {
            Ok(self
                .tools
                .iter()
                .map(|t| McpToolInfo {
                    name: t.clone(),
                    description: String::new(),
                    input_schema: Value::Null,
                })
                .collect())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Value,
        ) -> Result<CallToolResult, SessionError> {
            self.calls.lock().unwrap().push((name.to_string(), arguments));
            self.reply.clone().ok_or_else(|| SessionError::Rpc {
                server: self.name.clone(),
                code: -32603,
                message: "boom".into(),
            })
        }

        async fn close(&self) {
            *self.closes.lock().unwrap() += 1;
            self.journal.lock().unwrap().push(format!("close:{}", self.name));
        }
    }

    /// Launcher handing out [`MockSession`]s; names in `broken` fail to start.
    pub(crate) struct MockLauncher {
        pub tools: Vec<(String, Vec<String>)>,
        pub reply: Option<CallToolResult>,
        pub broken: Vec<String>,
        pub launched: StdMutex<Vec<Arc<MockSession>>>,
        pub journal: Arc<StdMutex<Vec<String>>>,
    }

    impl MockLauncher {
        pub fn new(tools: &[(&str, &[&str])], reply: Option<CallToolResult>) -> Self {
            Self {
                tools: tools
                    .iter()
                    .map(|(s, ts)| (s.to_string(), ts.iter().map(|t| t.to_string()).collect()))
                    .collect(),
                reply,
                broken: Vec::new(),
                launched: StdMutex::new(Vec::new()),
                journal: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        pub fn launches(&self) -> usize {
            self.launched.lock().unwrap().len()
        }

        pub fn session(&self, name: &str) -> Arc<MockSession> {
            self.launched
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl SessionLauncher for MockLauncher {
        async fn launch(
            &self,
            config: &McpServerConfig,
        ) -> Result<Arc<dyn ToolSession>, SessionError> {
            self.journal.lock().unwrap().push(format!("launch:{}", config.name));
            if self.broken.contains(&config.name) {
                return Err(SessionError::LaunchFailed {
                    server: config.name.clone(),
                    reason: "spawn failed".into(),
                });
            }
            let tools = self
                .tools
                .iter()
                .find(|(s, _)| *s == config.name)
                .map(|(_, t)| t.clone())
                .unwrap_or_default();
            let session = Arc::new(MockSession {
                name: config.name.clone(),
                tools,
                reply: self.reply.clone(),
                closes: StdMutex::new(0),
                calls: StdMutex::new(Vec::new()),
                journal: self.journal.clone(),
            });
            self.launched.lock().unwrap().push(session.clone());
            Ok(session)
        }
    }

    pub(crate) fn servers(names: &[&str]) -> Vec<McpServerConfig> {
        names
            .iter()
            .map(|n| McpServerConfig::new(*n, "npx", vec!["-y".into(), format!("{n}-mcp")]))
            .collect()
    }

    #[tokio::test]
    async fn obtain_caches_sessions() {
        let launcher = Arc::new(MockLauncher::new(&[], None));
        let manager = ConnectionManager::new(servers(&["a"]), launcher.clone());

        let first = manager.obtain("a").await.unwrap();
        let second = manager.obtain("a").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launches(), 1);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn undeclared_server_is_a_configuration_error() {
        let launcher = Arc::new(MockLauncher::new(&[], None));
        let manager = ConnectionManager::new(servers(&["a"]), launcher.clone());

        let err = manager.obtain("b").await.err().unwrap();
        assert_eq!(err.to_string(), "MCP Server 'b' not found in manifest.");
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn failed_launch_only_fails_that_server() {
        let mut launcher = MockLauncher::new(&[], None);
        launcher.broken.push("bad".into());
        let launcher = Arc::new(launcher);
        let manager = ConnectionManager::new(servers(&["bad", "good"]), launcher.clone());

        assert!(matches!(
            manager.obtain("bad").await,
            Err(SessionError::LaunchFailed { .. })
        ));
        assert!(manager.obtain("good").await.is_ok());
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_in_reverse_order_and_is_idempotent() {
        let launcher = Arc::new(MockLauncher::new(&[], None));
        let manager = ConnectionManager::new(servers(&["a", "b", "c"]), launcher.clone());

        manager.obtain("b").await.unwrap();
        manager.obtain("a").await.unwrap();
        manager.obtain("c").await.unwrap();

        assert_eq!(manager.shutdown().await, 3);
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(manager.shutdown().await, 0);
        assert_eq!(manager.shutdown_count(), 2);

        let journal = launcher.journal.lock().unwrap().clone();
        assert_eq!(
            journal,
            vec![
                "launch:b", "launch:a", "launch:c", "close:c", "close:a", "close:b"
            ]
        );
        for name in ["a", "b", "c"] {
            assert_eq!(*launcher.session(name).closes.lock().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn dropping_without_shutdown_still_closes_sessions() {
        let launcher = Arc::new(MockLauncher::new(&[("a", &[]), ("b", &[])], None));
        let manager = ConnectionManager::new(servers(&["a", "b"]), launcher.clone());
        manager.obtain("a").await.unwrap();
        manager.obtain("b").await.unwrap();
        drop(manager);

        for _ in 0..100 {
            if *launcher.session("a").closes.lock().unwrap() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*launcher.session("a").closes.lock().unwrap(), 1);
        assert_eq!(*launcher.session("b").closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn drop_after_shutdown_closes_nothing_twice() {
        let launcher = Arc::new(MockLauncher::new(&[("a", &[])], None));
        let manager = ConnectionManager::new(servers(&["a"]), launcher.clone());
        manager.obtain("a").await.unwrap();
        manager.shutdown().await;
        drop(manager);

        tokio::task::yield_now().await;
        assert_eq!(*launcher.session("a").closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn server_names_keep_declaration_order() {
        let launcher = Arc::new(MockLauncher::new(&[], None));
        let manager = ConnectionManager::new(servers(&["z", "a", "m"]), launcher);
        let names: Vec<&str> = manager.server_names().collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}
