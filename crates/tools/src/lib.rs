//! Tool-provider plumbing for AVS.
//!
//! - [`client`]: a JSON-RPC 2.0 client speaking MCP over a child process's
//!   stdin/stdout.
//! - [`manager`]: launches and caches one session per declared server and
//!   releases them all in a single shutdown.
//! - [`router`]: finds which declared server advertises a tool and calls it.
//! - [`file_read`]: resolves local file assets relative to the task document.

pub mod client;
pub mod file_read;
pub mod manager;
pub mod router;

pub use client::{CallToolResult, ContentPart, McpClient, McpToolInfo, ToolSession};
pub use file_read::LocalAssetResolver;
pub use manager::{ConnectionManager, SessionLauncher, StdioLauncher};
pub use router::ToolRouter;
