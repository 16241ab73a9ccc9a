//! Error types for the AVS domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum. Per-entry failures
//! (sessions, tools, research, assets) are turned into entry content by the
//! assembler; only [`StoryError`] and [`LoadError`] reach the caller as hard
//! failures.

use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all AVS operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Document errors ---
    #[error("Invalid value story: {0}")]
    Story(#[from] StoryError),

    #[error("Failed to load value story: {0}")]
    Load(#[from] LoadError),

    // --- Output ---
    #[error("Failed to write briefcase to {path}: {reason}")]
    Output { path: PathBuf, reason: String },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Violations of the document-level invariants, detected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoryError {
    #[error(
        "Context Manifest contains MCP tool calls, but no 'mcp_servers' are defined. \
         The Agent will have 'Context Blindness' for these items."
    )]
    MissingToolServers,

    #[error("MCP server name '{0}' is declared more than once")]
    DuplicateServer(String),

    #[error("metadata.story_id cannot be empty")]
    EmptyStoryId,

    #[error("metadata.story_id '{0}' cannot be used as a file name (no path separators, '.' or '..')")]
    UnsafeStoryId(String),

    #[error("goal.i_want cannot be empty")]
    EmptyGoal,

    #[error("instructions.execution_steps must contain at least one step")]
    NoExecutionSteps,
}

/// Failures reading or decoding a task document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Malformed YAML: {0}")]
    Yaml(String),

    #[error("Document does not contain a value story mapping")]
    NotAMapping,

    #[error("Document does not match the value story schema: {0}")]
    Schema(String),
}

/// Tool-provider session failures.
///
/// `NotDeclared` is a configuration error; `LaunchFailed` and
/// `HandshakeFailed` are connection errors scoped to one server.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("MCP Server '{0}' not found in manifest.")]
    NotDeclared(String),

    #[error("Failed to launch MCP server '{server}': {reason}")]
    LaunchFailed { server: String, reason: String },

    #[error("MCP server '{server}' initialization failed: {reason}")]
    HandshakeFailed { server: String, reason: String },

    #[error("Transport error on MCP server '{server}': {reason}")]
    Transport { server: String, reason: String },

    #[error("MCP server '{server}' did not answer '{method}' within {timeout_secs}s")]
    Timeout {
        server: String,
        method: String,
        timeout_secs: u64,
    },

    #[error("MCP server '{server}' returned error [{code}] {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
}

/// Remote tool invocation failures.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("No MCP servers found that provide the tool '{0}'.")]
    NoServer(String),

    #[error("Error calling MCP tool '{tool_name}' on server '{server}': {reason}")]
    CallFailed {
        tool_name: String,
        server: String,
        reason: String,
    },

    #[error(
        "Error calling MCP tool '{tool_name}' on server '{server}': timed out after {timeout_secs}s"
    )]
    Timeout {
        tool_name: String,
        server: String,
        timeout_secs: u64,
    },
}

/// Research backend failures.
#[derive(Debug, Clone, Error)]
pub enum ResearchError {
    #[error("Research backend '{0}' is not configured (missing credential)")]
    NotConfigured(String),

    /// Rate limits, timeouts and connection errors: worth retrying.
    #[error("[{backend}] {detail}")]
    Transient { backend: String, detail: String },

    /// Bad request, auth failure, not found, empty answer: move on.
    #[error("[{backend}] {detail}")]
    Rejected { backend: String, detail: String },

    #[error("Web research failed after trying {backends}. Primary failure detail: {detail}")]
    Exhausted { backends: String, detail: String },
}

impl ResearchError {
    /// Whether the failure should be retried against the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Local asset resolution failures.
#[derive(Debug, Clone, Error)]
pub enum AssetError {
    #[error("{0} not found.")]
    NotFound(String),

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Reading {path} timed out after {timeout_secs}s")]
    Timeout { path: PathBuf, timeout_secs: u64 },
}
