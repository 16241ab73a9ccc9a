//! The Value Story document: goal, instructions, tool servers and context
//! manifest.
//!
//! Every way of obtaining a [`ValueStory`] (constructor or deserialization)
//! runs [`ValueStory::validate`], so an invalid document never reaches the
//! assembler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::StoryError;
use crate::manifest::ContextManifestItem;

/// Status stamped on a document once assembly has run.
pub const STATUS_ASSEMBLED: &str = "assembled";

/// Administrative tracking for a value story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique identifier (e.g. `VS-001`).
    pub story_id: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub author: Option<String>,

    /// Lifecycle status: draft, active, archived, assembled.
    #[serde(default = "default_status")]
    pub status: String,

    /// LLM backend for the downstream run (e.g. `ollama`, `google-gemini`).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub preferred_model: Option<String>,

    /// Set by assembly. Its presence alone marks the document as a briefcase.
    #[serde(default)]
    pub assembled_at: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "1.0".into()
}
fn default_status() -> String {
    "draft".into()
}
fn default_provider() -> String {
    "ollama".into()
}

impl Metadata {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            version: default_version(),
            author: None,
            status: default_status(),
            provider: default_provider(),
            preferred_model: None,
            assembled_at: None,
        }
    }
}

/// The persona, outcome and business value of the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub as_a: String,
    pub i_want: String,
    pub so_that: String,
}

impl Goal {
    /// Build a goal, normalizing the persona to start with "As a".
    pub fn new(as_a: impl Into<String>, i_want: impl Into<String>, so_that: impl Into<String>) -> Self {
        Self {
            as_a: normalize_persona(as_a.into()),
            i_want: i_want.into(),
            so_that: so_that.into(),
        }
    }
}

fn normalize_persona(as_a: String) -> String {
    if as_a.to_lowercase().starts_with("as a") {
        as_a
    } else {
        format!("As a {as_a}")
    }
}

/// One step of the execution logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionStep {
    /// 1-indexed position.
    pub step_number: u32,
    pub action: String,
    pub validation_rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default = "default_reasoning_pattern")]
    pub reasoning_pattern: String,
    pub execution_steps: Vec<InstructionStep>,
}

fn default_reasoning_pattern() -> String {
    "Chain-of-Thought".into()
}

impl Instructions {
    /// Build instructions from `(action, validation_rule)` pairs, numbered from 1.
    pub fn from_steps<A, V>(steps: impl IntoIterator<Item = (A, V)>) -> Self
    where
        A: Into<String>,
        V: Into<String>,
    {
        let execution_steps = steps
            .into_iter()
            .zip(1u32..)
            .map(|((action, rule), step_number)| InstructionStep {
                step_number,
                action: action.into(),
                validation_rule: rule.into(),
            })
            .collect();
        Self {
            reasoning_pattern: default_reasoning_pattern(),
            execution_steps,
        }
    }
}

/// Launch declaration for an ephemeral MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Logical name, unique within a document.
    pub name: String,

    /// Launch command (e.g. `npx`, `uvx`).
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Overlay on top of the inherited process environment.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: None,
        }
    }
}

/// The deliverable and its handoff target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "type", default = "default_product_type")]
    pub kind: String,

    #[serde(default = "default_product_format")]
    pub format: String,

    #[serde(default = "default_output_path")]
    pub output_path: String,

    #[serde(default)]
    pub handoff_repo: Option<String>,

    #[serde(default)]
    pub handoff_path: Option<String>,
}

fn default_product_type() -> String {
    "Document".into()
}
fn default_product_format() -> String {
    "Markdown".into()
}
fn default_output_path() -> String {
    "outputs".into()
}

impl Default for Product {
    fn default() -> Self {
        Self {
            kind: default_product_type(),
            format: default_product_format(),
            output_path: default_output_path(),
            handoff_repo: None,
            handoff_path: None,
        }
    }
}

/// The story id names the briefcase file, so it must be one path component.
fn is_file_name_safe(id: &str) -> bool {
    !matches!(id, "." | "..") && !id.chars().any(|c| matches!(c, '/' | '\\') || c.is_control())
}

/// The top-level unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoryDraft")]
pub struct ValueStory {
    pub metadata: Metadata,
    pub goal: Goal,
    pub instructions: Instructions,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    pub context_manifest: Vec<ContextManifestItem>,
    #[serde(default)]
    pub product: Product,
}

/// Unvalidated shape used by deserialization.
#[derive(Deserialize)]
struct StoryDraft {
    metadata: Metadata,
    goal: Goal,
    instructions: Instructions,
    #[serde(default)]
    mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    context_manifest: Vec<ContextManifestItem>,
    #[serde(default)]
    product: Product,
}

impl TryFrom<StoryDraft> for ValueStory {
    type Error = StoryError;

    fn try_from(draft: StoryDraft) -> Result<Self, Self::Error> {
        let goal = Goal::new(draft.goal.as_a, draft.goal.i_want, draft.goal.so_that);
        ValueStory::new(
            draft.metadata,
            goal,
            draft.instructions,
            draft.mcp_servers,
            draft.context_manifest,
            draft.product,
        )
    }
}

impl ValueStory {
    /// Construct and validate a story.
    pub fn new(
        metadata: Metadata,
        goal: Goal,
        instructions: Instructions,
        mcp_servers: Vec<McpServerConfig>,
        context_manifest: Vec<ContextManifestItem>,
        product: Product,
    ) -> Result<Self, StoryError> {
        let story = Self {
            metadata,
            goal,
            instructions,
            mcp_servers,
            context_manifest,
            product,
        };
        story.validate()?;
        Ok(story)
    }

    /// Check the document invariants.
    pub fn validate(&self) -> Result<(), StoryError> {
        if self.metadata.story_id.trim().is_empty() {
            return Err(StoryError::EmptyStoryId);
        }
        if !is_file_name_safe(&self.metadata.story_id) {
            return Err(StoryError::UnsafeStoryId(self.metadata.story_id.clone()));
        }
        if self.goal.i_want.trim().is_empty() {
            return Err(StoryError::EmptyGoal);
        }
        if self.instructions.execution_steps.is_empty() {
            return Err(StoryError::NoExecutionSteps);
        }
        self.validate_tool_servers()
    }

    /// Tool calls need at least one declared server; server names are unique.
    pub fn validate_tool_servers(&self) -> Result<(), StoryError> {
        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if !seen.insert(server.name.as_str()) {
                return Err(StoryError::DuplicateServer(server.name.clone()));
            }
        }
        if self.has_tool_calls() && self.mcp_servers.is_empty() {
            return Err(StoryError::MissingToolServers);
        }
        Ok(())
    }

    pub fn has_tool_calls(&self) -> bool {
        self.context_manifest.iter().any(|item| item.declares_tool_call())
    }

    /// Whether the story has already been packaged with context.
    pub fn is_assembled(&self) -> bool {
        self.metadata.assembled_at.is_some()
    }

    /// Stamp the completion metadata.
    pub fn mark_assembled(&mut self, at: DateTime<Utc>) {
        self.metadata.assembled_at = Some(at);
        self.metadata.status = STATUS_ASSEMBLED.to_string();
    }

    pub fn server(&self, name: &str) -> Option<&McpServerConfig> {
        self.mcp_servers.iter().find(|s| s.name == name)
    }

    /// Parse a structured YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, crate::error::LoadError> {
        serde_yaml::from_str(yaml).map_err(|e| crate::error::LoadError::Schema(e.to_string()))
    }

    pub fn to_yaml_string(&self) -> Result<String, crate::error::Error> {
        serde_yaml::to_string(self).map_err(|e| crate::error::Error::Internal(e.to_string()))
    }
}
