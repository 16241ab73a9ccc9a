//! Context manifest entries and their resolution strategy.
//!
//! An entry carries optional fields for three strategies. The active one is
//! derived as a [`Resolution`] with a fixed priority: tool call, then search
//! query, then local file. An entry that sets more than one field is resolved
//! by the highest-priority strategy only.

use serde::{Deserialize, Serialize};

/// A single asset requirement in a value story.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextManifestItem {
    /// Unique label for the asset.
    #[serde(default)]
    pub key: Option<String>,

    /// Human-readable purpose of this asset.
    #[serde(default)]
    pub description: Option<String>,

    /// Local file path for injection.
    #[serde(default)]
    pub default_path: Option<String>,

    /// Grounding query for live web research.
    #[serde(default)]
    pub search_query: Option<String>,

    /// MCP tool to invoke (e.g. `scrape`).
    #[serde(default)]
    pub mcp_tool_name: Option<String>,

    /// Arguments for the MCP tool.
    #[serde(default)]
    pub mcp_tool_args: Option<serde_json::Value>,

    /// The asset text, populated during assembly.
    #[serde(default)]
    pub content: Option<String>,

    /// Set when `content` holds failure text rather than the asset. Such an
    /// entry is resolved again on the next assembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which strategy resolves an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ToolCall,
    SearchQuery,
    LocalFile,
    None,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ToolCall => "tool",
            Self::SearchQuery => "research",
            Self::LocalFile => "file",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// The resolved view of an entry: exactly one active strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    ToolCall {
        tool_name: &'a str,
        arguments: Option<&'a serde_json::Value>,
    },
    SearchQuery(&'a str),
    LocalFile(&'a str),
    Unresolvable,
}

impl Resolution<'_> {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::ToolCall { .. } => Strategy::ToolCall,
            Self::SearchQuery(_) => Strategy::SearchQuery,
            Self::LocalFile(_) => Strategy::LocalFile,
            Self::Unresolvable => Strategy::None,
        }
    }

    /// Tool arguments as an object, defaulting to `{}`.
    ///
    /// MCP `tools/call` only accepts an object; anything else is dropped
    /// with a warning.
    pub fn tool_arguments(&self) -> serde_json::Value {
        match self {
            Self::ToolCall {
                arguments: Some(args @ serde_json::Value::Object(_)),
                ..
            } => serde_json::Value::clone(args),
            Self::ToolCall {
                tool_name,
                arguments: Some(args),
            } if !args.is_null() => {
                tracing::warn!(
                    tool = %tool_name,
                    arguments = %args,
                    "mcp_tool_args is not a mapping, calling the tool with no arguments"
                );
                serde_json::Value::Object(serde_json::Map::new())
            }
            _ => serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Treat blank strings the same as an absent field.
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ContextManifestItem {
    /// Entry that injects a local file.
    pub fn file(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            default_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Entry that runs a research query.
    pub fn search(key: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            search_query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Entry that calls an MCP tool.
    pub fn tool(key: impl Into<String>, tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            key: Some(key.into()),
            mcp_tool_name: Some(tool_name.into()),
            mcp_tool_args: Some(args),
            ..Self::default()
        }
    }

    /// Classify the entry: tool > search > file.
    pub fn resolution(&self) -> Resolution<'_> {
        if let Some(tool_name) = present(&self.mcp_tool_name) {
            return Resolution::ToolCall {
                tool_name,
                arguments: self.mcp_tool_args.as_ref(),
            };
        }
        if let Some(query) = present(&self.search_query) {
            return Resolution::SearchQuery(query);
        }
        if let Some(path) = present(&self.default_path) {
            return Resolution::LocalFile(path);
        }
        Resolution::Unresolvable
    }

    pub fn declares_tool_call(&self) -> bool {
        present(&self.mcp_tool_name).is_some()
    }

    /// Whether assembly already filled this entry with the asset itself.
    pub fn is_populated(&self) -> bool {
        self.error.is_none() && self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Store resolved content, clearing any earlier failure.
    pub fn record_content(&mut self, text: String) {
        self.content = Some(text);
        self.error = None;
    }

    /// Store failure text in `content` and flag the entry as failed.
    pub fn record_failure(&mut self, text: String) {
        self.error = Some(text.clone());
        self.content = Some(text);
    }

    /// Label used in progress output: key, else the strategy's target.
    pub fn label(&self) -> String {
        if let Some(key) = present(&self.key) {
            return key.to_string();
        }
        match self.resolution() {
            Resolution::ToolCall { tool_name, .. } => tool_name.to_string(),
            Resolution::SearchQuery(_) => "Web Search".to_string(),
            Resolution::LocalFile(path) => std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string()),
            Resolution::Unresolvable => "(unnamed)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_wins_over_search_and_file() {
        let item = ContextManifestItem {
            default_path: Some("notes.txt".into()),
            search_query: Some("rust async".into()),
            mcp_tool_name: Some("scrape".into()),
            ..Default::default()
        };
        assert_eq!(item.resolution().strategy(), Strategy::ToolCall);
    }

    #[test]
    fn search_wins_over_file() {
        let item = ContextManifestItem {
            default_path: Some("notes.txt".into()),
            search_query: Some("rust async".into()),
            ..Default::default()
        };
        for _ in 0..3 {
            assert_eq!(item.resolution(), Resolution::SearchQuery("rust async"));
        }
    }

    #[test]
    fn blank_fields_are_ignored() {
        let item = ContextManifestItem {
            mcp_tool_name: Some("  ".into()),
            default_path: Some("notes.txt".into()),
            ..Default::default()
        };
        assert_eq!(item.resolution(), Resolution::LocalFile("notes.txt"));
        assert!(!item.declares_tool_call());
    }

    #[test]
    fn empty_entry_is_unresolvable() {
        let item = ContextManifestItem::default();
        assert_eq!(item.resolution(), Resolution::Unresolvable);
        assert_eq!(item.label(), "(unnamed)");
    }

    #[test]
    fn tool_arguments_default_to_empty_object() {
        let item = ContextManifestItem {
            mcp_tool_name: Some("scrape".into()),
            ..Default::default()
        };
        assert_eq!(item.resolution().tool_arguments(), json!({}));

        let item = ContextManifestItem::tool("page", "scrape", json!({"url": "x"}));
        assert_eq!(item.resolution().tool_arguments(), json!({"url": "x"}));
    }

    #[test]
    fn non_object_tool_arguments_become_empty_object() {
        for args in [json!("https://x"), json!(["a", "b"]), json!(42)] {
            let item = ContextManifestItem::tool("page", "scrape", args);
            assert_eq!(item.resolution().tool_arguments(), json!({}));
        }
    }

    #[test]
    fn failure_text_does_not_count_as_populated() {
        let mut item = ContextManifestItem::file("notes", "notes.txt");
        item.record_failure("Warning: notes.txt not found.".into());
        assert_eq!(item.content.as_deref(), Some("Warning: notes.txt not found."));
        assert!(!item.is_populated());

        item.record_content("hello".into());
        assert_eq!(item.error, None);
        assert!(item.is_populated());
    }

    #[test]
    fn error_flag_is_omitted_until_set() {
        let mut item = ContextManifestItem::file("notes", "notes.txt");
        item.record_content("hello".into());
        let yaml = serde_yaml::to_string(&item).unwrap();
        assert!(!yaml.contains("error"));

        item.record_failure("Warning: notes.txt not found.".into());
        let back: ContextManifestItem =
            serde_yaml::from_str(&serde_yaml::to_string(&item).unwrap()).unwrap();
        assert_eq!(back.error.as_deref(), Some("Warning: notes.txt not found."));
    }

    #[test]
    fn label_falls_back_to_target() {
        let item = ContextManifestItem {
            default_path: Some("docs/notes.txt".into()),
            ..Default::default()
        };
        assert_eq!(item.label(), "notes.txt");

        let item = ContextManifestItem::search("market", "ev charging trends");
        assert_eq!(item.label(), "market");
    }

    #[test]
    fn populated_requires_non_empty_content() {
        let mut item = ContextManifestItem::file("a", "notes.txt");
        assert!(!item.is_populated());
        item.content = Some(String::new());
        assert!(!item.is_populated());
        item.content = Some("hello".into());
        assert!(item.is_populated());
    }
}
