//! Task document loading.
//!
//! A value story arrives either as plain YAML or as Markdown with the
//! structured part embedded:
//!
//! 1. If the text has fenced ```` ```yaml ```` blocks, only those are parsed
//!    (concatenated in order).
//! 2. Otherwise every fenced block is stripped and Markdown headers become
//!    YAML comments, so prose-free "hybrid" files still parse.
//!
//! The parsed mapping is then normalized (legacy aliases, scalar coercion,
//! defaults) and deserialized into a validated [`ValueStory`].

use regex::Regex;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, LoadError};
use crate::story::ValueStory;

fn fenced_yaml() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```yaml[ \t]*\n(.*?)\n\s*```").expect("valid regex"))
}

fn any_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("valid regex"))
}

fn markdown_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#+.*)$").expect("valid regex"))
}

/// Extract the YAML portion of a story document.
pub fn extract_story_yaml(content: &str) -> String {
    let content = content.replace("\r\n", "\n").replace('\r', "\n");

    let blocks: Vec<&str> = fenced_yaml()
        .captures_iter(&content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if !blocks.is_empty() {
        return blocks.join("\n");
    }

    let stripped = any_fence().replace_all(&content, "");
    markdown_header().replace_all(&stripped, "# $1").into_owned()
}

/// Parse story text (YAML or Markdown) into a validated story.
pub fn parse_story(content: &str) -> Result<ValueStory, Error> {
    let yaml = extract_story_yaml(content);
    let raw: serde_yaml::Value =
        serde_yaml::from_str(&yaml).map_err(|e| LoadError::Yaml(e.to_string()))?;
    let raw: Value = serde_json::to_value(raw).map_err(|e| LoadError::Yaml(e.to_string()))?;
    let normalized = normalize(raw)?;
    story_from_value(normalized)
}

/// Read and parse a story file. I/O failures are hard errors.
pub async fn load_story(path: &Path) -> Result<ValueStory, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Loaded story document");
    parse_story(&content)
}

fn story_from_value(value: Value) -> Result<ValueStory, Error> {
    serde_json::from_value::<ValueStory>(value).map_err(|e| {
        // Invariant violations surface through serde as custom errors; keep
        // their message intact.
        Error::Load(LoadError::Schema(e.to_string()))
    })
}

/// Render a YAML scalar as a string (`1.0` → `"1.0"`).
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .filter_map(scalar_string)
        .find(|s| !s.trim().is_empty())
}

fn object(value: Option<&Value>) -> Map<String, Value> {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

fn normalize(raw: Value) -> Result<Value, LoadError> {
    let Value::Object(root) = raw else {
        return Err(LoadError::NotAMapping);
    };

    let meta = object(root.get("metadata"));
    let story_id = root
        .get("story_id")
        .and_then(scalar_string)
        .or_else(|| text_field(&meta, &["story_id"]))
        .unwrap_or_else(|| "VS-UNKNOWN".to_string());

    let metadata = json!({
        "story_id": story_id,
        "version": text_field(&meta, &["version"]).unwrap_or_else(|| "1.0".into()),
        "author": text_field(&meta, &["author"]),
        "status": text_field(&meta, &["status"]).unwrap_or_else(|| "draft".into()),
        "provider": text_field(&meta, &["provider"]).unwrap_or_else(|| "ollama".into()),
        "preferred_model": text_field(&meta, &["preferred_model"]),
        "assembled_at": meta.get("assembled_at").cloned().unwrap_or(Value::Null),
    });

    let goal_raw = object(root.get("goal"));
    let goal = json!({
        "as_a": text_field(&goal_raw, &["as_a"]).unwrap_or_else(|| "As a user".into()),
        "i_want": text_field(&goal_raw, &["i_want", "outcome_statement"]).unwrap_or_default(),
        "so_that": text_field(&goal_raw, &["so_that"]).unwrap_or_else(|| "value is created.".into()),
    });

    let mut root_out = Map::new();
    root_out.insert("metadata".into(), metadata);
    root_out.insert("goal".into(), goal);
    root_out.insert("instructions".into(), normalize_instructions(root.get("instructions")));
    root_out.insert(
        "mcp_servers".into(),
        root.get("mcp_servers")
            .filter(|v| v.is_array())
            .cloned()
            .unwrap_or_else(|| json!([])),
    );
    root_out.insert("context_manifest".into(), normalize_manifest(&root));
    if let Some(product) = root.get("product").filter(|v| v.is_object()) {
        root_out.insert("product".into(), normalize_product(product));
    }

    Ok(Value::Object(root_out))
}

fn normalize_instructions(raw: Option<&Value>) -> Value {
    let mut reasoning = "Chain-of-Thought".to_string();
    let raw_steps: Vec<Value> = match raw {
        Some(Value::Object(map)) => {
            if let Some(pattern) = text_field(map, &["reasoning_pattern"]) {
                reasoning = pattern;
            }
            map.get("execution_steps")
                .or_else(|| map.get("steps"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        }
        Some(Value::Array(list)) => list.clone(),
        _ => Vec::new(),
    };

    let steps: Vec<Value> = raw_steps
        .iter()
        .zip(1u64..)
        .filter_map(|(step, index)| {
            let step = step.as_object()?;
            let number = step
                .get("step_number")
                .or_else(|| step.get("step"))
                .and_then(Value::as_u64)
                .unwrap_or(index);
            Some(json!({
                "step_number": number,
                "action": text_field(step, &["action"]).unwrap_or_default(),
                "validation_rule": text_field(step, &["validation_rule", "rule"])
                    .unwrap_or_else(|| "Verified.".into()),
            }))
        })
        .collect();

    json!({
        "reasoning_pattern": reasoning,
        "execution_steps": steps,
    })
}

const MANIFEST_FIELDS: [&str; 8] = [
    "key",
    "description",
    "default_path",
    "search_query",
    "mcp_tool_name",
    "mcp_tool_args",
    "content",
    "error",
];

fn normalize_manifest(root: &Map<String, Value>) -> Value {
    let raw = root
        .get("context_manifest")
        .filter(|v| !v.is_null())
        .cloned()
        .or_else(|| {
            root.get("context")
                .and_then(|c| c.get("mandatory_assets"))
                .cloned()
        });

    let Some(Value::Array(items)) = raw else {
        return json!([]);
    };

    let entries: Vec<Value> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                let mut entry = Map::new();
                for field in MANIFEST_FIELDS {
                    match (field, map.get(field)) {
                        (_, None) | (_, Some(Value::Null)) => {}
                        ("mcp_tool_args", Some(args)) => {
                            entry.insert(field.into(), args.clone());
                        }
                        (_, Some(value)) => {
                            if let Some(text) = scalar_string(value) {
                                entry.insert(field.into(), Value::String(text));
                            }
                        }
                    }
                }
                Some(Value::Object(entry))
            }
            Value::Null => None,
            other => scalar_string(&other).map(|path| json!({ "default_path": path })),
        })
        .collect();

    Value::Array(entries)
}

fn normalize_product(product: &Value) -> Value {
    let map = object(Some(product));
    let mut out = Map::new();
    for (field, fallback) in [
        ("type", "Document"),
        ("format", "Markdown"),
        ("output_path", "outputs"),
    ] {
        let value = text_field(&map, &[field]).unwrap_or_else(|| fallback.to_string());
        out.insert(field.into(), Value::String(value));
    }
    for field in ["handoff_repo", "handoff_path"] {
        if let Some(value) = text_field(&map, &[field]) {
            out.insert(field.into(), Value::String(value));
        }
    }
    Value::Object(out)
}
