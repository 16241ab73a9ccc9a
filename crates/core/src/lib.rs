//! # AVS Core
//!
//! Domain types, error definitions and progress events for assembling
//! Value Stories. Every other crate in the workspace depends inward on this
//! one.
//!
//! ## Design Philosophy
//!
//! - A [`ValueStory`] is validated whenever it is constructed, so the
//!   tool/server invariant never has to be rediscovered mid-assembly.
//! - A manifest entry's strategy is a derived tagged view
//!   ([`Resolution`]) rather than field checks scattered through callers.

pub mod error;
pub mod event;
pub mod loader;
pub mod manifest;
pub mod story;

// Re-export key types at crate root for ergonomics
pub use error::{
    AssetError, Error, LoadError, ResearchError, Result, SessionError, StoryError, ToolError,
};
pub use event::{AssemblyEvent, EventBus};
pub use loader::{extract_story_yaml, load_story, parse_story};
pub use manifest::{ContextManifestItem, Resolution, Strategy};
pub use story::{
    Goal, InstructionStep, Instructions, McpServerConfig, Metadata, Product, ValueStory,
    STATUS_ASSEMBLED,
};
