//! `avs validate` — Check a value story.

use anyhow::Context;
use avs_core::Strategy;
use std::path::Path;

pub async fn run(path: &Path) -> anyhow::Result<()> {
    let story = match avs_core::load_story(path).await {
        Ok(story) => story,
        Err(e) => {
            println!("❌ Validation failed for {}", path.display());
            println!("  • {e}");
            return Err(e).with_context(|| format!("{} is not a valid value story", path.display()));
        }
    };

    let count = |strategy: Strategy| {
        story
            .context_manifest
            .iter()
            .filter(|item| item.resolution().strategy() == strategy)
            .count()
    };

    println!("✅ Validation passed: {}", path.display());
    println!("  Story ID:       {}", story.metadata.story_id);
    println!("  Persona:        {}", story.goal.as_a);
    println!("  Goal:           {}", story.goal.i_want);
    println!("  Steps:          {}", story.instructions.execution_steps.len());
    println!("  Context assets: {}", story.context_manifest.len());
    println!("    Local files:  {}", count(Strategy::LocalFile));
    println!("    Web research: {}", count(Strategy::SearchQuery));
    println!("    Tool calls:   {}", count(Strategy::ToolCall));
    println!("  MCP servers:    {}", story.mcp_servers.len());
    if story.is_assembled() {
        println!("  Status:         already assembled");
    }

    Ok(())
}
