//! Writing assembled stories next to their source document.

use avs_core::ValueStory;
use avs_core::error::Error;
use std::path::{Path, PathBuf};
use tracing::info;

/// `<source dir>/<story_id>-assembled.yaml`
pub fn briefcase_path(story: &ValueStory, source: &Path) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{}-assembled.yaml", story.metadata.story_id))
}

/// Serialize the story as YAML to its briefcase path and return that path.
pub async fn write_briefcase(story: &ValueStory, source: &Path) -> Result<PathBuf, Error> {
    let path = briefcase_path(story, source);
    let yaml = story.to_yaml_string()?;
    tokio::fs::write(&path, yaml)
        .await
        .map_err(|e| Error::Output {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    info!(path = %path.display(), "Briefcase written");
    Ok(path)
}
