//! Local asset resolver: read a manifest entry's file.
//!
//! Relative paths resolve against the directory holding the task document,
//! never the process working directory.

use avs_core::error::AssetError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub struct LocalAssetResolver {
    read_timeout: Duration,
}

impl LocalAssetResolver {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// Where `declared` points, given the document's directory.
    pub fn resolve_path(declared: &str, base_dir: &Path) -> PathBuf {
        let path = Path::new(declared);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Read the asset as text.
    pub async fn resolve(&self, declared: &str, base_dir: &Path) -> Result<String, AssetError> {
        let path = Self::resolve_path(declared, base_dir);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(AssetError::NotFound(declared.to_string())),
        }

        let content = tokio::time::timeout(self.read_timeout, tokio::fs::read_to_string(&path))
            .await
            .map_err(|_| AssetError::Timeout {
                path: path.clone(),
                timeout_secs: self.read_timeout.as_secs(),
            })?
            .map_err(|e| AssetError::Read {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(path = %path.display(), bytes = content.len(), "Read local asset");
        Ok(content)
    }
}

impl Default for LocalAssetResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("notes.txt")).unwrap();
        write!(f, "hello").unwrap();

        let resolver = LocalAssetResolver::default();
        let content = resolver.resolve("notes.txt", dir.path()).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn reads_nested_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("brief.md"), "# Brief").unwrap();

        let resolver = LocalAssetResolver::default();
        let content = resolver.resolve("docs/brief.md", dir.path()).await.unwrap();
        assert_eq!(content, "# Brief");
    }

    #[tokio::test]
    async fn absolute_path_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.txt");
        std::fs::write(&file, "absolute").unwrap();

        let elsewhere = tempfile::tempdir().unwrap();
        let resolver = LocalAssetResolver::default();
        let content = resolver
            .resolve(file.to_str().unwrap(), elsewhere.path())
            .await
            .unwrap();
        assert_eq!(content, "absolute");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = LocalAssetResolver::default();
        let err = resolver.resolve("missing.txt", dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing.txt not found.");
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        let resolver = LocalAssetResolver::default();
        let err = resolver.resolve("assets", dir.path()).await.unwrap_err();
        assert!(matches!(err, AssetError::NotFound(ref p) if p == "assets"));
    }

    #[test]
    fn resolve_path_joins_relative_only() {
        let base = Path::new("/work/stories");
        assert_eq!(
            LocalAssetResolver::resolve_path("ctx/a.md", base),
            PathBuf::from("/work/stories/ctx/a.md")
        );
        assert_eq!(
            LocalAssetResolver::resolve_path("/etc/hosts", base),
            PathBuf::from("/etc/hosts")
        );
    }
}
