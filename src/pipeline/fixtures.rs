//! Fixture sources for mocked and resumed stages.

use crate::error::Result;
use crate::models::PipelineStage;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies recorded stage output in place of real work.
#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Recorded output of `stage` for chunk `chunk_index`, if any.
    async fn load(&self, stage: PipelineStage, chunk_index: usize) -> Result<Option<Value>>;
}

/// No fixtures at all.
pub struct NoFixtures;

#[async_trait]
impl FixtureSource for NoFixtures {
    async fn load(&self, _stage: PipelineStage, _chunk_index: usize) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Reads `<root>/<stage>/chunk_<index>.json`.
pub struct FileFixtures {
    root: PathBuf,
}

impl FileFixtures {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, stage: PipelineStage, chunk_index: usize) -> PathBuf {
        self.root
            .join(stage.label())
            .join(format!("chunk_{}.json", chunk_index))
    }
}

#[async_trait]
impl FixtureSource for FileFixtures {
    async fn load(&self, stage: PipelineStage, chunk_index: usize) -> Result<Option<Value>> {
        let path = self.path_for(stage, chunk_index);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No fixture at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_fixtures_layout() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = FileFixtures::new(dir.path());
        let path = fixtures.path_for(PipelineStage::Refine, 2);
        assert!(path.ends_with("refine/chunk_2.json"));

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"[{"id": "a"}]"#).unwrap();

        let value = fixtures.load(PipelineStage::Refine, 2).await.unwrap().unwrap();
        assert_eq!(value[0]["id"], "a");
        assert!(fixtures.load(PipelineStage::Refine, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_fixture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fixtures = FileFixtures::new(dir.path());
        let path = fixtures.path_for(PipelineStage::Translate, 0);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(fixtures.load(PipelineStage::Translate, 0).await.is_err());
    }
}
