//! Debug artifact sinks.
//!
//! Steps hand intermediate results to an [`ArtifactSink`] so a run can be
//! inspected or resumed later. Writes are best-effort and never reach the
//! pipeline as errors.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Receiver of `(key, payload)` debug artifacts.
pub trait ArtifactSink: Send + Sync {
    fn write(&self, key: &str, payload: Value);
}

/// Sink that discards artifacts.
pub struct NoopArtifacts;

impl ArtifactSink for NoopArtifacts {
    fn write(&self, _key: &str, _payload: Value) {}
}

/// Writes each artifact to `<root>/<key>.json` from a background task.
pub struct FileArtifactSink {
    root: PathBuf,
}

impl FileArtifactSink {
    /// Create a sink writing under `base/<run_id>`.
    pub fn new(base: &Path, run_id: &str) -> Self {
        Self {
            root: base.join(run_id),
        }
    }

    /// Directory this sink writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '/' => c,
                _ => '_',
            })
            .collect();
        self.root.join(format!("{}.json", sanitized.trim_matches('/')))
    }
}

impl ArtifactSink for FileArtifactSink {
    fn write(&self, key: &str, payload: Value) {
        let path = self.path_for(key);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, dropping artifact {}", key);
            return;
        };

        handle.spawn(async move {
            let result = async {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let body = serde_json::to_vec_pretty(&payload)?;
                tokio::fs::write(&path, body).await?;
                Ok::<_, crate::error::TolkError>(())
            }
            .await;

            if let Err(e) = result {
                debug!("Failed to write artifact {}: {}", path.display(), e);
            }
        });
    }
}

/// Default run identifier: a sortable timestamp.
pub fn new_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}
