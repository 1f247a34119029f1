//! Per-run shared state and the per-chunk view of it.

use super::dependency::DependencyFuture;
use super::fixtures::FixtureSource;
use super::gate::ResourceGates;
use crate::artifacts::ArtifactSink;
use crate::audio::ChunkAudio;
use crate::config::Settings;
use crate::error::TolkError;
use crate::glossary::GlossarySnapshot;
use crate::models::{ChunkSpec, SpeakerProfile};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStage, ProgressStatus};
use crate::providers::ModelClients;
use crate::usage::UsageReporter;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything a run shares between its chunks. Read-only once built.
pub struct PipelineContext {
    pub settings: Arc<Settings>,
    pub clients: ModelClients,
    pub audio: Arc<dyn ChunkAudio>,
    pub gates: ResourceGates,
    pub glossary: DependencyFuture<Arc<GlossarySnapshot>>,
    pub speakers: DependencyFuture<Arc<Vec<SpeakerProfile>>>,
    pub cancel: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
    pub usage: Arc<UsageReporter>,
    pub artifacts: Arc<dyn ArtifactSink>,
    pub fixtures: Arc<dyn FixtureSource>,
    pub total_chunks: usize,
    pub started: Instant,
}

impl PipelineContext {
    /// Cancellation error carrying the run's elapsed time.
    pub fn cancelled(&self) -> TolkError {
        TolkError::Cancelled(self.started.elapsed())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One chunk's view of the run.
#[derive(Clone, Copy)]
pub struct ChunkContext<'a> {
    pub run: &'a PipelineContext,
    pub chunk: ChunkSpec,
}

impl<'a> ChunkContext<'a> {
    pub fn new(run: &'a PipelineContext, chunk: ChunkSpec) -> Self {
        Self { run, chunk }
    }

    pub fn settings(&self) -> &'a Settings {
        &self.run.settings
    }

    pub fn cancel(&self) -> &'a CancellationToken {
        &self.run.cancel
    }

    pub fn emit(&self, stage: ProgressStage, status: ProgressStatus, message: impl Into<String>) {
        self.run.progress.emit(ProgressEvent::new(
            self.chunk.number(),
            self.run.total_chunks,
            stage,
            status,
            message,
        ));
    }

    /// Artifact key for this chunk.
    pub fn artifact_key(&self, name: &str) -> String {
        format!("chunk_{}/{}", self.chunk.index, name)
    }
}
