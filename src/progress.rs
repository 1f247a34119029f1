//! Progress events emitted while a run is in flight.

use crate::models::PipelineStage;
use serde::Serialize;
use std::fmt;

/// What a progress event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Decoding and chunk planning.
    Preprocess,
    /// Background glossary extraction.
    Glossary,
    /// Background speaker profiling.
    Speakers,
    /// One step of one chunk.
    Step(PipelineStage),
    /// A chunk's terminal outcome.
    Chunk,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStage::Preprocess => f.write_str("preprocess"),
            ProgressStage::Glossary => f.write_str("glossary"),
            ProgressStage::Speakers => f.write_str("speakers"),
            ProgressStage::Step(stage) => write!(f, "{}", stage),
            ProgressStage::Chunk => f.write_str("chunk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Waiting,
    Processing,
    Completed,
    Skipped,
    Mocked,
    /// Failed but continued with a fallback.
    Degraded,
    Cancelled,
    Error,
}

/// A single progress notification.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// 1-based chunk number; 0 for run-level events.
    pub chunk_id: usize,
    pub total_chunks: usize,
    pub stage: ProgressStage,
    pub status: ProgressStatus,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        chunk_id: usize,
        total_chunks: usize,
        stage: ProgressStage,
        status: ProgressStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            chunk_id,
            total_chunks,
            stage,
            status,
            message: message.into(),
        }
    }
}

/// Receiver of progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops everything.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that forwards events to the tracing log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            chunk = event.chunk_id,
            total = event.total_chunks,
            stage = %event.stage,
            status = ?event.status,
            "{}",
            event.message
        );
    }
}
