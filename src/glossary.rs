//! Run-wide glossary extraction.
//!
//! A handful of evenly spaced chunks are sampled, each is sent to the
//! glossary extractor under the refinement gate, and the extracted terms are
//! merged behind the user's own terms. Chunks read the result through a
//! dependency future.

use crate::audio::ChunkAudio;
use crate::error::{Result, TolkError};
use crate::models::{ChunkSpec, GlossaryTerm};
use crate::pipeline::gate::ResourceGate;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStage, ProgressStatus};
use crate::providers::{GlossaryExtractor, GlossaryRequest};
use crate::usage::UsageReporter;
use futures::{stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The glossary every chunk refines and translates with.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlossarySnapshot {
    pub terms: Vec<GlossaryTerm>,
    /// Per-sample extraction results, empty when nothing was extracted.
    pub extractions: Vec<GlossaryExtraction>,
}

impl GlossarySnapshot {
    /// A snapshot holding only user-defined terms.
    pub fn from_user(terms: Vec<GlossaryTerm>) -> Self {
        Self {
            terms: merge_terms(&terms, Vec::new()),
            extractions: Vec::new(),
        }
    }
}

/// What one sampled chunk contributed.
#[derive(Debug, Clone, Serialize)]
pub struct GlossaryExtraction {
    pub chunk_index: usize,
    pub start: f64,
    pub end: f64,
    pub terms: Vec<GlossaryTerm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pick `ceil(sample_minutes * 60 / chunk_duration)` evenly spaced chunks.
pub fn sample_chunks(chunks: &[ChunkSpec], sample_minutes: f64, chunk_duration: f64) -> Vec<ChunkSpec> {
    if chunks.is_empty() || sample_minutes <= 0.0 || chunk_duration <= 0.0 {
        return Vec::new();
    }

    let wanted = (sample_minutes * 60.0 / chunk_duration).ceil() as usize;
    let wanted = wanted.clamp(1, chunks.len());
    if wanted == chunks.len() {
        return chunks.to_vec();
    }

    (0..wanted)
        .map(|i| chunks[i * chunks.len() / wanted])
        .collect()
}

/// User terms first, then extracted terms not already present
/// (case-insensitive on the term).
pub fn merge_terms(user: &[GlossaryTerm], extracted: Vec<GlossaryTerm>) -> Vec<GlossaryTerm> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(user.len() + extracted.len());

    for term in user.iter().cloned().chain(extracted) {
        let key = term.term.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            merged.push(term);
        }
    }
    merged
}

/// Background glossary extraction for one run.
pub struct GlossaryTask {
    pub extractor: Arc<dyn GlossaryExtractor>,
    pub audio: Arc<dyn ChunkAudio>,
    pub gate: ResourceGate,
    pub samples: Vec<ChunkSpec>,
    pub user_terms: Vec<GlossaryTerm>,
    pub language: Option<String>,
    pub target_language: String,
    pub usage: Arc<UsageReporter>,
    pub progress: Arc<dyn ProgressSink>,
    pub total_chunks: usize,
    pub cancel: CancellationToken,
}

impl GlossaryTask {
    /// Extract from every sample and merge.
    ///
    /// Fails when cancelled or when every sample failed; the caller's
    /// dependency future then falls back to the user terms.
    pub async fn run(self) -> Result<Arc<GlossarySnapshot>> {
        self.emit(ProgressStatus::Processing, format!("{} samples", self.samples.len()));

        let concurrency = self.gate.capacity();
        let extractions: Vec<GlossaryExtraction> = stream::iter(self.samples.iter().copied())
            .map(|spec| self.extract_one(spec))
            .buffered(concurrency)
            .collect()
            .await;

        if self.cancel.is_cancelled() {
            self.emit(ProgressStatus::Cancelled, "");
            return Err(TolkError::Cancelled(std::time::Duration::ZERO));
        }

        let failures = extractions.iter().filter(|e| e.error.is_some()).count();
        if !extractions.is_empty() && failures == extractions.len() {
            self.emit(ProgressStatus::Error, "every sample failed");
            return Err(TolkError::Provider(format!(
                "glossary extraction failed for all {} samples",
                failures
            )));
        }

        let extracted: Vec<GlossaryTerm> = extractions
            .iter()
            .flat_map(|e| e.terms.iter().cloned())
            .collect();
        let terms = merge_terms(&self.user_terms, extracted);

        info!(
            "Glossary ready: {} terms ({} samples, {} failed)",
            terms.len(),
            extractions.len(),
            failures
        );
        self.emit(ProgressStatus::Completed, format!("{} terms", terms.len()));

        Ok(Arc::new(GlossarySnapshot { terms, extractions }))
    }

    async fn extract_one(&self, spec: ChunkSpec) -> GlossaryExtraction {
        let outcome: Result<Vec<GlossaryTerm>> = async {
            let _permit = self.gate.acquire(&self.cancel).await?;
            let audio = self.audio.slice(spec.start_offset, spec.end_offset).await?;
            let completion = self
                .extractor
                .extract(
                    GlossaryRequest {
                        audio,
                        language: self.language.clone(),
                        target_language: self.target_language.clone(),
                    },
                    &self.cancel,
                )
                .await?;
            self.usage.record_charges("glossary", &completion.charges);
            Ok(completion.output)
        }
        .await;

        let (terms, error) = match outcome {
            Ok(terms) => (terms, None),
            Err(e) => {
                if !e.is_cancelled() {
                    warn!("Glossary sample at chunk {} failed: {}", spec.number(), e);
                }
                (Vec::new(), Some(e.to_string()))
            }
        };

        GlossaryExtraction {
            chunk_index: spec.index,
            start: spec.start_offset,
            end: spec.end_offset,
            terms,
            error,
        }
    }

    fn emit(&self, status: ProgressStatus, message: impl Into<String>) {
        self.progress.emit(ProgressEvent::new(
            0,
            self.total_chunks,
            ProgressStage::Glossary,
            status,
            message,
        ));
    }
}
