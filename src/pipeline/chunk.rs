//! Runs one chunk through every step.

use super::context::{ChunkContext, PipelineContext};
use super::reconcile::{normalize, to_global};
use super::step::{run_step, StepResult};
use super::steps::{
    AlignStep, RefineInput, RefineStep, TranscribeStep, TranslateInput, TranslateStep,
    WaitForDependenciesStep,
};
use crate::error::Result;
use crate::models::{ChunkSpec, PipelineStage, SubtitleSegment};
use crate::progress::{ProgressStage, ProgressStatus};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// How far a chunk got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOutcome {
    Translated,
    /// Refined but not translated.
    Refined,
    /// Transcribed but not refined.
    Transcribed,
    Empty,
    Failed,
    Cancelled,
}

impl fmt::Display for ChunkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChunkOutcome::Translated => "translated",
            ChunkOutcome::Refined => "refined",
            ChunkOutcome::Transcribed => "transcribed",
            ChunkOutcome::Empty => "empty",
            ChunkOutcome::Failed => "failed",
            ChunkOutcome::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Every intermediate of one chunk, in source-global time once returned.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResult {
    pub spec: ChunkSpec,
    pub transcribed: Vec<SubtitleSegment>,
    pub refined: Vec<SubtitleSegment>,
    pub aligned: Vec<SubtitleSegment>,
    pub translated: Vec<SubtitleSegment>,
    /// Translated if non-empty, else aligned, else refined, else empty.
    pub final_segments: Vec<SubtitleSegment>,
    pub outcome: ChunkOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn empty(spec: ChunkSpec, outcome: ChunkOutcome, error: Option<String>) -> Self {
        Self {
            spec,
            transcribed: Vec::new(),
            refined: Vec::new(),
            aligned: Vec::new(),
            translated: Vec::new(),
            final_segments: Vec::new(),
            outcome,
            error,
        }
    }

    /// Result of a chunk stopped early: the last output fills every field.
    fn uniform(spec: ChunkSpec, segments: Vec<SubtitleSegment>, outcome: ChunkOutcome) -> Self {
        let outcome = if segments.is_empty() {
            ChunkOutcome::Empty
        } else {
            outcome
        };
        Self {
            spec,
            transcribed: segments.clone(),
            refined: segments.clone(),
            aligned: segments.clone(),
            translated: segments.clone(),
            final_segments: segments,
            outcome,
            error: None,
        }
    }

    fn complete(
        spec: ChunkSpec,
        transcribed: Vec<SubtitleSegment>,
        refined: StepResult<Vec<SubtitleSegment>>,
        aligned: StepResult<Vec<SubtitleSegment>>,
        translated: StepResult<Vec<SubtitleSegment>>,
    ) -> Self {
        let translated_segments = if translated.produced() {
            translated.output
        } else {
            Vec::new()
        };

        let outcome = if !translated_segments.is_empty() {
            ChunkOutcome::Translated
        } else if refined.produced() {
            ChunkOutcome::Refined
        } else {
            ChunkOutcome::Transcribed
        };

        let final_segments = [&translated_segments, &aligned.output, &refined.output]
            .into_iter()
            .find(|segments| !segments.is_empty())
            .cloned()
            .unwrap_or_default();

        Self {
            spec,
            transcribed,
            refined: refined.output,
            aligned: aligned.output,
            translated: translated_segments,
            final_segments,
            outcome,
            error: None,
        }
    }

    /// Convert every field from chunk-local to source-global time.
    /// Fixture-loaded outputs skip post-processing, so every list is
    /// normalized again before the offset is applied.
    fn into_global(self) -> Self {
        let spec = self.spec;
        let global = |segments| to_global(normalize(segments), &spec);
        Self {
            transcribed: global(self.transcribed),
            refined: global(self.refined),
            aligned: global(self.aligned),
            translated: global(self.translated),
            final_segments: global(self.final_segments),
            ..self
        }
    }
}

/// Runs chunks against one shared run context.
#[derive(Clone)]
pub struct ChunkProcessor {
    run: Arc<PipelineContext>,
}

impl ChunkProcessor {
    pub fn new(run: Arc<PipelineContext>) -> Self {
        Self { run }
    }

    /// Process one chunk. Never fails: errors become an empty `failed` result.
    #[instrument(skip(self), fields(chunk = spec.number()))]
    pub async fn process(&self, spec: ChunkSpec) -> ChunkResult {
        let ctx = ChunkContext::new(&self.run, spec);

        let result = match self.run_steps(&ctx).await {
            Ok(result) => result.into_global(),
            Err(e) if e.is_cancelled() || self.run.is_cancelled() => {
                ChunkResult::empty(spec, ChunkOutcome::Cancelled, Some(e.to_string()))
            }
            Err(e) => {
                error!("Chunk {} failed: {}", spec.number(), e);
                ChunkResult::empty(spec, ChunkOutcome::Failed, Some(e.to_string()))
            }
        };

        let status = match result.outcome {
            ChunkOutcome::Failed => ProgressStatus::Error,
            ChunkOutcome::Cancelled => ProgressStatus::Cancelled,
            _ => ProgressStatus::Completed,
        };
        ctx.emit(ProgressStage::Chunk, status, result.outcome.to_string());
        result
    }

    async fn run_steps(&self, ctx: &ChunkContext<'_>) -> Result<ChunkResult> {
        let spec = ctx.chunk;
        let stop = ctx.settings().debug.stop_after;
        let cancelled = || ChunkResult::empty(spec, ChunkOutcome::Cancelled, None);

        let transcribed = run_step(&TranscribeStep, (), ctx).await?;
        if transcribed.is_cancelled() {
            return Ok(cancelled());
        }
        let raw = transcribed.output;
        if stop == Some(PipelineStage::Transcribe) {
            return Ok(ChunkResult::uniform(spec, raw, ChunkOutcome::Transcribed));
        }
        if raw.is_empty() {
            debug!("Chunk {} has no speech, skipping the rest", spec.number());
            return Ok(ChunkResult::empty(spec, ChunkOutcome::Empty, None));
        }

        let dependencies = run_step(&WaitForDependenciesStep, (), ctx).await?;
        if dependencies.is_cancelled() {
            return Ok(cancelled());
        }
        let dependencies = dependencies.output;
        if stop == Some(PipelineStage::WaitForDependencies) {
            return Ok(ChunkResult::uniform(spec, raw, ChunkOutcome::Transcribed));
        }

        // One refinement permit covers Refine, Align and Translate.
        let hold = match self.run.gates.refinement.acquire(ctx.cancel()).await {
            Ok(permit) => permit,
            Err(e) if e.is_cancelled() => return Ok(cancelled()),
            Err(e) => return Err(e),
        };

        let refined = run_step(
            &RefineStep,
            RefineInput::new(raw.clone(), dependencies.clone()),
            ctx,
        )
        .await?;
        if refined.is_cancelled() {
            return Ok(cancelled());
        }
        if stop == Some(PipelineStage::Refine) {
            let outcome = if refined.produced() {
                ChunkOutcome::Refined
            } else {
                ChunkOutcome::Transcribed
            };
            return Ok(ChunkResult::uniform(spec, refined.output, outcome));
        }

        let aligned = run_step(&AlignStep, refined.output.clone(), ctx).await?;
        if aligned.is_cancelled() {
            return Ok(cancelled());
        }
        if stop == Some(PipelineStage::Align) {
            let outcome = if refined.produced() {
                ChunkOutcome::Refined
            } else {
                ChunkOutcome::Transcribed
            };
            return Ok(ChunkResult::uniform(spec, aligned.output, outcome));
        }

        let translated = run_step(
            &TranslateStep,
            TranslateInput {
                segments: aligned.output.clone(),
                glossary: dependencies.glossary,
            },
            ctx,
        )
        .await?;
        drop(hold);
        if translated.is_cancelled() {
            return Ok(cancelled());
        }

        Ok(ChunkResult::complete(spec, raw, refined, aligned, translated))
    }
}
