//! Pipeline orchestrator for Tolk.
//!
//! Coordinates a whole run: validation, chunk planning, the background
//! glossary and speaker tasks, bounded fan-out over chunks and the ordered
//! merge of their results.

use crate::artifacts::{new_run_id, ArtifactSink, FileArtifactSink, NoopArtifacts};
use crate::audio::MediaToolkit;
use crate::config::{Prompts, Settings};
use crate::error::{Result, TolkError};
use crate::glossary::{sample_chunks, GlossaryExtraction, GlossarySnapshot, GlossaryTask};
use crate::models::{ChunkSpec, GlossaryTerm, PipelineStage, SpeakerProfile, SubtitleSegment};
use crate::pipeline::{
    AudioMode, ChunkOutcome, ChunkPlan, ChunkProcessor, ChunkResult, DependencyFuture,
    FileFixtures, FixtureSource, NoFixtures, PipelineContext, Preprocessor, ResourceGates,
};
use crate::progress::{LogProgress, ProgressEvent, ProgressSink, ProgressStage, ProgressStatus};
use crate::providers::ModelClients;
use crate::speakers::{plan_samples, SpeakerTask};
use crate::usage::{UsageReport, UsageReporter, UsageSink};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Caller-supplied observers for one run. Everything is optional.
#[derive(Default, Clone)]
pub struct RunHooks {
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub usage: Option<Arc<dyn UsageSink>>,
    pub cancel: Option<CancellationToken>,
}

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Validating,
    Preprocessing,
    Processing,
    Merging,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::Validating => "validating",
            RunPhase::Preprocessing => "preprocessing",
            RunPhase::Processing => "processing",
            RunPhase::Merging => "merging",
            RunPhase::Done => "done",
        };
        f.write_str(label)
    }
}

/// Per-chunk line of the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub outcome: ChunkOutcome,
    pub segments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of [`Orchestrator::generate`].
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    /// Final segments of every chunk, in source order and global time.
    pub segments: Vec<SubtitleSegment>,
    /// Per-sample glossary extraction results, when extraction ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glossary_results: Option<Vec<GlossaryExtraction>>,
    /// The glossary the chunks used.
    pub glossary: Vec<GlossaryTerm>,
    pub speakers: Vec<SpeakerProfile>,
    pub chunks: Vec<ChunkSummary>,
    pub usage: UsageReport,
}

/// The main orchestrator for the Tolk pipeline.
pub struct Orchestrator {
    settings: Arc<Settings>,
    clients: ModelClients,
    media: MediaToolkit,
    artifacts: Arc<dyn ArtifactSink>,
    fixtures: Arc<dyn FixtureSource>,
}

impl Orchestrator {
    /// Create an orchestrator with OpenAI clients and ffmpeg audio.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;
        let clients = ModelClients::openai(&settings, Arc::new(prompts))?;

        let temp_dir = settings.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;
        let media = MediaToolkit::ffmpeg(&temp_dir);

        let artifacts: Arc<dyn ArtifactSink> = match settings.artifacts_dir() {
            Some(dir) => {
                let sink = FileArtifactSink::new(&dir, &new_run_id());
                info!("Writing debug artifacts to {}", sink.root().display());
                Arc::new(sink)
            }
            None => Arc::new(NoopArtifacts),
        };
        let fixtures: Arc<dyn FixtureSource> = match settings.mock_dir() {
            Some(dir) => Arc::new(FileFixtures::new(dir)),
            None => Arc::new(NoFixtures),
        };

        Ok(Self {
            settings: Arc::new(settings),
            clients,
            media,
            artifacts,
            fixtures,
        })
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, clients: ModelClients, media: MediaToolkit) -> Self {
        Self {
            settings: Arc::new(settings),
            clients,
            media,
            artifacts: Arc::new(NoopArtifacts),
            fixtures: Arc::new(NoFixtures),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_fixtures(mut self, fixtures: Arc<dyn FixtureSource>) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Get the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Fail fast on configuration and credentials for the stages that will run.
    pub fn check_ready(&self) -> Result<()> {
        let settings = &self.settings;
        let debug = &settings.debug;

        settings.validate()?;

        if debug.runs_for_real(PipelineStage::Transcribe) {
            self.clients.transcriber.check_ready()?;
        }
        if debug.runs_for_real(PipelineStage::WaitForDependencies) {
            if settings.glossary.extract {
                self.clients.glossary.check_ready()?;
            }
            if settings.speakers.enabled {
                self.clients.speakers.check_ready()?;
            }
        }
        if settings.refinement.enabled && debug.runs_for_real(PipelineStage::Refine) {
            self.clients.refiner.check_ready()?;
        }
        if settings.alignment.enabled && debug.runs_for_real(PipelineStage::Align) {
            self.clients.aligner.check_ready()?;
        }
        if settings.translation.enabled && debug.runs_for_real(PipelineStage::Translate) {
            self.clients.translator.check_ready()?;
        }
        Ok(())
    }

    /// Generate subtitles for `source`.
    ///
    /// `total_duration` may be 0 when unknown; the decoded length is used
    /// then. Chunk failures degrade the output, they never fail the run.
    /// Returns `Cancelled` if the hooks' token fires.
    #[instrument(skip(self, source, hooks), fields(source = %source.display()))]
    pub async fn generate(
        &self,
        source: &Path,
        total_duration: f64,
        hooks: RunHooks,
    ) -> Result<GenerationOutput> {
        let started = Instant::now();
        let cancel = hooks.cancel.unwrap_or_default();
        let progress: Arc<dyn ProgressSink> = hooks.progress.unwrap_or_else(|| Arc::new(LogProgress));
        let usage = Arc::new(UsageReporter::new(self.settings.pricing.clone()).with_sink(hooks.usage));
        let cancelled = || TolkError::Cancelled(started.elapsed());

        info!(phase = %RunPhase::Validating, "Starting run");
        self.check_ready()?;
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        info!(phase = %RunPhase::Preprocessing, "Planning chunks");
        progress.emit(ProgressEvent::new(
            0,
            0,
            ProgressStage::Preprocess,
            ProgressStatus::Processing,
            "",
        ));
        let plan = Preprocessor::new(&self.settings, &self.media)
            .with_refiner_audio(self.clients.refiner.wants_audio())
            .plan(source, total_duration, &cancel)
            .await
            .map_err(|e| if e.is_cancelled() { cancelled() } else { e })?;
        let total_chunks = plan.chunks.len();
        progress.emit(ProgressEvent::new(
            0,
            total_chunks,
            ProgressStage::Preprocess,
            ProgressStatus::Completed,
            format!("{} chunks ({})", total_chunks, plan.mode),
        ));

        info!(
            phase = %RunPhase::Processing,
            "Processing {} chunks ({} mode)",
            total_chunks,
            plan.mode
        );
        let gates = ResourceGates::new(&self.settings.concurrency);
        let (glossary, glossary_launched) =
            self.start_glossary(&plan, &gates, &usage, &progress, &cancel);
        let speakers = self.start_speakers(&plan, &usage, &progress, &cancel);

        let run = Arc::new(PipelineContext {
            settings: self.settings.clone(),
            clients: self.clients.clone(),
            audio: plan.audio.clone(),
            gates,
            glossary,
            speakers,
            cancel: cancel.clone(),
            progress,
            usage: usage.clone(),
            artifacts: self.artifacts.clone(),
            fixtures: self.fixtures.clone(),
            total_chunks,
            started,
        });

        let slots = self.process_chunks(&run, &plan.chunks).await;
        if cancel.is_cancelled() {
            info!("Run cancelled after {:.1}s", started.elapsed().as_secs_f64());
            return Err(cancelled());
        }

        info!(phase = %RunPhase::Merging, "Merging {} chunk results", slots.len());
        let snapshot = run
            .glossary
            .get(&cancel)
            .await
            .map_err(|_| cancelled())?;
        let speaker_profiles = if self.settings.speakers.enabled {
            run.speakers
                .get(&cancel)
                .await
                .map_err(|_| cancelled())?
                .as_ref()
                .clone()
        } else {
            Vec::new()
        };

        let chunks: Vec<ChunkSummary> = slots
            .iter()
            .map(|result| ChunkSummary {
                index: result.spec.index,
                start: result.spec.start_offset,
                end: result.spec.end_offset,
                outcome: result.outcome,
                segments: result.final_segments.len(),
                error: result.error.clone(),
            })
            .collect();
        let segments: Vec<SubtitleSegment> = slots
            .into_iter()
            .flat_map(|result| result.final_segments)
            .collect();

        let report = usage.report();
        for line in report.lines() {
            info!("Usage: {}", line);
        }
        info!(
            phase = %RunPhase::Done,
            "Generated {} segments in {:.1}s",
            segments.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(GenerationOutput {
            segments,
            glossary_results: glossary_launched.then(|| snapshot.extractions.clone()),
            glossary: snapshot.terms.clone(),
            speakers: speaker_profiles,
            chunks,
            usage: report,
        })
    }

    /// Fan chunks out under the worker pool; results land in index order.
    async fn process_chunks(&self, run: &Arc<PipelineContext>, chunks: &[ChunkSpec]) -> Vec<ChunkResult> {
        let pool = self.settings.concurrency.worker_pool_size();
        let processor = ChunkProcessor::new(run.clone());
        debug!("Worker pool size {}", pool);

        let mut slots: Vec<Option<ChunkResult>> = vec![None; chunks.len()];
        let mut results = futures::stream::iter(chunks.iter().copied())
            .map(|spec| {
                let processor = processor.clone();
                async move {
                    let handle = tokio::spawn(async move { processor.process(spec).await });
                    (spec, handle.await)
                }
            })
            .buffer_unordered(pool);

        while let Some((spec, joined)) = results.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Chunk {} task aborted: {}", spec.number(), e);
                    ChunkResult::empty(spec, ChunkOutcome::Failed, Some(e.to_string()))
                }
            };
            if let Some(slot) = slots.get_mut(spec.index) {
                *slot = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(chunks)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| ChunkResult::empty(*spec, ChunkOutcome::Failed, None))
            })
            .collect()
    }

    fn start_glossary(
        &self,
        plan: &ChunkPlan,
        gates: &ResourceGates,
        usage: &Arc<UsageReporter>,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> (DependencyFuture<Arc<GlossarySnapshot>>, bool) {
        let settings = &self.settings;
        let user = Arc::new(GlossarySnapshot::from_user(settings.glossary.terms.clone()));

        let runs = settings.glossary.extract
            && plan.mode != AudioMode::Synthetic
            && settings.debug.runs_for_real(PipelineStage::WaitForDependencies);
        let samples = if runs {
            sample_chunks(
                &plan.chunks,
                settings.glossary.sample_minutes,
                settings.chunking.chunk_duration_seconds,
            )
        } else {
            Vec::new()
        };
        if samples.is_empty() {
            return (DependencyFuture::ready("glossary", user), false);
        }

        info!("Extracting glossary from {} sampled chunks", samples.len());
        let task = GlossaryTask {
            extractor: self.clients.glossary.clone(),
            audio: plan.audio.clone(),
            gate: gates.refinement.clone(),
            samples,
            user_terms: settings.glossary.terms.clone(),
            language: settings.transcription.language.clone(),
            target_language: settings.translation.target_language.clone(),
            usage: usage.clone(),
            progress: progress.clone(),
            total_chunks: plan.chunks.len(),
            cancel: cancel.clone(),
        };
        (DependencyFuture::spawn("glossary", task.run(), user), true)
    }

    fn start_speakers(
        &self,
        plan: &ChunkPlan,
        usage: &Arc<UsageReporter>,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> DependencyFuture<Arc<Vec<SpeakerProfile>>> {
        let settings = &self.settings;
        let none = Arc::new(Vec::new());

        let runs = settings.speakers.enabled
            && plan.mode != AudioMode::Synthetic
            && settings.debug.runs_for_real(PipelineStage::WaitForDependencies);
        let windows = if runs {
            plan_samples(
                plan.speech_regions.as_deref().map(Vec::as_slice),
                plan.total_duration,
                settings.speakers.sample_seconds,
                settings.speakers.window_seconds,
            )
        } else {
            Vec::new()
        };
        if windows.is_empty() {
            return DependencyFuture::ready("speakers", none);
        }

        info!("Profiling speakers from {} samples", windows.len());
        let task = SpeakerTask {
            profiler: self.clients.speakers.clone(),
            audio: plan.audio.clone(),
            windows,
            language: settings.transcription.language.clone(),
            max_speakers: settings.speakers.max_speakers,
            usage: usage.clone(),
            progress: progress.clone(),
            total_chunks: plan.chunks.len(),
            cancel: cancel.clone(),
        };
        DependencyFuture::spawn("speakers", task.run(), none)
    }
}
