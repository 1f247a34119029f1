//! Scripted collaborators for pipeline tests.

use super::context::PipelineContext;
use super::dependency::DependencyFuture;
use super::fixtures::{FixtureSource, NoFixtures};
use super::gate::ResourceGates;
use crate::artifacts::NoopArtifacts;
use crate::audio::{AudioClip, ChunkAudio};
use crate::config::Settings;
use crate::error::{Result, TolkError};
use crate::glossary::GlossarySnapshot;
use crate::models::{GlossaryTerm, PipelineStage, SpeakerProfile, SubtitleSegment};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use crate::providers::*;
use crate::usage::{Usage, UsageReporter};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Call counters for one scripted provider.
#[derive(Debug, Default)]
pub struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProbeGuard<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(self)
    }
}

struct ProbeGuard<'a>(&'a Probe);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

type Behavior<Req, Out> = Box<dyn Fn(&Req) -> Result<Out> + Send + Sync>;

/// A provider whose answer is a closure over the request.
pub struct Scripted<Req, Out> {
    model: String,
    behavior: Behavior<Req, Out>,
    delay: Duration,
    pub probe: Arc<Probe>,
}

impl<Req, Out> Scripted<Req, Out> {
    pub fn new<F>(model: &str, behavior: F) -> Self
    where
        F: Fn(&Req) -> Result<Out> + Send + Sync + 'static,
    {
        Self {
            model: model.to_string(),
            behavior: Box::new(behavior),
            delay: Duration::ZERO,
            probe: Arc::new(Probe::default()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn call(&self, request: Req, cancel: &CancellationToken) -> Result<Completion<Out>> {
        let _guard = self.probe.enter();
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TolkError::Cancelled(Duration::ZERO)),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        let output = (self.behavior)(&request)?;
        Ok(Completion::new(output, &self.model, Usage::tokens(10, 5)))
    }
}

macro_rules! scripted_provider {
    ($trait:ident, $method:ident, $req:ty, $out:ty) => {
        #[async_trait]
        impl $trait for Scripted<$req, $out> {
            fn model(&self) -> &str {
                &self.model
            }

            async fn $method(
                &self,
                request: $req,
                cancel: &CancellationToken,
            ) -> Result<Completion<$out>> {
                self.call(request, cancel).await
            }
        }
    };
}

scripted_provider!(Transcriber, transcribe, TranscriptionRequest, Vec<SubtitleSegment>);
scripted_provider!(Refiner, refine, RefineRequest, Vec<SubtitleSegment>);
scripted_provider!(Aligner, align, AlignRequest, Vec<SubtitleSegment>);
scripted_provider!(Translator, translate, TranslateRequest, Vec<TranslatedLine>);
scripted_provider!(GlossaryExtractor, extract, GlossaryRequest, Vec<GlossaryTerm>);
scripted_provider!(SpeakerProfiler, profile, SpeakerRequest, Vec<SpeakerProfile>);

/// Audio whose bytes name the requested window: `"start:end"`.
pub struct MockAudio;

#[async_trait]
impl ChunkAudio for MockAudio {
    async fn slice(&self, start: f64, end: f64) -> Result<AudioClip> {
        Ok(AudioClip::Encoded {
            bytes: format!("{}:{}", start, end).into_bytes(),
            file_name: "mock.mp3".to_string(),
        })
    }
}

/// Window of a clip served by [`MockAudio`], or the first sample value of a
/// ramp-encoded PCM clip (see [`ramp_audio`]).
pub fn clip_window(clip: &AudioClip) -> (f64, f64) {
    match clip {
        AudioClip::Encoded { bytes, .. } => {
            let text = String::from_utf8_lossy(bytes);
            let mut parts = text.split(':').map(|p| p.parse::<f64>().unwrap_or(-1.0));
            (parts.next().unwrap_or(-1.0), parts.next().unwrap_or(-1.0))
        }
        AudioClip::Pcm {
            samples,
            sample_rate,
        } => {
            let start = samples.first().copied().unwrap_or(-1.0) as f64;
            (start, start + samples.len() as f64 / *sample_rate as f64)
        }
    }
}

/// Decoded "audio" whose sample values are their own timestamps.
pub fn ramp_audio(duration: f64, sample_rate: u32) -> crate::audio::DecodedAudio {
    let len = (duration * sample_rate as f64).round() as usize;
    let samples = (0..len).map(|i| i as f32 / sample_rate as f32).collect();
    crate::audio::DecodedAudio::new(samples, sample_rate)
}

/// Two segments splitting the clip in half, labelled with the clip start.
pub fn mock_transcriber() -> Scripted<TranscriptionRequest, Vec<SubtitleSegment>> {
    Scripted::new("whisper-1", |req: &TranscriptionRequest| {
        let (start, _) = clip_window(&req.audio);
        let half = req.duration / 2.0;
        Ok(vec![
            SubtitleSegment::new(0.0, half, format!("chunk at {:.0} first line", start)),
            SubtitleSegment::new(half, req.duration, format!("chunk at {:.0} second line", start)),
        ])
    })
}

/// Echoes the segments with "refined" appended.
pub fn mock_refiner() -> Scripted<RefineRequest, Vec<SubtitleSegment>> {
    Scripted::new("gpt-4.1", |req: &RefineRequest| {
        Ok(req
            .segments
            .iter()
            .cloned()
            .map(|mut s| {
                s.original_text.push_str(" refined");
                s
            })
            .collect())
    })
}

/// Prefixes every line with "EN:".
pub fn mock_translator() -> Scripted<TranslateRequest, Vec<TranslatedLine>> {
    Scripted::new("gpt-4.1-mini", |req: &TranslateRequest| {
        Ok(req
            .segments
            .iter()
            .map(|s| TranslatedLine {
                id: s.id.clone(),
                translated_text: format!("EN: {}", s.original_text),
            })
            .collect())
    })
}

pub fn mock_glossary() -> Scripted<GlossaryRequest, Vec<GlossaryTerm>> {
    Scripted::new("gpt-4.1-mini", |_: &GlossaryRequest| {
        Ok(vec![GlossaryTerm::new("Tolk", "Interpreter")])
    })
}

pub fn mock_speakers() -> Scripted<SpeakerRequest, Vec<SpeakerProfile>> {
    Scripted::new("gpt-4.1-mini", |_: &SpeakerRequest| {
        Ok(vec![SpeakerProfile {
            id: "S1".to_string(),
            voice_characteristics: "calm".to_string(),
            inferred_identity: None,
            sample_quotes: Vec::new(),
            confidence: 0.9,
        }])
    })
}

/// Scripted clients with the built-in timing aligner.
pub fn mock_clients() -> ModelClients {
    ModelClients {
        transcriber: Arc::new(mock_transcriber()),
        refiner: Arc::new(mock_refiner()),
        aligner: Arc::new(TimingAligner),
        translator: Arc::new(mock_translator()),
        glossary: Arc::new(mock_glossary()),
        speakers: Arc::new(mock_speakers()),
    }
}

/// Install a fresh default refiner and return its probe.
pub fn refiner_probe(run: &mut PipelineContext) -> Arc<Probe> {
    let refiner = mock_refiner();
    let probe = refiner.probe.clone();
    run.clients.refiner = Arc::new(refiner);
    probe
}

/// A single-chunk run context over [`MockAudio`] and [`mock_clients`].
pub fn context_with(settings: Settings) -> PipelineContext {
    let glossary = GlossarySnapshot::from_user(settings.glossary.terms.clone());
    PipelineContext {
        gates: ResourceGates::new(&settings.concurrency),
        usage: Arc::new(UsageReporter::new(settings.pricing.clone())),
        settings: Arc::new(settings),
        clients: mock_clients(),
        audio: Arc::new(MockAudio),
        glossary: DependencyFuture::ready("glossary", Arc::new(glossary)),
        speakers: DependencyFuture::ready("speakers", Arc::new(Vec::new())),
        cancel: CancellationToken::new(),
        progress: Arc::new(crate::progress::NoopProgress),
        artifacts: Arc::new(NoopArtifacts),
        fixtures: Arc::new(NoFixtures),
        total_chunks: 1,
        started: Instant::now(),
    }
}

/// Progress sink that keeps every event.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// Replace the run's progress sink with a recorder.
    pub fn attach(run: &mut PipelineContext) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        run.progress = recorder.clone();
        recorder
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ProgressStatus> {
        self.events().iter().map(|e| e.status).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// In-memory fixtures.
#[derive(Default)]
pub struct StaticFixtures {
    entries: HashMap<(PipelineStage, usize), Value>,
}

impl StaticFixtures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: PipelineStage, chunk_index: usize, value: Value) -> Self {
        self.entries.insert((stage, chunk_index), value);
        self
    }
}

#[async_trait]
impl FixtureSource for StaticFixtures {
    async fn load(&self, stage: PipelineStage, chunk_index: usize) -> Result<Option<Value>> {
        Ok(self.entries.get(&(stage, chunk_index)).cloned())
    }
}
