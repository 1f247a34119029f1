//! Model call interfaces.
//!
//! Each provider is an async function with a structured request, a
//! cancellation token and a typed error channel. Retries belong to the step
//! driver, never to the provider.

mod openai;
mod timing;

pub use openai::{
    check_api_key, ChatClient, ChatGlossaryExtractor, ChatRefiner, ChatSpeakerProfiler,
    ChatTranslator, WhisperTranscriber,
};
pub use timing::TimingAligner;

use crate::audio::AudioClip;
use crate::config::{Prompts, Settings};
use crate::error::Result;
use crate::models::{GlossaryTerm, SpeakerProfile, SubtitleSegment};
use crate::usage::{Charge, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output of one provider call plus what it consumed, per model.
///
/// Composite providers (e.g. transcribe then extract) carry one charge per
/// underlying model call.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub output: T,
    pub charges: Vec<Charge>,
}

impl<T> Completion<T> {
    pub fn new(output: T, model: &str, usage: Usage) -> Self {
        Self {
            output,
            charges: vec![Charge::new(model, usage)],
        }
    }

    /// A completion that consumed nothing billable.
    pub fn free(output: T) -> Self {
        Self {
            output,
            charges: Vec::new(),
        }
    }

    /// Prepend charges from calls made on the way to this one.
    pub fn with_charges(mut self, mut earlier: Vec<Charge>) -> Self {
        earlier.append(&mut self.charges);
        self.charges = earlier;
        self
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Transcribe one chunk's audio.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: AudioClip,
    /// Source language hint (ISO 639-1).
    pub language: Option<String>,
    /// Length of the clip in seconds.
    pub duration: f64,
}

/// Correct a raw transcript.
#[derive(Debug, Clone)]
pub struct RefineRequest {
    /// Chunk audio, for providers that listen as well as read.
    pub audio: Option<AudioClip>,
    pub segments: Vec<SubtitleSegment>,
    pub glossary: Vec<GlossaryTerm>,
    pub speakers: Vec<SpeakerProfile>,
    pub language: Option<String>,
    pub duration: f64,
}

/// Fix cue timing of refined segments.
#[derive(Debug, Clone)]
pub struct AlignRequest {
    pub segments: Vec<SubtitleSegment>,
    pub duration: f64,
    pub min_cue_seconds: f64,
}

/// Translate segment text.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub segments: Vec<SubtitleSegment>,
    pub glossary: Vec<GlossaryTerm>,
    pub target_language: String,
}

/// One translated line, keyed by segment id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedLine {
    pub id: String,
    pub translated_text: String,
}

/// Extract glossary terms from one sampled chunk.
#[derive(Debug, Clone)]
pub struct GlossaryRequest {
    pub audio: AudioClip,
    pub language: Option<String>,
    pub target_language: String,
}

/// One sampled stretch of speech for speaker profiling.
#[derive(Debug, Clone)]
pub struct SpeakerSample {
    /// Source time of the sample start.
    pub start: f64,
    pub end: f64,
    pub audio: AudioClip,
}

/// Profile the voices heard in a set of samples.
#[derive(Debug, Clone)]
pub struct SpeakerRequest {
    pub samples: Vec<SpeakerSample>,
    pub language: Option<String>,
    pub max_speakers: Option<u32>,
}

// ============================================================================
// Provider traits
// ============================================================================

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn model(&self) -> &str;

    /// Fail fast when credentials or tools are missing.
    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>>;
}

#[async_trait]
pub trait Refiner: Send + Sync {
    fn model(&self) -> &str;

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Whether `refine` listens to the chunk audio. When false, no audio is
    /// fetched for the request.
    fn wants_audio(&self) -> bool {
        true
    }

    async fn refine(
        &self,
        request: RefineRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>>;
}

#[async_trait]
pub trait Aligner: Send + Sync {
    fn model(&self) -> &str;

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn align(
        &self,
        request: AlignRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    fn model(&self) -> &str;

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn translate(
        &self,
        request: TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<TranslatedLine>>>;
}

#[async_trait]
pub trait GlossaryExtractor: Send + Sync {
    fn model(&self) -> &str;

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn extract(
        &self,
        request: GlossaryRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<GlossaryTerm>>>;
}

#[async_trait]
pub trait SpeakerProfiler: Send + Sync {
    fn model(&self) -> &str;

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn profile(
        &self,
        request: SpeakerRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SpeakerProfile>>>;
}

/// The model clients a run is built with.
#[derive(Clone)]
pub struct ModelClients {
    pub transcriber: Arc<dyn Transcriber>,
    pub refiner: Arc<dyn Refiner>,
    pub aligner: Arc<dyn Aligner>,
    pub translator: Arc<dyn Translator>,
    pub glossary: Arc<dyn GlossaryExtractor>,
    pub speakers: Arc<dyn SpeakerProfiler>,
}

impl ModelClients {
    /// OpenAI-backed clients with the built-in timing aligner.
    pub fn openai(settings: &Settings, prompts: Arc<Prompts>) -> Result<Self> {
        let timeout = std::time::Duration::from_secs(settings.pipeline.request_timeout_seconds);
        let client = openai::create_client(timeout)?;

        let whisper = Arc::new(WhisperTranscriber::new(
            client.clone(),
            &settings.transcription.model,
        ));
        let chat = ChatClient::new(client, prompts);

        Ok(Self {
            transcriber: whisper.clone(),
            refiner: Arc::new(ChatRefiner::new(chat.clone(), &settings.refinement.model)),
            aligner: Arc::new(TimingAligner),
            translator: Arc::new(ChatTranslator::new(chat.clone(), &settings.translation.model)),
            glossary: Arc::new(ChatGlossaryExtractor::new(
                chat.clone(),
                whisper.clone(),
                &settings.glossary.model,
            )),
            speakers: Arc::new(ChatSpeakerProfiler::new(chat, whisper, &settings.speakers.model)),
        })
    }
}
