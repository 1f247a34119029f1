//! Chunk planning: decide how audio is accessed and where chunks start.

use super::segmenter::{FixedSegmenter, Segmenter, SpeechSegmenter};
use crate::audio::{ChunkAudio, InMemoryAudio, MediaToolkit, NoAudio, OnDemandAudio, SpeechRegion};
use crate::config::{ChunkingStrategy, Settings};
use crate::error::{Result, TolkError};
use crate::models::{ChunkSpec, PipelineStage};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Nominal chunk length when no stage reads audio.
pub const SYNTHETIC_CHUNK_SECONDS: f64 = 60.0;

/// How chunk audio is obtained for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// The whole source was decoded up front.
    InMemory,
    /// Each chunk is extracted from the file when needed.
    LongVideo,
    /// No audio at all; every audio stage is skipped or mocked.
    Synthetic,
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioMode::InMemory => f.write_str("in-memory"),
            AudioMode::LongVideo => f.write_str("long-video"),
            AudioMode::Synthetic => f.write_str("synthetic"),
        }
    }
}

/// Output of preprocessing.
pub struct ChunkPlan {
    pub chunks: Vec<ChunkSpec>,
    pub audio: Arc<dyn ChunkAudio>,
    pub mode: AudioMode,
    /// Speech detected while planning, reused for speaker sampling.
    pub speech_regions: Option<Arc<Vec<SpeechRegion>>>,
    pub total_duration: f64,
}

pub struct Preprocessor<'a> {
    settings: &'a Settings,
    media: &'a MediaToolkit,
    refiner_wants_audio: bool,
}

impl<'a> Preprocessor<'a> {
    pub fn new(settings: &'a Settings, media: &'a MediaToolkit) -> Self {
        Self {
            settings,
            media,
            refiner_wants_audio: true,
        }
    }

    /// Whether the configured refiner sends audio along with the transcript.
    pub fn with_refiner_audio(mut self, wants_audio: bool) -> Self {
        self.refiner_wants_audio = wants_audio;
        self
    }

    /// Whether any audio-reading stage will run for real.
    pub fn needs_audio(&self) -> bool {
        PipelineStage::ALL
            .into_iter()
            .filter(|&stage| self.reads_audio(stage))
            .any(|stage| self.settings.debug.runs_for_real(stage))
    }

    fn reads_audio(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Refine => self.settings.refinement.enabled && self.refiner_wants_audio,
            stage => stage.needs_audio(),
        }
    }

    pub async fn plan(
        &self,
        source: &Path,
        total_duration: f64,
        cancel: &CancellationToken,
    ) -> Result<ChunkPlan> {
        let chunking = &self.settings.chunking;

        if !self.needs_audio() {
            let duration = if total_duration > 0.0 {
                total_duration
            } else {
                SYNTHETIC_CHUNK_SECONDS
            };
            info!("No stage reads audio, using one synthetic {:.0}s chunk", duration);
            return Ok(ChunkPlan {
                chunks: vec![ChunkSpec::new(0, 0.0, duration)],
                audio: Arc::new(NoAudio),
                mode: AudioMode::Synthetic,
                speech_regions: None,
                total_duration: duration,
            });
        }

        let extractor = self
            .media
            .extractor
            .as_ref()
            .filter(|extractor| extractor.is_available());
        if let Some(extractor) = extractor {
            if total_duration > chunking.long_video_threshold_seconds {
                let chunks = FixedSegmenter.plan(total_duration, chunking.chunk_duration_seconds);
                info!(
                    "Long source ({:.0}s), extracting {} chunks on demand",
                    total_duration,
                    chunks.len()
                );
                return Ok(ChunkPlan {
                    chunks,
                    audio: Arc::new(OnDemandAudio::new(source.to_path_buf(), extractor.clone())),
                    mode: AudioMode::LongVideo,
                    speech_regions: None,
                    total_duration,
                });
            }
        }

        let decoded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TolkError::Cancelled(Duration::ZERO)),
            decoded = self.media.decoder.decode(source) => decoded?,
        };
        if decoded.samples.is_empty() {
            return Err(TolkError::InvalidInput(format!(
                "{} contains no audio",
                source.display()
            )));
        }
        let total_duration = if total_duration > 0.0 {
            total_duration
        } else {
            decoded.duration()
        };

        let wants_regions =
            chunking.strategy == ChunkingStrategy::Speech || self.settings.speakers.enabled;
        let speech_regions = if wants_regions {
            let detector = self.media.detector.clone();
            let audio = decoded.clone();
            let regions = tokio::task::spawn_blocking(move || detector.detect(&audio))
                .await
                .map_err(|e| TolkError::Audio(format!("speech detection failed: {}", e)))?;
            debug!("Detected {} speech regions", regions.len());
            Some(Arc::new(regions))
        } else {
            None
        };

        let chunks = match (chunking.strategy, &speech_regions) {
            (ChunkingStrategy::Speech, Some(regions)) => SpeechSegmenter::new(
                regions,
                total_duration,
                chunking.silence_window_seconds,
                chunking.min_silence_seconds,
            )
            .plan(total_duration, chunking.chunk_duration_seconds),
            _ => FixedSegmenter.plan(total_duration, chunking.chunk_duration_seconds),
        };
        info!(
            "Planned {} chunks over {:.0}s ({:?})",
            chunks.len(),
            total_duration,
            chunking.strategy
        );

        Ok(ChunkPlan {
            chunks,
            audio: Arc::new(InMemoryAudio::new(decoded)),
            mode: AudioMode::InMemory,
            speech_regions,
            total_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioClip, AudioDecoder, DecodedAudio, EnergyVad, SegmentExtractor};
    use crate::pipeline::testing::ramp_audio;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDecoder {
        duration: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioDecoder for CountingDecoder {
        async fn decode(&self, _source: &Path) -> Result<DecodedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ramp_audio(self.duration, 100))
        }
    }

    struct Extractor;

    #[async_trait]
    impl SegmentExtractor for Extractor {
        async fn extract(&self, _source: &Path, _start: f64, _end: f64) -> Result<AudioClip> {
            Ok(AudioClip::Encoded {
                bytes: vec![1],
                file_name: "x.mp3".to_string(),
            })
        }
    }

    fn media(duration: f64, extractor: bool) -> (MediaToolkit, Arc<CountingDecoder>) {
        let decoder = Arc::new(CountingDecoder {
            duration,
            calls: AtomicUsize::new(0),
        });
        let media = MediaToolkit {
            decoder: decoder.clone(),
            extractor: extractor.then(|| Arc::new(Extractor) as Arc<dyn SegmentExtractor>),
            detector: Arc::new(EnergyVad::default()),
        };
        (media, decoder)
    }

    fn fixed(chunk: f64) -> Settings {
        let mut settings = Settings::default();
        settings.chunking.strategy = ChunkingStrategy::Fixed;
        settings.chunking.chunk_duration_seconds = chunk;
        settings
    }

    #[tokio::test]
    async fn test_decodes_short_source() {
        let settings = fixed(60.0);
        let (media, decoder) = media(125.0, true);
        let plan = Preprocessor::new(&settings, &media)
            .plan(Path::new("talk.mp4"), 0.0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.mode, AudioMode::InMemory);
        assert_eq!(plan.chunks.len(), 3);
        assert_eq!(plan.chunks[2].end_offset, 125.0);
        assert!(plan.speech_regions.is_none());
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_source_skips_decoding() {
        let mut settings = fixed(300.0);
        settings.chunking.long_video_threshold_seconds = 3600.0;
        let (media, decoder) = media(0.0, true);
        let plan = Preprocessor::new(&settings, &media)
            .plan(Path::new("film.mkv"), 7200.0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.mode, AudioMode::LongVideo);
        assert_eq!(plan.chunks.len(), 24);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_source_without_extractor_decodes() {
        let settings = fixed(300.0);
        let (media, decoder) = media(4000.0, false);
        let plan = Preprocessor::new(&settings, &media)
            .plan(Path::new("film.mkv"), 4000.0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.mode, AudioMode::InMemory);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fast_path_without_audio_stages() {
        let mut settings = fixed(300.0);
        settings.debug.mock_stages = vec![PipelineStage::Transcribe];
        settings.debug.start_stage = Some(PipelineStage::Align);
        let (media, decoder) = media(125.0, true);
        let plan = Preprocessor::new(&settings, &media)
            .plan(Path::new("talk.mp4"), 0.0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(plan.mode, AudioMode::Synthetic);
        assert_eq!(plan.chunks, [ChunkSpec::new(0, 0.0, SYNTHETIC_CHUNK_SECONDS)]);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_text_only_refine_resume_takes_fast_path() {
        let mut settings = fixed(300.0);
        settings.debug.start_stage = Some(PipelineStage::Refine);
        settings.debug.stop_after = Some(PipelineStage::Refine);
        let (media, decoder) = media(125.0, true);

        let audio_refiner = Preprocessor::new(&settings, &media);
        assert!(audio_refiner.needs_audio());

        let plan = Preprocessor::new(&settings, &media)
            .with_refiner_audio(false)
            .plan(Path::new("talk.mp4"), 125.0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(plan.mode, AudioMode::Synthetic);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);

        settings.refinement.enabled = false;
        assert!(!Preprocessor::new(&settings, &media).needs_audio());
    }

    #[tokio::test]
    async fn test_speech_strategy_caches_regions() {
        let mut settings = Settings::default();
        settings.chunking.chunk_duration_seconds = 60.0;
        let (media, _) = media(125.0, false);
        let plan = Preprocessor::new(&settings, &media)
            .plan(Path::new("talk.mp4"), 0.0, &CancellationToken::new())
            .await
            .unwrap();

        assert!(plan.speech_regions.is_some());
        assert_eq!(plan.chunks.last().unwrap().end_offset, 125.0);
    }
}
