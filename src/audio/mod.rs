//! Audio access for the pipeline.
//!
//! The pipeline never decodes audio itself. It talks to three collaborators:
//! an [`AudioDecoder`] that loads a whole source into memory, a
//! [`SegmentExtractor`] that pulls one time range on demand, and a
//! [`SpeechDetector`] that finds speech regions in decoded audio. Chunks read
//! their audio through [`ChunkAudio`], which hides which of the two access
//! modes the run ended up using.

mod ffmpeg;
mod source;
mod vad;

pub use ffmpeg::{probe_duration, FfmpegToolkit};
pub use source::{InMemoryAudio, NoAudio, OnDemandAudio};
pub use vad::{EnergyVad, VadConfig};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Sample rate every decoder produces.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// A slice of audio handed to a model call.
#[derive(Debug, Clone)]
pub enum AudioClip {
    /// Mono f32 samples.
    Pcm { samples: Vec<f32>, sample_rate: u32 },
    /// Already-encoded bytes (e.g. an mp3 cut by ffmpeg).
    Encoded { bytes: Vec<u8>, file_name: String },
}

impl AudioClip {
    /// Bytes and file name suitable for an upload.
    pub fn into_upload(self) -> Result<(String, Vec<u8>)> {
        match self {
            AudioClip::Pcm {
                samples,
                sample_rate,
            } => Ok(("audio.wav".to_string(), encode_wav(&samples, sample_rate)?)),
            AudioClip::Encoded { bytes, file_name } => Ok((file_name, bytes)),
        }
    }

    /// Whether the clip carries no audio at all.
    pub fn is_empty(&self) -> bool {
        match self {
            AudioClip::Pcm { samples, .. } => samples.is_empty(),
            AudioClip::Encoded { bytes, .. } => bytes.is_empty(),
        }
    }
}

/// Encode mono f32 samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(scaled)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// A whole source decoded into memory.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Copy the samples in `[start, end)` seconds into a clip.
    pub fn slice(&self, start: f64, end: f64) -> AudioClip {
        let rate = self.sample_rate as f64;
        let len = self.samples.len();
        let from = ((start.max(0.0) * rate) as usize).min(len);
        let to = ((end.max(0.0) * rate) as usize).clamp(from, len);
        AudioClip::Pcm {
            samples: self.samples[from..to].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// A contiguous stretch of detected speech, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechRegion {
    pub start: f64,
    pub end: f64,
}

impl SpeechRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Per-chunk audio access.
#[async_trait]
pub trait ChunkAudio: Send + Sync {
    /// Audio for exactly `[start, end)` seconds of the source.
    async fn slice(&self, start: f64, end: f64) -> Result<AudioClip>;
}

/// Loads a whole source into memory.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, source: &Path) -> Result<DecodedAudio>;
}

/// Pulls one time range of a source without decoding the rest.
#[async_trait]
pub trait SegmentExtractor: Send + Sync {
    /// Whether extraction can be used at all (e.g. the tool is installed).
    fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, source: &Path, start: f64, end: f64) -> Result<AudioClip>;
}

/// Finds speech regions in decoded audio.
pub trait SpeechDetector: Send + Sync {
    fn detect(&self, audio: &DecodedAudio) -> Vec<SpeechRegion>;
}

/// The audio collaborators a run is built with.
#[derive(Clone)]
pub struct MediaToolkit {
    pub decoder: Arc<dyn AudioDecoder>,
    pub extractor: Option<Arc<dyn SegmentExtractor>>,
    pub detector: Arc<dyn SpeechDetector>,
}

impl MediaToolkit {
    /// ffmpeg for decoding and extraction, energy VAD for speech detection.
    pub fn ffmpeg(temp_dir: &Path) -> Self {
        let ffmpeg = Arc::new(FfmpegToolkit::new(temp_dir));
        Self {
            decoder: ffmpeg.clone(),
            extractor: Some(ffmpeg),
            detector: Arc::new(EnergyVad::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_clamps_to_bounds() {
        let audio = DecodedAudio::new(vec![0.1; 16_000 * 3], TARGET_SAMPLE_RATE);
        assert!((audio.duration() - 3.0).abs() < 1e-9);

        match audio.slice(1.0, 2.0) {
            AudioClip::Pcm { samples, .. } => assert_eq!(samples.len(), 16_000),
            _ => panic!("expected pcm"),
        }
        match audio.slice(2.5, 10.0) {
            AudioClip::Pcm { samples, .. } => assert_eq!(samples.len(), 8_000),
            _ => panic!("expected pcm"),
        }
        assert!(audio.slice(5.0, 6.0).is_empty());
    }

    #[test]
    fn test_encode_wav_header() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte header + 4 samples * 2 bytes
        assert_eq!(bytes.len(), 52);
    }

    #[test]
    fn test_pcm_upload_is_wav() {
        let clip = AudioClip::Pcm {
            samples: vec![0.0; 10],
            sample_rate: TARGET_SAMPLE_RATE,
        };
        let (name, bytes) = clip.into_upload().unwrap();
        assert_eq!(name, "audio.wav");
        assert_eq!(&bytes[0..4], b"RIFF");
    }
}
