//! [`ChunkAudio`] implementations for the two access modes.

use super::{AudioClip, ChunkAudio, DecodedAudio, SegmentExtractor};
use crate::error::{Result, TolkError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Serves slices from a fully decoded source.
pub struct InMemoryAudio {
    audio: DecodedAudio,
}

impl InMemoryAudio {
    pub fn new(audio: DecodedAudio) -> Self {
        Self { audio }
    }
}

#[async_trait]
impl ChunkAudio for InMemoryAudio {
    async fn slice(&self, start: f64, end: f64) -> Result<AudioClip> {
        Ok(self.audio.slice(start, end))
    }
}

/// Extracts each slice from the source file when asked (long-video mode).
pub struct OnDemandAudio {
    source: PathBuf,
    extractor: Arc<dyn SegmentExtractor>,
}

impl OnDemandAudio {
    pub fn new(source: PathBuf, extractor: Arc<dyn SegmentExtractor>) -> Self {
        Self { source, extractor }
    }
}

#[async_trait]
impl ChunkAudio for OnDemandAudio {
    async fn slice(&self, start: f64, end: f64) -> Result<AudioClip> {
        self.extractor.extract(&self.source, start, end).await
    }
}

/// Used when preprocessing was skipped because no stage needs audio.
pub struct NoAudio;

#[async_trait]
impl ChunkAudio for NoAudio {
    async fn slice(&self, start: f64, end: f64) -> Result<AudioClip> {
        Err(TolkError::Audio(format!(
            "no audio loaded for {:.1}s-{:.1}s (preprocessing was skipped)",
            start, end
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Recording;

    #[async_trait]
    impl SegmentExtractor for Recording {
        async fn extract(&self, source: &Path, start: f64, end: f64) -> Result<AudioClip> {
            Ok(AudioClip::Encoded {
                bytes: format!("{}:{}:{}", source.display(), start, end).into_bytes(),
                file_name: "clip.mp3".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_on_demand_forwards_exact_range() {
        let audio = OnDemandAudio::new(PathBuf::from("/media/talk.mp4"), Arc::new(Recording));
        let (_, bytes) = audio.slice(60.0, 120.0).await.unwrap().into_upload().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "/media/talk.mp4:60:120");
    }

    #[tokio::test]
    async fn test_no_audio_errors() {
        assert!(NoAudio.slice(0.0, 1.0).await.is_err());
    }
}
