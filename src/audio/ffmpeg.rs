//! ffmpeg/ffprobe backed decoding and segment extraction.

use super::{AudioClip, AudioDecoder, DecodedAudio, SegmentExtractor, TARGET_SAMPLE_RATE};
use crate::error::{Result, TolkError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Decoder and extractor driving the ffmpeg command-line tools.
pub struct FfmpegToolkit {
    temp_dir: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(temp_dir: &Path) -> Self {
        Self {
            temp_dir: temp_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl AudioDecoder for FfmpegToolkit {
    /// Decode the source to 16 kHz mono f32 samples.
    #[instrument(skip(self), fields(source = %source.display()))]
    async fn decode(&self, source: &Path) -> Result<DecodedAudio> {
        let result = Command::new("ffmpeg")
            .arg("-i").arg(source)
            .arg("-vn")
            .arg("-ac").arg("1")
            .arg("-ar").arg(TARGET_SAMPLE_RATE.to_string())
            .arg("-f").arg("f32le")
            .arg("-loglevel").arg("error")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TolkError::ToolNotFound("ffmpeg".into()));
            }
            Err(e) => return Err(TolkError::Audio(format!("ffmpeg execution failed: {e}"))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TolkError::ToolFailed(format!("ffmpeg decode failed: {stderr}")));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let decoded = DecodedAudio::new(samples, TARGET_SAMPLE_RATE);
        info!("Decoded {:.1}s of audio", decoded.duration());
        Ok(decoded)
    }
}

#[async_trait]
impl SegmentExtractor for FfmpegToolkit {
    fn is_available(&self) -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Cut `[start, end)` out of the source into an mp3 clip.
    async fn extract(&self, source: &Path, start: f64, end: f64) -> Result<AudioClip> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let dest = tempfile::Builder::new()
            .prefix("tolk_segment_")
            .suffix(".mp3")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();

        extract_segment(source, &dest, start, (end - start).max(0.0)).await?;
        let bytes = tokio::fs::read(&dest).await?;
        debug!("Extracted {:.1}s-{:.1}s ({} bytes)", start, end, bytes.len());

        Ok(AudioClip::Encoded {
            bytes,
            file_name: "segment.mp3".to_string(),
        })
    }
}

/// Extracts a time segment from an audio file.
async fn extract_segment(source: &Path, dest: &Path, start: f64, length: f64) -> Result<()> {
    // Stream copy is lossless and fast when the source codec already fits.
    let copy_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-vn")
        .arg("-c").arg("copy")
        .arg("-y")
        .arg("-loglevel").arg("warning")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Ok(status) = copy_result {
        let written = tokio::fs::metadata(dest).await.map(|m| m.len() > 0).unwrap_or(false);
        if status.success() && written {
            return Ok(());
        }
    }

    warn!("Stream copy failed, re-encoding segment");

    let encode_result = Command::new("ffmpeg")
        .arg("-ss").arg(format!("{:.3}", start))
        .arg("-i").arg(source)
        .arg("-t").arg(format!("{:.3}", length))
        .arg("-vn")
        .arg("-codec:a").arg("libmp3lame")
        .arg("-qscale:a").arg("2")
        .arg("-y")
        .arg("-loglevel").arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match encode_result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(TolkError::ToolFailed(format!("Segment extraction failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TolkError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(TolkError::Audio(format!("ffmpeg error: {e}"))),
    }
}

/// Queries the duration of a media file using ffprobe with JSON output.
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let result = Command::new("ffprobe")
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg(path)
        .output()
        .await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TolkError::ToolNotFound("ffprobe".into()));
        }
        Err(e) => {
            return Err(TolkError::Audio(format!("ffprobe failed: {e}")));
        }
    };

    if !output.status.success() {
        return Err(TolkError::ToolFailed("ffprobe returned error".into()));
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    parse_probe_duration(&json_str)
}

fn parse_probe_duration(json_str: &str) -> Result<f64> {
    let parsed: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|_| TolkError::Audio("Invalid ffprobe output".into()))?;

    parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| TolkError::Audio("Could not determine media duration".into()))
}
