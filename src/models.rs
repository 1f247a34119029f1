//! Data models shared across the pipeline.

use serde::{Deserialize, Serialize};

// ============================================================================
// Subtitle Types
// ============================================================================

/// A single subtitle cue.
///
/// Times are chunk-local while a chunk is being processed and source-global
/// once the chunk result has been converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    /// Stable identifier across in-place edits.
    pub id: String,
    /// Start time in seconds.
    pub start_time: f64,
    /// End time in seconds.
    pub end_time: f64,
    /// Text in the source language.
    pub original_text: String,
    /// Text in the target language, once translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    /// Speaker label, when speaker analysis is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    /// Caller-visible annotation carried through every stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl SubtitleSegment {
    /// Create a segment with a freshly minted id.
    pub fn new(start_time: f64, end_time: f64, original_text: impl Into<String>) -> Self {
        Self {
            id: new_segment_id(),
            start_time,
            end_time,
            original_text: original_text.into(),
            translated_text: None,
            speaker_id: None,
            comment: None,
        }
    }

    /// Create a segment with an explicit id.
    pub fn with_id(
        id: impl Into<String>,
        start_time: f64,
        end_time: f64,
        original_text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ..Self::new(start_time, end_time, original_text)
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Midpoint of this segment in seconds.
    pub fn midpoint(&self) -> f64 {
        (self.start_time + self.end_time) / 2.0
    }

    /// Length of the time range shared with another segment.
    pub fn overlap_with(&self, other: &SubtitleSegment) -> f64 {
        (self.end_time.min(other.end_time) - self.start_time.max(other.start_time)).max(0.0)
    }

    /// Shift both timestamps by `offset` seconds.
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start_time += offset;
        self.end_time += offset;
        self
    }
}

/// Mint a new segment identifier.
pub fn new_segment_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Chunk Types
// ============================================================================

/// One contiguous time window of the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Position of the chunk in the source (0-based).
    pub index: usize,
    /// Window start in source seconds.
    pub start_offset: f64,
    /// Window end in source seconds (exclusive).
    pub end_offset: f64,
}

impl ChunkSpec {
    pub fn new(index: usize, start_offset: f64, end_offset: f64) -> Self {
        Self {
            index,
            start_offset,
            end_offset,
        }
    }

    /// Window length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_offset - self.start_offset
    }

    /// 1-based chunk number used in progress reporting.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

// ============================================================================
// Dependency Types
// ============================================================================

/// A glossary entry used to keep terminology consistent across chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl GlossaryTerm {
    pub fn new(term: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            translation: translation.into(),
            notes: None,
        }
    }
}

/// A voice profile produced once per run from a representative sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub id: String,
    pub voice_characteristics: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_identity: Option<String>,
    #[serde(default)]
    pub sample_quotes: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

// ============================================================================
// Stage Types
// ============================================================================

/// The ordered stages every chunk runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Transcribe,
    WaitForDependencies,
    Refine,
    Align,
    Translate,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Transcribe,
        PipelineStage::WaitForDependencies,
        PipelineStage::Refine,
        PipelineStage::Align,
        PipelineStage::Translate,
    ];

    /// Stable label used in logs, artifact keys and fixture paths.
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Transcribe => "transcribe",
            PipelineStage::WaitForDependencies => "wait_for_dependencies",
            PipelineStage::Refine => "refine",
            PipelineStage::Align => "align",
            PipelineStage::Translate => "translate",
        }
    }

    /// Whether the stage reads chunk audio.
    pub fn needs_audio(self) -> bool {
        matches!(self, PipelineStage::Transcribe | PipelineStage::Refine)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "transcribe" | "transcription" => Ok(PipelineStage::Transcribe),
            "wait_for_dependencies" | "dependencies" | "wait" => {
                Ok(PipelineStage::WaitForDependencies)
            }
            "refine" | "refinement" => Ok(PipelineStage::Refine),
            "align" | "alignment" => Ok(PipelineStage::Align),
            "translate" | "translation" => Ok(PipelineStage::Translate),
            _ => Err(format!("Unknown pipeline stage: {}", s)),
        }
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_timestamp(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_overlap() {
        let a = SubtitleSegment::new(0.0, 5.0, "a");
        let b = SubtitleSegment::new(3.0, 8.0, "b");
        let c = SubtitleSegment::new(9.0, 10.0, "c");

        assert!((a.overlap_with(&b) - 2.0).abs() < 1e-9);
        assert_eq!(a.overlap_with(&c), 0.0);
    }

    #[test]
    fn test_segment_ids_are_unique() {
        let a = SubtitleSegment::new(0.0, 1.0, "a");
        let b = SubtitleSegment::new(0.0, 1.0, "a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_stage_order_and_parsing() {
        assert!(PipelineStage::Transcribe < PipelineStage::Refine);
        assert!(PipelineStage::Align < PipelineStage::Translate);
        assert_eq!("refine".parse::<PipelineStage>().unwrap(), PipelineStage::Refine);
        assert_eq!(
            "wait-for-dependencies".parse::<PipelineStage>().unwrap(),
            PipelineStage::WaitForDependencies
        );
        assert!("render".parse::<PipelineStage>().is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(65.0), "01:05");
        assert_eq!(format_timestamp(3665.0), "01:01:05");
    }

    #[test]
    fn test_segment_serialization_skips_empty_fields() {
        let segment = SubtitleSegment::with_id("s1", 0.0, 1.5, "Hello");
        let json = serde_json::to_string(&segment).unwrap();
        assert!(json.contains("\"id\":\"s1\""));
        assert!(!json.contains("translated_text"));
    }
}
