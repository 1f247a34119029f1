//! Built-in aligner: deterministic cue timing cleanup.

use super::{AlignRequest, Aligner, Completion};
use crate::error::Result;
use crate::models::SubtitleSegment;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Sorts cues, clamps them to the chunk, removes overlaps and stretches cues
/// shorter than the minimum when the gap to the next cue allows.
pub struct TimingAligner;

impl TimingAligner {
    pub fn align_segments(
        mut segments: Vec<SubtitleSegment>,
        duration: f64,
        min_cue_seconds: f64,
    ) -> Vec<SubtitleSegment> {
        let limit = duration.max(0.0);
        for segment in &mut segments {
            segment.start_time = segment.start_time.clamp(0.0, limit);
            segment.end_time = segment.end_time.clamp(segment.start_time, limit);
        }
        segments.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let starts: Vec<f64> = segments.iter().map(|s| s.start_time).collect();
        for (i, segment) in segments.iter_mut().enumerate() {
            let next_start = starts.get(i + 1).copied().unwrap_or(limit);
            if segment.end_time > next_start {
                segment.end_time = next_start;
            }
            if segment.duration() < min_cue_seconds {
                segment.end_time = (segment.start_time + min_cue_seconds).min(next_start);
            }
        }
        segments
    }
}

#[async_trait]
impl Aligner for TimingAligner {
    fn model(&self) -> &str {
        "timing"
    }

    async fn align(
        &self,
        request: AlignRequest,
        _cancel: &CancellationToken,
    ) -> Result<Completion<Vec<SubtitleSegment>>> {
        Ok(Completion::free(Self::align_segments(
            request.segments,
            request.duration,
            request.min_cue_seconds,
        )))
    }
}
