//! Chunk planning strategies.
//!
//! Every strategy returns contiguous windows covering `[0, total]`: the first
//! starts at 0, each starts where the previous ended, the last ends at
//! `total`.

use crate::audio::SpeechRegion;
use crate::models::ChunkSpec;

/// Cuts a source of known duration into chunk windows.
pub trait Segmenter: Send + Sync {
    fn plan(&self, total_duration: f64, chunk_duration: f64) -> Vec<ChunkSpec>;
}

/// Fixed-duration windows.
pub struct FixedSegmenter;

impl Segmenter for FixedSegmenter {
    fn plan(&self, total_duration: f64, chunk_duration: f64) -> Vec<ChunkSpec> {
        plan_with(total_duration, chunk_duration, |nominal, _| nominal)
    }
}

/// Windows whose boundaries snap to the nearest silence.
pub struct SpeechSegmenter {
    silences: Vec<f64>,
    window: f64,
}

impl SpeechSegmenter {
    /// `regions` are detected speech, sorted by start. Gaps of at least
    /// `min_silence` seconds between them (and before/after them) are the
    /// candidate cut points, at the gap midpoint.
    pub fn new(regions: &[SpeechRegion], total_duration: f64, window: f64, min_silence: f64) -> Self {
        let mut silences = Vec::new();
        let mut cursor = 0.0_f64;
        for region in regions {
            if region.start - cursor >= min_silence {
                silences.push((cursor + region.start) / 2.0);
            }
            cursor = cursor.max(region.end);
        }
        if total_duration - cursor >= min_silence {
            silences.push((cursor + total_duration) / 2.0);
        }

        Self {
            silences,
            window: window.max(0.0),
        }
    }

    /// Candidate cut points in seconds.
    pub fn silences(&self) -> &[f64] {
        &self.silences
    }

    fn snap(&self, nominal: f64, previous: f64) -> f64 {
        self.silences
            .iter()
            .copied()
            .filter(|s| *s > previous && (s - nominal).abs() <= self.window)
            .min_by(|a, b| (a - nominal).abs().total_cmp(&(b - nominal).abs()))
            .unwrap_or(nominal)
    }
}

impl Segmenter for SpeechSegmenter {
    fn plan(&self, total_duration: f64, chunk_duration: f64) -> Vec<ChunkSpec> {
        plan_with(total_duration, chunk_duration, |nominal, previous| {
            self.snap(nominal, previous)
        })
    }
}

/// Walk the source in `chunk_duration` steps, letting `boundary` move each cut.
fn plan_with(
    total_duration: f64,
    chunk_duration: f64,
    boundary: impl Fn(f64, f64) -> f64,
) -> Vec<ChunkSpec> {
    let usable = total_duration.is_finite()
        && total_duration > 0.0
        && chunk_duration.is_finite()
        && chunk_duration > 0.0;
    if !usable {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0.0;
    while total_duration - start > chunk_duration {
        let cut = boundary(start + chunk_duration, start);
        // A cut must make progress and leave something after it.
        let cut = if cut > start && cut < total_duration {
            cut
        } else {
            start + chunk_duration
        };
        chunks.push(ChunkSpec::new(chunks.len(), start, cut));
        start = cut;
    }
    chunks.push(ChunkSpec::new(chunks.len(), start, total_duration));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_contiguous(chunks: &[ChunkSpec], total: f64) {
        assert_eq!(chunks[0].start_offset, 0.0);
        assert_eq!(chunks.last().unwrap().end_offset, total);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.duration() > 0.0);
        }
    }

    #[test]
    fn test_fixed_125_by_60() {
        let chunks = FixedSegmenter.plan(125.0, 60.0);
        let windows: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(windows, [(0.0, 60.0), (60.0, 120.0), (120.0, 125.0)]);
        assert_contiguous(&chunks, 125.0);
    }

    #[test]
    fn test_fixed_exact_multiple_and_short_source() {
        assert_eq!(FixedSegmenter.plan(120.0, 60.0).len(), 2);
        assert_eq!(FixedSegmenter.plan(30.0, 60.0).len(), 1);
        assert!(FixedSegmenter.plan(0.0, 60.0).is_empty());
    }

    #[test]
    fn test_speech_boundaries_snap_to_silence() {
        let regions = vec![
            SpeechRegion::new(0.0, 55.0),
            SpeechRegion::new(57.0, 118.0),
            SpeechRegion::new(118.1, 200.0),
        ];
        let segmenter = SpeechSegmenter::new(&regions, 200.0, 10.0, 0.3);
        assert_eq!(segmenter.silences(), [56.0]);

        let chunks = segmenter.plan(200.0, 60.0);
        assert_eq!(chunks[0].end_offset, 56.0);
        // No silence near 116: fall back to the nominal cut.
        assert_eq!(chunks[1].end_offset, 116.0);
        assert_contiguous(&chunks, 200.0);
    }

    #[test]
    fn test_speech_silence_outside_window_ignored() {
        let regions = vec![SpeechRegion::new(0.0, 20.0), SpeechRegion::new(22.0, 150.0)];
        let segmenter = SpeechSegmenter::new(&regions, 150.0, 5.0, 0.3);
        let chunks = segmenter.plan(150.0, 60.0);
        assert_eq!(chunks[0].end_offset, 60.0);
        assert_contiguous(&chunks, 150.0);
    }
}
