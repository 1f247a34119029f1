//! Reconciliation of model-edited segments with their originals.
//!
//! Models may split, merge or reorder segments. Every edited segment is
//! matched to one original so caller-visible metadata (comment, speaker)
//! survives:
//!
//! 1. the original with the same id, if no earlier edited segment claimed it;
//! 2. else the original with the largest time overlap, ties to the earlier one;
//! 3. else the original with the nearest midpoint, ties to the earlier one.
//!
//! The first edited segment claiming an id keeps it. Later claimants get a
//! fresh id.

use crate::models::{new_segment_id, ChunkSpec, SubtitleSegment};
use std::collections::{HashMap, HashSet};

/// Shortest cue kept when de-overlapping leaves room for it.
const MIN_CUE_SECONDS: f64 = 0.01;

/// Reconcile `edited` against `originals` and normalize the result.
pub fn reconcile(originals: &[SubtitleSegment], edited: Vec<SubtitleSegment>) -> Vec<SubtitleSegment> {
    let mut ordered: Vec<&SubtitleSegment> = originals.iter().collect();
    ordered.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    let by_id: HashMap<&str, &SubtitleSegment> =
        originals.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut claimed: HashSet<String> = HashSet::new();
    let mut reconciled = Vec::with_capacity(edited.len());

    for mut segment in edited {
        let fresh_claim = !claimed.contains(&segment.id);
        let source = match by_id.get(segment.id.as_str()) {
            Some(original) if fresh_claim => Some(*original),
            _ => best_match(&ordered, &segment),
        };

        if !fresh_claim {
            segment.id = new_segment_id();
        }
        claimed.insert(segment.id.clone());

        if let Some(source) = source {
            if segment.comment.is_none() {
                segment.comment = source.comment.clone();
            }
            if segment.speaker_id.is_none() {
                segment.speaker_id = source.speaker_id.clone();
            }
        }
        reconciled.push(segment);
    }

    normalize(reconciled)
}

/// Best original by overlap, else by nearest midpoint. `ordered` is sorted by start.
fn best_match<'a>(
    ordered: &[&'a SubtitleSegment],
    segment: &SubtitleSegment,
) -> Option<&'a SubtitleSegment> {
    let mut best: Option<(&SubtitleSegment, f64)> = None;
    for original in ordered {
        let overlap = original.overlap_with(segment);
        if overlap > 0.0 && best.map_or(true, |(_, b)| overlap > b) {
            best = Some((original, overlap));
        }
    }
    if let Some((original, _)) = best {
        return Some(original);
    }

    let midpoint = segment.midpoint();
    let mut nearest: Option<(&SubtitleSegment, f64)> = None;
    for original in ordered {
        let distance = (original.midpoint() - midpoint).abs();
        if nearest.map_or(true, |(_, d)| distance < d) {
            nearest = Some((original, distance));
        }
    }
    nearest.map(|(original, _)| original)
}

/// Sort by start and trim each end to the next start.
///
/// A segment squeezed to zero length keeps a 10 ms minimum when the gap to
/// the next segment allows it.
pub fn normalize(mut segments: Vec<SubtitleSegment>) -> Vec<SubtitleSegment> {
    segments.sort_by(|a, b| {
        a.start_time
            .total_cmp(&b.start_time)
            .then(a.end_time.total_cmp(&b.end_time))
    });

    let starts: Vec<f64> = segments.iter().map(|s| s.start_time).collect();
    for (i, segment) in segments.iter_mut().enumerate() {
        if segment.end_time < segment.start_time {
            segment.end_time = segment.start_time;
        }
        if let Some(&next_start) = starts.get(i + 1) {
            if segment.end_time > next_start {
                segment.end_time = next_start;
            }
            if segment.duration() <= 0.0 && next_start - segment.start_time >= MIN_CUE_SECONDS {
                segment.end_time = segment.start_time + MIN_CUE_SECONDS;
            }
        }
    }
    segments
}

/// Convert chunk-local times to source-global times.
///
/// Local times are clamped to the chunk window first, so a model hallucinating
/// timestamps past the chunk end cannot leak into the next chunk's range.
pub fn to_global(segments: Vec<SubtitleSegment>, chunk: &ChunkSpec) -> Vec<SubtitleSegment> {
    let limit = chunk.duration().max(0.0);
    segments
        .into_iter()
        .map(|mut segment| {
            segment.start_time = segment.start_time.clamp(0.0, limit);
            segment.end_time = segment.end_time.clamp(segment.start_time, limit);
            segment.shifted(chunk.start_offset)
        })
        .collect()
}
