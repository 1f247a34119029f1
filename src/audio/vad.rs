//! Energy-based voice activity detection.

use super::{DecodedAudio, SpeechDetector, SpeechRegion};

/// Tuning for [`EnergyVad`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Analysis frame length.
    pub frame_ms: u32,
    /// Frames with RMS at or above this count as speech.
    pub rms_threshold: f32,
    /// Regions shorter than this after merging are dropped.
    pub min_speech_ms: u32,
    /// Regions separated by less than this are merged.
    pub merge_gap_ms: u32,
    /// Padding added on both sides of each region.
    pub pad_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            frame_ms: 30,
            rms_threshold: 0.01,
            min_speech_ms: 250,
            merge_gap_ms: 200,
            pad_ms: 50,
        }
    }
}

/// RMS frame detector.
#[derive(Debug, Clone, Default)]
pub struct EnergyVad {
    config: VadConfig,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }
}

impl SpeechDetector for EnergyVad {
    fn detect(&self, audio: &DecodedAudio) -> Vec<SpeechRegion> {
        let config = &self.config;
        let rate = audio.sample_rate as u64;
        if rate == 0 || audio.samples.is_empty() {
            return Vec::new();
        }

        let frame_samples = ((rate * config.frame_ms.max(1) as u64) / 1000).max(1) as usize;
        let total_ms = audio.samples.len() as u64 * 1000 / rate;

        // Active frames as [start_ms, end_ms) runs.
        let mut regions: Vec<(u64, u64)> = Vec::new();
        for (i, frame) in audio.samples.chunks(frame_samples).enumerate() {
            let energy: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
            if energy.sqrt() < config.rms_threshold {
                continue;
            }
            let start = i as u64 * config.frame_ms as u64;
            let end = (start + config.frame_ms as u64).min(total_ms);
            match regions.last_mut() {
                Some(last) if last.1 == start => last.1 = end,
                _ => regions.push((start, end)),
            }
        }

        merge_by_gap(&mut regions, config.merge_gap_ms as u64);

        if config.pad_ms > 0 {
            let pad = config.pad_ms as u64;
            for region in &mut regions {
                region.0 = region.0.saturating_sub(pad);
                region.1 = (region.1 + pad).min(total_ms);
            }
            merge_by_gap(&mut regions, 0);
        }

        regions
            .into_iter()
            .filter(|(start, end)| end.saturating_sub(*start) >= config.min_speech_ms as u64)
            .map(|(start, end)| SpeechRegion::new(start as f64 / 1000.0, end as f64 / 1000.0))
            .collect()
    }
}

fn merge_by_gap(regions: &mut Vec<(u64, u64)>, gap_ms: u64) {
    if regions.len() < 2 {
        return;
    }
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(regions.len());
    for &(start, end) in regions.iter() {
        match merged.last_mut() {
            Some(last) if start <= last.1 + gap_ms => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    *regions = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TARGET_SAMPLE_RATE;

    fn tone(seconds: f64) -> Vec<f32> {
        let n = (seconds * TARGET_SAMPLE_RATE as f64) as usize;
        (0..n).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect()
    }

    fn silence(seconds: f64) -> Vec<f32> {
        vec![0.0; (seconds * TARGET_SAMPLE_RATE as f64) as usize]
    }

    #[test]
    fn test_detects_two_regions_around_silence() {
        let mut samples = tone(1.2);
        samples.extend(silence(1.5));
        samples.extend(tone(0.9));
        let audio = DecodedAudio::new(samples, TARGET_SAMPLE_RATE);

        let regions = EnergyVad::default().detect(&audio);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].start < 0.01);
        assert!((regions[0].end - 1.25).abs() < 0.06);
        assert!((regions[1].start - 2.65).abs() < 0.06);
        assert!(regions[1].end <= audio.duration() + 1e-9);
    }

    #[test]
    fn test_short_gaps_are_merged() {
        let mut samples = tone(0.6);
        samples.extend(silence(0.09));
        samples.extend(tone(0.6));
        let audio = DecodedAudio::new(samples, TARGET_SAMPLE_RATE);

        assert_eq!(EnergyVad::default().detect(&audio).len(), 1);
    }

    #[test]
    fn test_silence_and_blips_yield_nothing() {
        let mut samples = silence(2.0);
        samples.extend(tone(0.06));
        samples.extend(silence(2.0));
        let audio = DecodedAudio::new(samples, TARGET_SAMPLE_RATE);

        assert!(EnergyVad::default().detect(&audio).is_empty());
        assert!(EnergyVad::default()
            .detect(&DecodedAudio::new(Vec::new(), TARGET_SAMPLE_RATE))
            .is_empty());
    }
}
