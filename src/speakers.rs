//! Run-wide speaker profiling.

use crate::audio::{ChunkAudio, SpeechRegion};
use crate::error::{Result, TolkError};
use crate::models::SpeakerProfile;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStage, ProgressStatus};
use crate::providers::{SpeakerProfiler, SpeakerRequest, SpeakerSample};
use crate::usage::UsageReporter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Choose sample windows totalling at most `budget` seconds.
///
/// With detected speech, evenly spread regions are used, each cut to at most
/// `window` seconds. Without it, evenly spaced windows across the source.
pub fn plan_samples(
    regions: Option<&[SpeechRegion]>,
    total_duration: f64,
    budget: f64,
    window: f64,
) -> Vec<(f64, f64)> {
    if total_duration <= 0.0 || budget <= 0.0 || window <= 0.0 {
        return Vec::new();
    }
    let wanted = ((budget.min(total_duration)) / window).ceil().max(1.0) as usize;

    match regions {
        Some(regions) if !regions.is_empty() => {
            let picked: Vec<&SpeechRegion> = if regions.len() <= wanted {
                regions.iter().collect()
            } else {
                (0..wanted)
                    .map(|i| &regions[i * regions.len() / wanted])
                    .collect()
            };

            let mut remaining = budget;
            let mut samples = Vec::new();
            for region in picked {
                if remaining <= 0.0 {
                    break;
                }
                let length = region.duration().min(window).min(remaining);
                if length <= 0.0 {
                    continue;
                }
                samples.push((region.start, region.start + length));
                remaining -= length;
            }
            samples
        }
        _ => {
            let spacing = total_duration / wanted as f64;
            (0..wanted)
                .map(|i| {
                    let start = i as f64 * spacing;
                    (start, (start + window).min(total_duration))
                })
                .filter(|(start, end)| end > start)
                .collect()
        }
    }
}

/// Background speaker profiling for one run.
pub struct SpeakerTask {
    pub profiler: Arc<dyn SpeakerProfiler>,
    pub audio: Arc<dyn ChunkAudio>,
    pub windows: Vec<(f64, f64)>,
    pub language: Option<String>,
    pub max_speakers: Option<u32>,
    pub usage: Arc<UsageReporter>,
    pub progress: Arc<dyn ProgressSink>,
    pub total_chunks: usize,
    pub cancel: CancellationToken,
}

impl SpeakerTask {
    pub async fn run(self) -> Result<Arc<Vec<SpeakerProfile>>> {
        self.emit(ProgressStatus::Processing, format!("{} samples", self.windows.len()));

        let mut samples = Vec::with_capacity(self.windows.len());
        for &(start, end) in &self.windows {
            if self.cancel.is_cancelled() {
                self.emit(ProgressStatus::Cancelled, "");
                return Err(TolkError::Cancelled(std::time::Duration::ZERO));
            }
            match self.audio.slice(start, end).await {
                Ok(audio) => samples.push(SpeakerSample { start, end, audio }),
                Err(e) => warn!("Skipping speaker sample at {:.1}s: {}", start, e),
            }
        }
        if samples.is_empty() {
            self.emit(ProgressStatus::Error, "no usable samples");
            return Err(TolkError::Audio("no usable speaker samples".to_string()));
        }

        let request = SpeakerRequest {
            samples,
            language: self.language.clone(),
            max_speakers: self.max_speakers,
        };
        let completion = match self.profiler.profile(request, &self.cancel).await {
            Ok(completion) => completion,
            Err(e) if e.is_cancelled() => {
                self.emit(ProgressStatus::Cancelled, "");
                return Err(e);
            }
            Err(e) => {
                self.emit(ProgressStatus::Error, e.to_string());
                return Err(e);
            }
        };
        self.usage.record_charges("speakers", &completion.charges);

        info!("Speaker profiles ready: {}", completion.output.len());
        self.emit(
            ProgressStatus::Completed,
            format!("{} speakers", completion.output.len()),
        );
        Ok(Arc::new(completion.output))
    }

    fn emit(&self, status: ProgressStatus, message: impl Into<String>) {
        self.progress.emit(ProgressEvent::new(
            0,
            self.total_chunks,
            ProgressStage::Speakers,
            status,
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PricingSettings;
    use crate::config::Settings;
    use crate::models::ChunkSpec;
    use crate::pipeline::context::ChunkContext;
    use crate::pipeline::dependency::DependencyFuture;
    use crate::pipeline::step::{run_step, StepStatus};
    use crate::pipeline::steps::WaitForDependenciesStep;
    use crate::pipeline::testing::{context_with, MockAudio, RecordingProgress, Scripted};
    use crate::progress::NoopProgress;

    fn failing_task(progress: Arc<dyn ProgressSink>) -> SpeakerTask {
        let profiler = Scripted::new("speakers", |_: &SpeakerRequest| {
            Err::<Vec<SpeakerProfile>, _>(TolkError::Provider("model overloaded".into()))
        });
        SpeakerTask {
            profiler: Arc::new(profiler),
            audio: Arc::new(MockAudio),
            windows: vec![(0.0, 30.0)],
            language: None,
            max_speakers: None,
            usage: Arc::new(UsageReporter::new(PricingSettings::default())),
            progress,
            total_chunks: 1,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_samples_from_regions_respect_budget() {
        let regions: Vec<SpeechRegion> = (0..20)
            .map(|i| SpeechRegion::new(i as f64 * 100.0, i as f64 * 100.0 + 50.0))
            .collect();
        let samples = plan_samples(Some(&regions), 2000.0, 90.0, 30.0);

        assert_eq!(samples.len(), 3);
        let total: f64 = samples.iter().map(|(s, e)| e - s).sum();
        assert!((total - 90.0).abs() < 1e-9);
        // Spread across the source, not bunched at the start.
        assert!(samples[2].0 >= 1000.0);
    }

    #[test]
    fn test_samples_without_regions_are_evenly_spaced() {
        let samples = plan_samples(None, 600.0, 60.0, 30.0);
        assert_eq!(samples, [(0.0, 30.0), (300.0, 330.0)]);

        let short = plan_samples(None, 10.0, 240.0, 30.0);
        assert_eq!(short, [(0.0, 10.0)]);
        assert!(plan_samples(None, 0.0, 240.0, 30.0).is_empty());
    }

    #[tokio::test]
    async fn test_run_profiles_samples() {
        let profiler = Scripted::new("speakers", |req: &SpeakerRequest| {
            Ok(vec![SpeakerProfile {
                id: "S1".to_string(),
                voice_characteristics: format!("{} samples", req.samples.len()),
                inferred_identity: None,
                sample_quotes: Vec::new(),
                confidence: 0.8,
            }])
        });
        let usage = Arc::new(UsageReporter::new(PricingSettings::default()));
        let task = SpeakerTask {
            profiler: Arc::new(profiler),
            audio: Arc::new(MockAudio),
            windows: vec![(0.0, 30.0), (60.0, 90.0)],
            language: None,
            max_speakers: Some(2),
            usage: usage.clone(),
            progress: Arc::new(NoopProgress),
            total_chunks: 1,
            cancel: CancellationToken::new(),
        };

        let profiles = task.run().await.unwrap();
        assert_eq!(profiles[0].voice_characteristics, "2 samples");
        assert_eq!(usage.report().total_calls, 1);
    }

    #[tokio::test]
    async fn test_profiler_failure_reports_error() {
        let progress = Arc::new(RecordingProgress::default());
        let outcome = failing_task(progress.clone()).run().await;

        assert!(outcome.is_err());
        let events = progress.events();
        let last = events.last().unwrap();
        assert_eq!(last.stage, ProgressStage::Speakers);
        assert_eq!(last.status, ProgressStatus::Error);
        assert!(last.message.contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_chunks_get_no_profiles_after_failure() {
        let mut settings = Settings::default();
        settings.speakers.enabled = true;
        let mut run = context_with(settings);
        let progress = RecordingProgress::attach(&mut run);
        run.speakers = DependencyFuture::spawn(
            "speakers",
            failing_task(progress.clone()).run(),
            Arc::new(Vec::new()),
        );
        let ctx = ChunkContext::new(&run, ChunkSpec::new(0, 0.0, 60.0));

        let result = run_step(&WaitForDependenciesStep, (), &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert!(result.output.speakers.is_empty());
        assert!(progress
            .events()
            .iter()
            .any(|e| e.stage == ProgressStage::Speakers && e.status == ProgressStatus::Error));
    }
}
