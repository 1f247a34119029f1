//! Terminal progress bar fed by pipeline progress events.

use crate::progress::{ProgressEvent, ProgressSink, ProgressStage, ProgressStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress sink that drives one `indicatif` bar, one tick per finished chunk.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("preparing audio");
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A bar that never draws.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            chunk = event.chunk_id,
            stage = %event.stage,
            status = ?event.status,
            "{}",
            event.message
        );

        match (event.stage, event.status) {
            (ProgressStage::Preprocess, ProgressStatus::Completed) => {
                self.bar.set_length(event.total_chunks as u64);
                self.bar.set_message(event.message);
            }
            (ProgressStage::Chunk, _) => {
                self.bar.inc(1);
                if matches!(event.status, ProgressStatus::Error) {
                    self.bar.println(format!(
                        "{} chunk {}: {}",
                        style("!").red().bold(),
                        event.chunk_id,
                        event.message
                    ));
                }
            }
            (ProgressStage::Step(stage), ProgressStatus::Processing) => {
                self.bar
                    .set_message(format!("chunk {} {}", event.chunk_id, stage));
            }
            (ProgressStage::Step(stage), ProgressStatus::Degraded) => {
                self.bar.println(format!(
                    "{} chunk {} {} fell back: {}",
                    style("!").yellow().bold(),
                    event.chunk_id,
                    stage,
                    event.message
                ));
            }
            (ProgressStage::Glossary | ProgressStage::Speakers, ProgressStatus::Error) => {
                self.bar.println(format!(
                    "{} {}: {}",
                    style("!").yellow().bold(),
                    event.stage,
                    event.message
                ));
            }
            _ => {}
        }
    }
}
