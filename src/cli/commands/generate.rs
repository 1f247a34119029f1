//! Generate command implementation.

use crate::audio::probe_duration;
use crate::cli::output::format_duration;
use crate::cli::preflight;
use crate::cli::{BarProgress, Output};
use crate::config::Settings;
use crate::models::PipelineStage;
use crate::orchestrator::{GenerationOutput, Orchestrator, RunHooks};
use crate::progress::ProgressSink;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Command-line overrides for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub output: Option<PathBuf>,
    pub target_language: Option<String>,
    pub start_stage: Option<PipelineStage>,
    pub stop_after: Option<PipelineStage>,
    pub mock_dir: Option<String>,
    pub quiet: bool,
}

impl GenerateOptions {
    /// Fold the flags into the loaded settings.
    fn apply(&self, settings: &mut Settings) {
        if let Some(language) = &self.target_language {
            settings.translation.enabled = true;
            settings.translation.target_language = language.clone();
        }
        if self.start_stage.is_some() {
            settings.debug.start_stage = self.start_stage;
        }
        if self.stop_after.is_some() {
            settings.debug.stop_after = self.stop_after;
        }
        if let Some(dir) = &self.mock_dir {
            settings.debug.mock_dir = Some(dir.clone());
        }
    }
}

/// Run the generate command.
pub async fn run_generate(input: &Path, options: GenerateOptions, mut settings: Settings) -> Result<()> {
    options.apply(&mut settings);

    if let Err(e) = preflight::check(&settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'tolk doctor' for detailed diagnostics.");
        return Err(e.into());
    }
    if !input.exists() {
        Output::error(&format!("File not found: {}", input.display()));
        return Err(anyhow::anyhow!("input file not found: {}", input.display()));
    }

    let duration = match probe_duration(input).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Could not probe duration, using decoded length: {}", e);
            0.0
        }
    };
    debug!("Source duration {:.1}s", duration);

    Output::info(&format!(
        "Generating subtitles for {}{}",
        input.display(),
        if duration > 0.0 {
            format!(" ({})", format_duration(duration))
        } else {
            String::new()
        }
    ));

    let orchestrator = Orchestrator::new(settings)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let progress = Arc::new(if options.quiet {
        BarProgress::hidden()
    } else {
        BarProgress::new()
    });
    let hooks = RunHooks {
        progress: Some(progress.clone() as Arc<dyn ProgressSink>),
        usage: None,
        cancel: Some(cancel),
    };

    let result = orchestrator.generate(input, duration, hooks).await;
    progress.finish();

    let output = match result {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => {
            Output::warning(&format!("{}", e));
            return Err(e.into());
        }
        Err(e) => {
            Output::error(&format!("Generation failed: {}", e));
            return Err(e.into());
        }
    };

    write_output(&output, options.output.as_deref())?;
    print_summary(&output);
    Ok(())
}

/// Write the run result as pretty JSON to `path`, or stdout.
fn write_output(output: &GenerationOutput, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("Failed to serialize output")?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Output::success(&format!("Wrote {}", path.display()));
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn print_summary(output: &GenerationOutput) {
    Output::header("Chunks");
    for chunk in &output.chunks {
        Output::chunk_line(chunk.index, chunk.start, chunk.end, chunk.outcome, chunk.segments);
        if let Some(error) = &chunk.error {
            Output::kv("error", error);
        }
    }

    if !output.glossary.is_empty() {
        Output::kv("glossary terms", &output.glossary.len().to_string());
    }
    if !output.speakers.is_empty() {
        Output::kv("speakers", &output.speakers.len().to_string());
    }

    Output::header("Usage");
    for line in output.usage.lines() {
        Output::list_item(&line);
    }
    Output::kv("estimated cost", &format!("${:.4}", output.usage.total_cost_usd));

    Output::success(&format!("{} segments generated", output.segments.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let mut settings = Settings::default();
        settings.translation.enabled = false;
        let options = GenerateOptions {
            target_language: Some("German".to_string()),
            start_stage: Some(PipelineStage::Refine),
            mock_dir: Some("/tmp/fixtures".to_string()),
            ..Default::default()
        };

        options.apply(&mut settings);
        assert!(settings.translation.enabled);
        assert_eq!(settings.translation.target_language, "German");
        assert_eq!(settings.debug.start_stage, Some(PipelineStage::Refine));
        assert_eq!(settings.debug.stop_after, None);
        assert_eq!(settings.debug.mock_dir.as_deref(), Some("/tmp/fixtures"));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut settings = Settings::default();
        settings.debug.stop_after = Some(PipelineStage::Align);

        GenerateOptions::default().apply(&mut settings);
        assert_eq!(settings.debug.stop_after, Some(PipelineStage::Align));
        assert_eq!(settings.translation.target_language, "English");
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("talk.json");
        let output = GenerationOutput {
            segments: Vec::new(),
            glossary_results: None,
            glossary: Vec::new(),
            speakers: Vec::new(),
            chunks: Vec::new(),
            usage: Default::default(),
        };

        write_output(&output, Some(&path)).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(written["segments"].as_array().unwrap().is_empty());
        assert!(written.get("glossary_results").is_none());
    }
}
