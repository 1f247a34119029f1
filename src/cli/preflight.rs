//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting a run that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{Result, TolkError};
use crate::models::PipelineStage;
use std::process::Command;

/// Run pre-flight checks for a generation run with these settings.
///
/// Only the stages that will run for real pull in their requirements.
pub fn check(settings: &Settings) -> Result<()> {
    let debug = &settings.debug;
    let reads_audio = PipelineStage::ALL
        .into_iter()
        .filter(|&stage| stage.needs_audio())
        .filter(|&stage| stage != PipelineStage::Refine || settings.refinement.enabled)
        .any(|stage| debug.runs_for_real(stage));
    if reads_audio {
        check_tool("ffmpeg")?;
        check_tool("ffprobe")?;
    }

    let calls_models = PipelineStage::ALL
        .into_iter()
        .any(|stage| debug.runs_for_real(stage));
    if calls_models {
        check_api_key()?;
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(TolkError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(TolkError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg("-version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(TolkError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TolkError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(TolkError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
