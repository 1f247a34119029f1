//! Configuration settings for Tolk.

use crate::models::{GlossaryTerm, PipelineStage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub transcription: TranscriptionSettings,
    pub refinement: RefinementSettings,
    pub alignment: AlignmentSettings,
    pub translation: TranslationSettings,
    pub glossary: GlossarySettings,
    pub speakers: SpeakerSettings,
    pub chunking: ChunkingSettings,
    pub concurrency: ConcurrencySettings,
    pub pipeline: PipelineSettings,
    pub debug: DebugSettings,
    pub prompts: PromptSettings,
    pub pricing: PricingSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for temporary files.
    pub temp_dir: String,
    /// Log level when no `-v` flag is given (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            temp_dir: "/tmp/tolk".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Transcription model (default: whisper-1).
    pub model: String,
    /// Source language hint (ISO 639-1). None = auto-detect.
    pub language: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
        }
    }
}

/// Transcript refinement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSettings {
    /// Run the refinement stage.
    pub enabled: bool,
    /// Model used to correct raw transcripts.
    pub model: String,
    /// Refined output must keep at least this fraction of the raw segment count.
    pub min_segment_ratio: f64,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4.1".to_string(),
            min_segment_ratio: 0.5,
        }
    }
}

/// Time alignment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentSettings {
    /// Run the alignment stage. When disabled the refined timing is kept.
    pub enabled: bool,
    /// Minimum cue duration in seconds.
    pub min_cue_seconds: f64,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_cue_seconds: 0.3,
        }
    }
}

/// Translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    /// Run the translation stage.
    pub enabled: bool,
    /// Model used for translation.
    pub model: String,
    /// Target language (name or ISO code).
    pub target_language: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4.1-mini".to_string(),
            target_language: "English".to_string(),
        }
    }
}

/// Glossary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossarySettings {
    /// Extract terms from sampled audio before refinement.
    pub extract: bool,
    /// Model used for term extraction.
    pub model: String,
    /// Minutes of audio sampled for extraction.
    pub sample_minutes: f64,
    /// User-defined terms. These win over extracted terms.
    pub terms: Vec<GlossaryTerm>,
}

impl Default for GlossarySettings {
    fn default() -> Self {
        Self {
            extract: true,
            model: "gpt-4.1-mini".to_string(),
            sample_minutes: 10.0,
            terms: Vec::new(),
        }
    }
}

/// Speaker profiling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerSettings {
    /// Run speaker pre-analysis and label segments with speaker ids.
    pub enabled: bool,
    /// Model used for profiling.
    pub model: String,
    /// Total seconds of speech sampled for profiling.
    pub sample_seconds: f64,
    /// Length of each sampled window when no speech regions are cached.
    pub window_seconds: f64,
    /// Expected number of speakers, if known.
    pub max_speakers: Option<u32>,
}

impl Default for SpeakerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4.1-mini".to_string(),
            sample_seconds: 240.0,
            window_seconds: 30.0,
            max_speakers: None,
        }
    }
}

/// How the source is cut into chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Fixed-duration windows.
    Fixed,
    /// Windows snapped to detected silence.
    #[default]
    Speech,
}

impl std::str::FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "temporal" => Ok(ChunkingStrategy::Fixed),
            "speech" | "vad" => Ok(ChunkingStrategy::Speech),
            _ => Err(format!("Unknown chunking strategy: {}", s)),
        }
    }
}

/// Chunk planning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Chunking strategy (fixed, speech).
    pub strategy: ChunkingStrategy,
    /// Target chunk duration in seconds.
    pub chunk_duration_seconds: f64,
    /// Sources longer than this skip full decoding when on-demand extraction is available.
    pub long_video_threshold_seconds: f64,
    /// How far a boundary may move to reach a silence, in seconds.
    pub silence_window_seconds: f64,
    /// Shortest gap between speech regions that counts as silence.
    pub min_silence_seconds: f64,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Speech,
            chunk_duration_seconds: 300.0,
            long_video_threshold_seconds: 3600.0,
            silence_window_seconds: 30.0,
            min_silence_seconds: 0.3,
        }
    }
}

/// Per-resource concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    /// Simultaneous transcription calls.
    pub transcription: usize,
    /// Simultaneous refinement/translation holds.
    pub refinement: usize,
    /// Simultaneous alignment passes.
    pub alignment: usize,
    /// Upper bound on in-flight chunks. None = twice the sum of the gates.
    pub worker_pool: Option<usize>,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            transcription: 2,
            refinement: 4,
            alignment: 2,
            worker_pool: None,
        }
    }
}

impl ConcurrencySettings {
    /// Effective worker pool size.
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool
            .unwrap_or(2 * (self.transcription + self.refinement + self.alignment))
            .max(1)
    }
}

/// Step execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Retries granted when a step's validator reports a retryable problem.
    pub max_step_retries: u32,
    /// Timeout for provider HTTP requests in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_step_retries: 1,
            request_timeout_seconds: 300,
        }
    }
}

/// Debug and resume settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DebugSettings {
    /// Resume point. Earlier stages are skipped.
    pub start_stage: Option<PipelineStage>,
    /// Stop each chunk once this stage completes.
    pub stop_after: Option<PipelineStage>,
    /// Stages whose output is loaded from fixtures instead of computed.
    pub mock_stages: Vec<PipelineStage>,
    /// Directory holding `<stage>/chunk_<index>.json` fixtures.
    pub mock_dir: Option<String>,
    /// Directory for per-run debug artifacts. None = disabled.
    pub artifacts_dir: Option<String>,
}

impl DebugSettings {
    /// Whether `stage` runs before the configured resume point.
    pub fn skips(&self, stage: PipelineStage) -> bool {
        self.start_stage.is_some_and(|start| stage < start)
    }

    /// Whether `stage` is replaced by fixture output.
    pub fn mocks(&self, stage: PipelineStage) -> bool {
        self.mock_stages.contains(&stage)
    }

    /// Whether `stage` will do real work in this run.
    pub fn runs_for_real(&self, stage: PipelineStage) -> bool {
        !self.skips(stage) && !self.mocks(stage) && !self.stops_before(stage)
    }

    /// Whether `stage` comes after the configured stop point.
    pub fn stops_before(&self, stage: PipelineStage) -> bool {
        self.stop_after.is_some_and(|stop| stage > stop)
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: HashMap<String, String>,
}

/// Price of one model, in USD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub audio_per_minute: f64,
}

/// Pricing table used for the usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    pub models: HashMap<String, ModelPrice>,
}

impl Default for PricingSettings {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "whisper-1".to_string(),
            ModelPrice {
                audio_per_minute: 0.006,
                ..Default::default()
            },
        );
        models.insert(
            "gpt-4.1".to_string(),
            ModelPrice {
                input_per_million: 2.0,
                output_per_million: 8.0,
                ..Default::default()
            },
        );
        models.insert(
            "gpt-4.1-mini".to_string(),
            ModelPrice {
                input_per_million: 0.4,
                output_per_million: 1.6,
                ..Default::default()
            },
        );
        Self { models }
    }
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TolkError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tolk")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded fixture directory, if configured.
    pub fn mock_dir(&self) -> Option<PathBuf> {
        self.debug.mock_dir.as_deref().map(Self::expand_path)
    }

    /// Get the expanded artifact directory, if configured.
    pub fn artifacts_dir(&self) -> Option<PathBuf> {
        self.debug.artifacts_dir.as_deref().map(Self::expand_path)
    }

    /// Check that the settings describe a runnable pipeline.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::TolkError;

        if !(self.chunking.chunk_duration_seconds.is_finite()
            && self.chunking.chunk_duration_seconds > 0.0)
        {
            return Err(TolkError::Validation(
                "chunking.chunk_duration_seconds must be positive".to_string(),
            ));
        }
        let gates = [
            ("concurrency.transcription", self.concurrency.transcription),
            ("concurrency.refinement", self.concurrency.refinement),
            ("concurrency.alignment", self.concurrency.alignment),
        ];
        for (name, value) in gates {
            if value == 0 {
                return Err(TolkError::Validation(format!("{} must be at least 1", name)));
            }
        }
        if self.translation.enabled && self.translation.target_language.trim().is_empty() {
            return Err(TolkError::Validation(
                "translation.target_language is required when translation is enabled".to_string(),
            ));
        }
        if let (Some(start), Some(stop)) = (self.debug.start_stage, self.debug.stop_after) {
            if stop < start {
                return Err(TolkError::Validation(format!(
                    "debug.stop_after ({}) comes before debug.start_stage ({})",
                    stop, start
                )));
            }
        }
        if !self.debug.mock_stages.is_empty() && self.debug.mock_dir.is_none() {
            return Err(TolkError::Validation(
                "debug.mock_stages requires debug.mock_dir".to_string(),
            ));
        }
        Ok(())
    }
}
