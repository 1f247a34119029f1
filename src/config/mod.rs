//! Configuration module for Tolk.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{GlossaryPrompts, Prompts, RefinePrompts, SpeakerPrompts, TranslatePrompts};
pub use settings::{
    AlignmentSettings, ChunkingSettings, ChunkingStrategy, ConcurrencySettings, DebugSettings,
    GeneralSettings, GlossarySettings, ModelPrice, PipelineSettings, PricingSettings,
    PromptSettings, RefinementSettings, Settings, SpeakerSettings, TranscriptionSettings,
    TranslationSettings,
};
