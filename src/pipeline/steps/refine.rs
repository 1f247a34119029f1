//! Transcript refinement step and its output checks.

use super::dependencies::Dependencies;
use crate::audio::AudioClip;
use crate::error::Result;
use crate::models::{PipelineStage, SubtitleSegment};
use crate::pipeline::context::ChunkContext;
use crate::pipeline::gate::Resource;
use crate::pipeline::reconcile::reconcile;
use crate::pipeline::step::{GateUse, Step, Validation};
use crate::providers::RefineRequest;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RefineInput {
    pub segments: Vec<SubtitleSegment>,
    pub dependencies: Dependencies,
    /// Filled in by pre-processing when the refiner listens to audio.
    pub audio: Option<AudioClip>,
}

impl RefineInput {
    pub fn new(segments: Vec<SubtitleSegment>, dependencies: Dependencies) -> Self {
        Self {
            segments,
            dependencies,
            audio: None,
        }
    }
}

/// Corrects the raw transcript with glossary and speaker hints.
///
/// Runs under the refinement permit the chunk already holds.
pub struct RefineStep;

#[async_trait]
impl Step for RefineStep {
    type Input = RefineInput;
    type Output = Vec<SubtitleSegment>;

    fn stage(&self) -> PipelineStage {
        PipelineStage::Refine
    }

    fn gate(&self) -> GateUse {
        GateUse::HeldByCaller(Resource::Refinement)
    }

    fn passthrough(&self, input: &RefineInput, _ctx: &ChunkContext<'_>) -> Vec<SubtitleSegment> {
        input.segments.clone()
    }

    fn pre_check(&self, input: &RefineInput, ctx: &ChunkContext<'_>) -> bool {
        ctx.settings().refinement.enabled && !input.segments.is_empty()
    }

    async fn pre_process(&self, mut input: RefineInput, ctx: &ChunkContext<'_>) -> Result<RefineInput> {
        if ctx.run.clients.refiner.wants_audio() {
            let chunk = ctx.chunk;
            input.audio = Some(ctx.run.audio.slice(chunk.start_offset, chunk.end_offset).await?);
        }
        Ok(input)
    }

    async fn execute(&self, input: &RefineInput, ctx: &ChunkContext<'_>) -> Result<Vec<SubtitleSegment>> {
        let completion = ctx
            .run
            .clients
            .refiner
            .refine(
                RefineRequest {
                    audio: input.audio.clone(),
                    segments: input.segments.clone(),
                    glossary: input.dependencies.glossary.clone(),
                    speakers: input.dependencies.speakers.clone(),
                    language: ctx.settings().transcription.language.clone(),
                    duration: ctx.chunk.duration(),
                },
                ctx.cancel(),
            )
            .await?;
        ctx.run.usage.record_charges("refine", &completion.charges);

        Ok(completion.output)
    }

    fn validate(
        &self,
        input: &RefineInput,
        output: &Vec<SubtitleSegment>,
        ctx: &ChunkContext<'_>,
    ) -> Option<Validation> {
        let ratio = ctx.settings().refinement.min_segment_ratio.clamp(0.0, 1.0);
        let floor = (input.segments.len() as f64 * ratio).ceil() as usize;
        if output.len() < floor {
            return Some(Validation::Retryable(format!(
                "refined {} segments, expected at least {}",
                output.len(),
                floor
            )));
        }

        let expected = ctx
            .settings()
            .transcription
            .language
            .as_deref()
            .and_then(Script::for_language)
            .or_else(|| Script::dominant(input.segments.iter().map(|s| s.original_text.as_str())));
        let actual = Script::dominant(output.iter().map(|s| s.original_text.as_str()));

        match (expected, actual) {
            (Some(expected), Some(actual)) if !expected.compatible_with(actual) => {
                Some(Validation::Retryable(format!(
                    "refined text is written in {:?}, expected {:?}",
                    actual, expected
                )))
            }
            _ => Some(Validation::Valid),
        }
    }

    async fn post_process(
        &self,
        input: &RefineInput,
        output: Vec<SubtitleSegment>,
        _ctx: &ChunkContext<'_>,
    ) -> Result<Vec<SubtitleSegment>> {
        Ok(reconcile(&input.segments, output))
    }

    fn fallback(&self, input: &RefineInput) -> Option<Vec<SubtitleSegment>> {
        Some(input.segments.clone())
    }
}

/// Writing system of a piece of text, used to catch a model that answered
/// in the wrong language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Devanagari,
    Thai,
    Han,
    Kana,
    Hangul,
}

impl Script {
    /// Expected script for an ISO 639-1 code. Unknown codes give `None`.
    pub fn for_language(code: &str) -> Option<Script> {
        let code = code.trim().to_lowercase();
        let script = match code.split(['-', '_']).next().unwrap_or_default() {
            "ru" | "uk" | "bg" | "sr" | "mk" | "be" | "kk" => Script::Cyrillic,
            "el" => Script::Greek,
            "ar" | "fa" | "ur" => Script::Arabic,
            "he" | "yi" => Script::Hebrew,
            "hi" | "mr" | "ne" => Script::Devanagari,
            "th" => Script::Thai,
            "zh" => Script::Han,
            "ja" => Script::Kana,
            "ko" => Script::Hangul,
            "en" | "no" | "nb" | "nn" | "sv" | "da" | "de" | "fr" | "es" | "it" | "pt" | "nl"
            | "fi" | "is" | "pl" | "cs" | "sk" | "hu" | "ro" | "tr" | "vi" | "id" | "ms"
            | "hr" | "sl" | "et" | "lv" | "lt" | "ca" | "eu" | "gl" | "af" | "sw" => Script::Latin,
            _ => return None,
        };
        Some(script)
    }

    fn of(c: char) -> Option<Script> {
        let script = match c as u32 {
            0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F | 0x1E00..=0x1EFF => Script::Latin,
            0x0370..=0x03FF => Script::Greek,
            0x0400..=0x04FF => Script::Cyrillic,
            0x0590..=0x05FF => Script::Hebrew,
            0x0600..=0x06FF | 0x0750..=0x077F => Script::Arabic,
            0x0900..=0x097F => Script::Devanagari,
            0x0E00..=0x0E7F => Script::Thai,
            0x3040..=0x30FF => Script::Kana,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => Script::Han,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => Script::Hangul,
            _ => return None,
        };
        Some(script)
    }

    /// Most frequent script across `texts`, if any letter was seen.
    pub fn dominant<'a>(texts: impl IntoIterator<Item = &'a str>) -> Option<Script> {
        let mut counts: HashMap<Script, usize> = HashMap::new();
        for text in texts {
            for script in text.chars().filter_map(Script::of) {
                *counts.entry(script).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(script, _)| script)
    }

    /// Japanese mixes kana with Han characters.
    fn compatible_with(self, other: Script) -> bool {
        self == other
            || matches!(
                (self, other),
                (Script::Kana, Script::Han) | (Script::Han, Script::Kana)
            )
    }
}
