//! Translation step.

use crate::error::Result;
use crate::models::{GlossaryTerm, PipelineStage, SubtitleSegment};
use crate::pipeline::cleanup::clean_translated;
use crate::pipeline::context::ChunkContext;
use crate::pipeline::gate::Resource;
use crate::pipeline::step::{GateUse, Step, Validation};
use crate::providers::TranslateRequest;
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TranslateInput {
    pub segments: Vec<SubtitleSegment>,
    pub glossary: Vec<GlossaryTerm>,
}

/// Translates the aligned segments, keyed by segment id.
///
/// Runs under the refinement permit the chunk already holds.
pub struct TranslateStep;

#[async_trait]
impl Step for TranslateStep {
    type Input = TranslateInput;
    type Output = Vec<SubtitleSegment>;

    fn stage(&self) -> PipelineStage {
        PipelineStage::Translate
    }

    fn gate(&self) -> GateUse {
        GateUse::HeldByCaller(Resource::Refinement)
    }

    fn passthrough(&self, input: &TranslateInput, _ctx: &ChunkContext<'_>) -> Vec<SubtitleSegment> {
        input.segments.clone()
    }

    fn pre_check(&self, input: &TranslateInput, ctx: &ChunkContext<'_>) -> bool {
        ctx.settings().translation.enabled && !input.segments.is_empty()
    }

    async fn execute(&self, input: &TranslateInput, ctx: &ChunkContext<'_>) -> Result<Vec<SubtitleSegment>> {
        let completion = ctx
            .run
            .clients
            .translator
            .translate(
                TranslateRequest {
                    segments: input.segments.clone(),
                    glossary: input.glossary.clone(),
                    target_language: ctx.settings().translation.target_language.clone(),
                },
                ctx.cancel(),
            )
            .await?;
        ctx.run.usage.record_charges("translate", &completion.charges);

        let mut lines: HashMap<String, String> = completion
            .output
            .into_iter()
            .map(|line| (line.id, line.translated_text))
            .collect();

        Ok(input
            .segments
            .iter()
            .cloned()
            .map(|mut segment| {
                segment.translated_text = lines.remove(&segment.id);
                segment
            })
            .collect())
    }

    fn validate(
        &self,
        _input: &TranslateInput,
        output: &Vec<SubtitleSegment>,
        _ctx: &ChunkContext<'_>,
    ) -> Option<Validation> {
        if output.iter().any(|s| s.translated_text.is_some()) {
            Some(Validation::Valid)
        } else {
            Some(Validation::Retryable(
                "no translation matched a segment id".to_string(),
            ))
        }
    }

    async fn post_process(
        &self,
        _input: &TranslateInput,
        output: Vec<SubtitleSegment>,
        _ctx: &ChunkContext<'_>,
    ) -> Result<Vec<SubtitleSegment>> {
        Ok(clean_translated(output))
    }

    fn fallback(&self, input: &TranslateInput) -> Option<Vec<SubtitleSegment>> {
        Some(input.segments.clone())
    }
}
