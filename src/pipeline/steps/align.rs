//! Timing alignment step.

use crate::error::Result;
use crate::models::{PipelineStage, SubtitleSegment};
use crate::pipeline::context::ChunkContext;
use crate::pipeline::gate::Resource;
use crate::pipeline::reconcile::reconcile;
use crate::pipeline::step::{GateUse, Step};
use crate::providers::AlignRequest;
use async_trait::async_trait;

/// Fixes cue timing of the refined segments.
pub struct AlignStep;

#[async_trait]
impl Step for AlignStep {
    type Input = Vec<SubtitleSegment>;
    type Output = Vec<SubtitleSegment>;

    fn stage(&self) -> PipelineStage {
        PipelineStage::Align
    }

    fn gate(&self) -> GateUse {
        GateUse::Acquire(Resource::Alignment)
    }

    fn passthrough(&self, input: &Vec<SubtitleSegment>, _ctx: &ChunkContext<'_>) -> Vec<SubtitleSegment> {
        input.clone()
    }

    fn pre_check(&self, input: &Vec<SubtitleSegment>, ctx: &ChunkContext<'_>) -> bool {
        ctx.settings().alignment.enabled && !input.is_empty()
    }

    async fn execute(
        &self,
        input: &Vec<SubtitleSegment>,
        ctx: &ChunkContext<'_>,
    ) -> Result<Vec<SubtitleSegment>> {
        let completion = ctx
            .run
            .clients
            .aligner
            .align(
                AlignRequest {
                    segments: input.clone(),
                    duration: ctx.chunk.duration(),
                    min_cue_seconds: ctx.settings().alignment.min_cue_seconds,
                },
                ctx.cancel(),
            )
            .await?;
        ctx.run.usage.record_charges("align", &completion.charges);

        Ok(completion.output)
    }

    async fn post_process(
        &self,
        input: &Vec<SubtitleSegment>,
        output: Vec<SubtitleSegment>,
        _ctx: &ChunkContext<'_>,
    ) -> Result<Vec<SubtitleSegment>> {
        Ok(reconcile(input, output))
    }

    fn fallback(&self, input: &Vec<SubtitleSegment>) -> Option<Vec<SubtitleSegment>> {
        Some(input.clone())
    }
}
