//! Speech-to-text step.

use crate::error::Result;
use crate::models::{PipelineStage, SubtitleSegment};
use crate::pipeline::cleanup::clean_transcript;
use crate::pipeline::context::ChunkContext;
use crate::pipeline::gate::Resource;
use crate::pipeline::reconcile::normalize;
use crate::pipeline::step::{GateUse, Step};
use crate::providers::TranscriptionRequest;
use async_trait::async_trait;

/// Speech-to-text for one chunk window.
pub struct TranscribeStep;

#[async_trait]
impl Step for TranscribeStep {
    type Input = ();
    type Output = Vec<SubtitleSegment>;

    fn stage(&self) -> PipelineStage {
        PipelineStage::Transcribe
    }

    fn gate(&self) -> GateUse {
        GateUse::Acquire(Resource::Transcription)
    }

    fn passthrough(&self, _input: &(), _ctx: &ChunkContext<'_>) -> Vec<SubtitleSegment> {
        Vec::new()
    }

    async fn execute(&self, _input: &(), ctx: &ChunkContext<'_>) -> Result<Vec<SubtitleSegment>> {
        let chunk = ctx.chunk;
        let audio = ctx.run.audio.slice(chunk.start_offset, chunk.end_offset).await?;

        let completion = ctx
            .run
            .clients
            .transcriber
            .transcribe(
                TranscriptionRequest {
                    audio,
                    language: ctx.settings().transcription.language.clone(),
                    duration: chunk.duration(),
                },
                ctx.cancel(),
            )
            .await?;
        ctx.run.usage.record_charges("transcribe", &completion.charges);

        Ok(completion.output)
    }

    async fn post_process(
        &self,
        _input: &(),
        output: Vec<SubtitleSegment>,
        _ctx: &ChunkContext<'_>,
    ) -> Result<Vec<SubtitleSegment>> {
        Ok(normalize(clean_transcript(output)))
    }
}
