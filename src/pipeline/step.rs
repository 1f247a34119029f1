//! The step abstraction and its generic driver.
//!
//! A [`Step`] supplies the stage-specific hooks; [`run_step`] runs them in a
//! fixed order around gate acquisition, cancellation checks, progress events,
//! fixtures, retries and fallback. Every branch normalizes to a
//! [`StepResult`].

use super::context::ChunkContext;
use super::gate::Resource;
use crate::error::{Result, TolkError};
use crate::models::PipelineStage;
use crate::progress::{ProgressStage, ProgressStatus};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// How a step invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    /// Core logic failed; the output is the step's fallback.
    Failed,
    Skipped,
    Mocked,
    Cancelled,
}

impl StepStatus {
    fn progress(self) -> ProgressStatus {
        match self {
            StepStatus::Success => ProgressStatus::Completed,
            StepStatus::Failed => ProgressStatus::Degraded,
            StepStatus::Skipped => ProgressStatus::Skipped,
            StepStatus::Mocked => ProgressStatus::Mocked,
            StepStatus::Cancelled => ProgressStatus::Cancelled,
        }
    }
}

/// Normalized outcome of one step invocation.
#[derive(Debug, Clone)]
pub struct StepResult<T> {
    pub output: T,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl<T> StepResult<T> {
    fn finished(output: T, status: StepStatus, started: Instant, error: Option<String>) -> Self {
        Self {
            output,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StepStatus::Cancelled
    }

    /// Whether the output came from the step's real (or recorded) work.
    pub fn produced(&self) -> bool {
        matches!(self.status, StepStatus::Success | StepStatus::Mocked)
    }
}

/// Verdict of a step's post-check.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    /// Worth another attempt.
    Retryable(String),
    /// Fail without retrying.
    Invalid(String),
}

/// Which gate a step runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateUse {
    None,
    Acquire(Resource),
    /// The caller already holds the permit for this step.
    HeldByCaller(Resource),
}

/// One pipeline stage.
///
/// Only `stage`, `passthrough` and `execute` are required. Hooks default to
/// no-ops; a step without `validate` runs once; a step without `fallback`
/// propagates its errors to the chunk.
#[async_trait]
pub trait Step: Send + Sync {
    type Input: Clone + Send + Sync;
    type Output: Clone + Send + Sync + Serialize + DeserializeOwned;

    fn stage(&self) -> PipelineStage;

    fn gate(&self) -> GateUse {
        GateUse::None
    }

    /// Output when the step does no work (skipped or cancelled).
    fn passthrough(&self, input: &Self::Input, ctx: &ChunkContext<'_>) -> Self::Output;

    /// Returning false skips the step with the passthrough output.
    fn pre_check(&self, _input: &Self::Input, _ctx: &ChunkContext<'_>) -> bool {
        true
    }

    async fn pre_process(&self, input: Self::Input, _ctx: &ChunkContext<'_>) -> Result<Self::Input> {
        Ok(input)
    }

    async fn execute(&self, input: &Self::Input, ctx: &ChunkContext<'_>) -> Result<Self::Output>;

    /// Post-check of the core output. `None` means no validator.
    fn validate(
        &self,
        _input: &Self::Input,
        _output: &Self::Output,
        _ctx: &ChunkContext<'_>,
    ) -> Option<Validation> {
        None
    }

    async fn post_process(
        &self,
        _input: &Self::Input,
        output: Self::Output,
        _ctx: &ChunkContext<'_>,
    ) -> Result<Self::Output> {
        Ok(output)
    }

    /// Degraded output used when the core logic fails.
    fn fallback(&self, _input: &Self::Input) -> Option<Self::Output> {
        None
    }
}

/// Run one step for one chunk.
///
/// Returns `Err` only when the step failed and declares no fallback.
/// Cancellation is reported as `StepStatus::Cancelled`.
pub async fn run_step<S: Step>(
    step: &S,
    input: S::Input,
    ctx: &ChunkContext<'_>,
) -> Result<StepResult<S::Output>> {
    let stage = step.stage();
    let event_stage = ProgressStage::Step(stage);
    let started = Instant::now();

    if ctx.run.is_cancelled() {
        return Ok(cancelled(step, &input, ctx, started));
    }

    if ctx.settings().debug.skips(stage) {
        let output = match load_fixture::<S::Output>(stage, ctx).await {
            Ok(Some(output)) => output,
            Ok(None) => step.passthrough(&input, ctx),
            Err(e) => {
                warn!("Ignoring unreadable {} fixture for chunk {}: {}", stage, ctx.chunk.index, e);
                step.passthrough(&input, ctx)
            }
        };
        ctx.emit(event_stage, ProgressStatus::Skipped, "before resume point");
        return Ok(StepResult::finished(output, StepStatus::Skipped, started, None));
    }

    ctx.emit(event_stage, ProgressStatus::Waiting, "");

    let permit = match step.gate() {
        GateUse::Acquire(resource) => {
            match ctx.run.gates.get(resource).acquire(ctx.cancel()).await {
                Ok(permit) => Some(permit),
                Err(e) if e.is_cancelled() => return Ok(cancelled(step, &input, ctx, started)),
                Err(e) => return Err(e),
            }
        }
        GateUse::None | GateUse::HeldByCaller(_) => None,
    };

    if ctx.run.is_cancelled() {
        drop(permit);
        return Ok(cancelled(step, &input, ctx, started));
    }

    ctx.emit(event_stage, ProgressStatus::Processing, "");
    let outcome = drive(step, input.clone(), ctx).await;
    drop(permit);

    match outcome {
        Ok((output, status)) => {
            let message = format!("{:.1}s", started.elapsed().as_secs_f64());
            ctx.emit(event_stage, status.progress(), message);
            Ok(StepResult::finished(output, status, started, None))
        }
        Err(e) if e.is_cancelled() || ctx.run.is_cancelled() => {
            Ok(cancelled(step, &input, ctx, started))
        }
        Err(e) => match step.fallback(&input) {
            Some(fallback) => {
                warn!("Chunk {} {} failed, using fallback: {}", ctx.chunk.number(), stage, e);
                ctx.emit(event_stage, ProgressStatus::Degraded, e.to_string());
                Ok(StepResult::finished(
                    fallback,
                    StepStatus::Failed,
                    started,
                    Some(e.to_string()),
                ))
            }
            None => {
                ctx.emit(event_stage, ProgressStatus::Error, e.to_string());
                Err(e)
            }
        },
    }
}

/// The gated part of a step: pre-check, fixture override, pre-processing,
/// core with retries, post-processing and the artifact.
async fn drive<S: Step>(
    step: &S,
    input: S::Input,
    ctx: &ChunkContext<'_>,
) -> Result<(S::Output, StepStatus)> {
    let stage = step.stage();

    if !step.pre_check(&input, ctx) {
        debug!("Chunk {} {}: pre-check declined", ctx.chunk.number(), stage);
        return Ok((step.passthrough(&input, ctx), StepStatus::Skipped));
    }

    if ctx.settings().debug.mocks(stage) {
        let output = load_fixture::<S::Output>(stage, ctx).await?.ok_or_else(|| {
            TolkError::stage(stage, format!("no fixture for chunk {}", ctx.chunk.index))
        })?;
        emit_artifact(ctx, stage, &output);
        return Ok((output, StepStatus::Mocked));
    }

    let input = step.pre_process(input, ctx).await?;

    let max_retries = ctx.settings().pipeline.max_step_retries;
    let mut attempt = 0;
    let output = loop {
        let output = tokio::select! {
            biased;
            _ = ctx.cancel().cancelled() => return Err(ctx.run.cancelled()),
            result = step.execute(&input, ctx) => result?,
        };

        match step.validate(&input, &output, ctx) {
            None | Some(Validation::Valid) => break output,
            Some(Validation::Retryable(reason)) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    "Chunk {} {} output rejected ({}), retrying {}/{}",
                    ctx.chunk.number(),
                    stage,
                    reason,
                    attempt,
                    max_retries
                );
            }
            Some(Validation::Retryable(reason)) | Some(Validation::Invalid(reason)) => {
                return Err(TolkError::stage(stage, reason));
            }
        }
    };

    let output = step.post_process(&input, output, ctx).await?;
    emit_artifact(ctx, stage, &output);
    Ok((output, StepStatus::Success))
}

fn cancelled<S: Step>(
    step: &S,
    input: &S::Input,
    ctx: &ChunkContext<'_>,
    started: Instant,
) -> StepResult<S::Output> {
    ctx.emit(ProgressStage::Step(step.stage()), ProgressStatus::Cancelled, "");
    StepResult::finished(
        step.passthrough(input, ctx),
        StepStatus::Cancelled,
        started,
        Some(ctx.run.cancelled().to_string()),
    )
}

async fn load_fixture<T: DeserializeOwned>(
    stage: PipelineStage,
    ctx: &ChunkContext<'_>,
) -> Result<Option<T>> {
    match ctx.run.fixtures.load(stage, ctx.chunk.index).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Best-effort: a payload that fails to serialize is just not written.
fn emit_artifact<T: Serialize>(ctx: &ChunkContext<'_>, stage: PipelineStage, output: &T) {
    match serde_json::to_value(output) {
        Ok(payload) => ctx.run.artifacts.write(&ctx.artifact_key(stage.label()), payload),
        Err(e) => debug!("Skipping {} artifact: {}", stage, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::pipeline::testing::{context_with, RecordingProgress, StaticFixtures};
    use crate::models::ChunkSpec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Toy step: doubles numbers, with scripted failures.
    struct Doubler {
        stage: PipelineStage,
        fail: bool,
        with_fallback: bool,
        /// Number of leading attempts the validator rejects as retryable.
        reject_first: usize,
        executions: AtomicUsize,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                stage: PipelineStage::Refine,
                fail: false,
                with_fallback: true,
                reject_first: 0,
                executions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Step for Doubler {
        type Input = Vec<i32>;
        type Output = Vec<i32>;

        fn stage(&self) -> PipelineStage {
            self.stage
        }

        fn gate(&self) -> GateUse {
            GateUse::Acquire(Resource::Refinement)
        }

        fn passthrough(&self, input: &Vec<i32>, _ctx: &ChunkContext<'_>) -> Vec<i32> {
            input.clone()
        }

        async fn execute(&self, input: &Vec<i32>, _ctx: &ChunkContext<'_>) -> Result<Vec<i32>> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TolkError::Provider("boom".into()));
            }
            Ok(input.iter().map(|n| n * 2).collect())
        }

        fn validate(
            &self,
            _input: &Vec<i32>,
            _output: &Vec<i32>,
            _ctx: &ChunkContext<'_>,
        ) -> Option<Validation> {
            if self.executions.load(Ordering::SeqCst) <= self.reject_first {
                Some(Validation::Retryable("too short".into()))
            } else {
                Some(Validation::Valid)
            }
        }

        fn fallback(&self, input: &Vec<i32>) -> Option<Vec<i32>> {
            self.with_fallback.then(|| input.clone())
        }
    }

    fn chunk() -> ChunkSpec {
        ChunkSpec::new(0, 0.0, 60.0)
    }

    #[tokio::test]
    async fn test_success_path() {
        let run = context_with(Settings::default());
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler::new();

        let result = run_step(&step, vec![1, 2], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.output, vec![2, 4]);
        assert!(result.error.is_none());
        assert_eq!(run.gates.refinement.available(), run.gates.refinement.capacity());
    }

    #[tokio::test]
    async fn test_failure_with_fallback_never_throws() {
        let run = context_with(Settings::default());
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler {
            fail: true,
            ..Doubler::new()
        };

        let result = run_step(&step, vec![5], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.output, vec![5]);
        assert!(result.error.unwrap().contains("boom"));
        assert_eq!(run.gates.refinement.available(), run.gates.refinement.capacity());
    }

    #[tokio::test]
    async fn test_failure_without_fallback_propagates() {
        let run = context_with(Settings::default());
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler {
            fail: true,
            with_fallback: false,
            ..Doubler::new()
        };

        assert!(run_step(&step, vec![5], &ctx).await.is_err());
        assert_eq!(run.gates.refinement.available(), run.gates.refinement.capacity());
    }

    #[tokio::test]
    async fn test_retryable_validation_retries_once() {
        let run = context_with(Settings::default());
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler {
            reject_first: 1,
            ..Doubler::new()
        };

        let result = run_step(&step, vec![3], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(step.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_uses_fallback() {
        let run = context_with(Settings::default());
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler {
            reject_first: 5,
            ..Doubler::new()
        };

        let result = run_step(&step, vec![3], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.output, vec![3]);
        assert_eq!(step.executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let run = context_with(Settings::default());
        run.cancel.cancel();
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler::new();

        let result = run_step(&step, vec![1], &ctx).await.unwrap();
        assert!(result.is_cancelled());
        assert_eq!(step.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skipped_before_resume_point() {
        let mut settings = Settings::default();
        settings.debug.start_stage = Some(PipelineStage::Translate);
        let mut run = context_with(settings);
        let progress = RecordingProgress::attach(&mut run);
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler::new();

        let result = run_step(&step, vec![7], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.output, vec![7]);
        assert_eq!(step.executions.load(Ordering::SeqCst), 0);
        assert_eq!(progress.statuses(), [ProgressStatus::Skipped]);
    }

    #[tokio::test]
    async fn test_skipped_step_prefers_fixture() {
        let mut settings = Settings::default();
        settings.debug.start_stage = Some(PipelineStage::Translate);
        let mut run = context_with(settings);
        run.fixtures = Arc::new(StaticFixtures::new().with(PipelineStage::Refine, 0, json!([9])));
        let ctx = ChunkContext::new(&run, chunk());

        let result = run_step(&Doubler::new(), vec![7], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.output, vec![9]);
    }

    #[tokio::test]
    async fn test_mocked_stage_loads_fixture() {
        let mut settings = Settings::default();
        settings.debug.mock_stages = vec![PipelineStage::Refine];
        let mut run = context_with(settings);
        run.fixtures = Arc::new(StaticFixtures::new().with(PipelineStage::Refine, 0, json!([42])));
        let ctx = ChunkContext::new(&run, chunk());
        let step = Doubler::new();

        let result = run_step(&step, vec![1], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Mocked);
        assert_eq!(result.output, vec![42]);
        assert_eq!(step.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_mock_fixture_falls_back() {
        let mut settings = Settings::default();
        settings.debug.mock_stages = vec![PipelineStage::Refine];
        let run = context_with(settings);
        let ctx = ChunkContext::new(&run, chunk());

        let result = run_step(&Doubler::new(), vec![1], &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("no fixture"));
    }

    #[tokio::test]
    async fn test_progress_order() {
        let mut run = context_with(Settings::default());
        let progress = RecordingProgress::attach(&mut run);
        let ctx = ChunkContext::new(&run, chunk());

        run_step(&Doubler::new(), vec![1], &ctx).await.unwrap();
        assert_eq!(
            progress.statuses(),
            [
                ProgressStatus::Waiting,
                ProgressStatus::Processing,
                ProgressStatus::Completed
            ]
        );
    }
}
