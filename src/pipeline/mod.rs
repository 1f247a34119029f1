//! The chunked generation pipeline.
//!
//! A run plans chunks ([`preprocess`]), then every chunk goes through
//! Transcribe, WaitForDependencies, Refine, Align and Translate
//! ([`chunk`]). Each stage is a [`step::Step`] run by the generic
//! [`step::run_step`] driver under per-resource [`gate`]s.

pub mod chunk;
pub mod cleanup;
pub mod context;
pub mod dependency;
pub mod fixtures;
pub mod gate;
pub mod preprocess;
pub mod reconcile;
pub mod segmenter;
pub mod step;
pub mod steps;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk::{ChunkOutcome, ChunkProcessor, ChunkResult};
pub use context::{ChunkContext, PipelineContext};
pub use dependency::DependencyFuture;
pub use fixtures::{FileFixtures, FixtureSource, NoFixtures};
pub use gate::{GatePermit, Resource, ResourceGate, ResourceGates};
pub use preprocess::{AudioMode, ChunkPlan, Preprocessor};
pub use step::{run_step, GateUse, Step, StepResult, StepStatus, Validation};
