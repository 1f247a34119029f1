//! Waiting on the run-wide glossary and speaker profiles.

use crate::error::Result;
use crate::models::{GlossaryTerm, PipelineStage, SpeakerProfile};
use crate::pipeline::context::ChunkContext;
use crate::pipeline::step::Step;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Run-wide context a chunk refines and translates with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub glossary: Vec<GlossaryTerm>,
    #[serde(default)]
    pub speakers: Vec<SpeakerProfile>,
}

/// Waits for the glossary and, when enabled, the speaker profiles.
///
/// Only cancellation can stop it: failed extraction tasks already resolved to
/// their defaults.
pub struct WaitForDependenciesStep;

#[async_trait]
impl Step for WaitForDependenciesStep {
    type Input = ();
    type Output = Dependencies;

    fn stage(&self) -> PipelineStage {
        PipelineStage::WaitForDependencies
    }

    /// Whatever has resolved already, else the user-configured terms.
    fn passthrough(&self, _input: &(), ctx: &ChunkContext<'_>) -> Dependencies {
        let settings = ctx.settings();
        let glossary = match ctx.run.glossary.peek() {
            Some(snapshot) => snapshot.terms.clone(),
            None => settings.glossary.terms.clone(),
        };
        let speakers = if settings.speakers.enabled {
            ctx.run
                .speakers
                .peek()
                .map(|profiles| profiles.as_ref().clone())
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Dependencies { glossary, speakers }
    }

    async fn execute(&self, _input: &(), ctx: &ChunkContext<'_>) -> Result<Dependencies> {
        let glossary = ctx.run.glossary.get(ctx.cancel()).await?;
        let speakers = if ctx.settings().speakers.enabled {
            ctx.run.speakers.get(ctx.cancel()).await?.as_ref().clone()
        } else {
            Vec::new()
        };

        Ok(Dependencies {
            glossary: glossary.terms.clone(),
            speakers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::glossary::GlossarySnapshot;
    use crate::models::ChunkSpec;
    use crate::pipeline::dependency::DependencyFuture;
    use crate::pipeline::step::{run_step, StepStatus};
    use crate::pipeline::testing::context_with;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waits_for_glossary() {
        let mut run = context_with(Settings::default());
        run.glossary = DependencyFuture::spawn(
            "glossary",
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(GlossarySnapshot::from_user(vec![GlossaryTerm::new(
                    "Fjord", "fjord",
                )])))
            },
            Arc::new(GlossarySnapshot::default()),
        );
        let ctx = ChunkContext::new(&run, ChunkSpec::new(0, 0.0, 60.0));

        let result = run_step(&WaitForDependenciesStep, (), &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.output.glossary[0].term, "Fjord");
        assert!(result.output.speakers.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let mut run = context_with(Settings::default());
        run.glossary = DependencyFuture::spawn(
            "glossary",
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Arc::new(GlossarySnapshot::default()))
            },
            Arc::new(GlossarySnapshot::default()),
        );
        let cancel = run.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let ctx = ChunkContext::new(&run, ChunkSpec::new(0, 0.0, 60.0));

        let result = run_step(&WaitForDependenciesStep, (), &ctx).await.unwrap();
        assert_eq!(result.status, StepStatus::Cancelled);
    }
}
