//! Usage accounting for model calls.
//!
//! Every provider call reports what it consumed; the reporter aggregates per
//! model for the end-of-run cost summary. Chunks record concurrently, so all
//! access goes through one mutex.

use crate::config::PricingSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Resources consumed by one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub audio_seconds: f64,
}

impl Usage {
    pub fn tokens(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            audio_seconds: 0.0,
        }
    }

    pub fn audio(seconds: f64) -> Self {
        Self {
            audio_seconds: seconds,
            ..Default::default()
        }
    }
}

/// Usage attributed to one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub model: String,
    pub usage: Usage,
}

impl Charge {
    pub fn new(model: impl Into<String>, usage: Usage) -> Self {
        Self {
            model: model.into(),
            usage,
        }
    }
}

/// One call as seen by a usage sink.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub model: String,
    pub operation: &'static str,
    pub usage: Usage,
}

/// External receiver of per-call usage.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: &UsageRecord);
}

/// Aggregated usage for one model.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub audio_seconds: f64,
    pub cost_usd: f64,
}

/// End-of-run usage summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageReport {
    pub models: Vec<ModelUsage>,
    pub total_calls: u64,
    pub total_cost_usd: f64,
}

impl UsageReport {
    /// Human-readable lines, one per model.
    pub fn lines(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|m| {
                let mut line = format!("{}: {} calls", m.model, m.calls);
                if m.prompt_tokens > 0 || m.completion_tokens > 0 {
                    line.push_str(&format!(
                        ", {} in / {} out tokens",
                        m.prompt_tokens, m.completion_tokens
                    ));
                }
                if m.audio_seconds > 0.0 {
                    line.push_str(&format!(", {:.1} min audio", m.audio_seconds / 60.0));
                }
                line.push_str(&format!(", ${:.4}", m.cost_usd));
                line
            })
            .collect()
    }
}

/// Concurrent usage accumulator owned by one run.
pub struct UsageReporter {
    totals: Mutex<BTreeMap<String, ModelUsage>>,
    pricing: PricingSettings,
    sink: Option<Arc<dyn UsageSink>>,
}

impl UsageReporter {
    pub fn new(pricing: PricingSettings) -> Self {
        Self {
            totals: Mutex::new(BTreeMap::new()),
            pricing,
            sink: None,
        }
    }

    /// Forward every record to an external sink as well.
    pub fn with_sink(mut self, sink: Option<Arc<dyn UsageSink>>) -> Self {
        self.sink = sink;
        self
    }

    /// Record one call.
    pub fn record(&self, model: &str, operation: &'static str, usage: Usage) {
        debug!(
            "{} via {}: {} in / {} out tokens, {:.1}s audio",
            operation, model, usage.prompt_tokens, usage.completion_tokens, usage.audio_seconds
        );

        {
            let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
            let entry = totals.entry(model.to_string()).or_insert_with(|| ModelUsage {
                model: model.to_string(),
                ..Default::default()
            });
            entry.calls += 1;
            entry.prompt_tokens += usage.prompt_tokens;
            entry.completion_tokens += usage.completion_tokens;
            entry.audio_seconds += usage.audio_seconds;
        }

        if let Some(sink) = &self.sink {
            sink.record(&UsageRecord {
                model: model.to_string(),
                operation,
                usage,
            });
        }
    }

    /// Record every charge of one provider call.
    pub fn record_charges(&self, operation: &'static str, charges: &[Charge]) {
        for charge in charges {
            self.record(&charge.model, operation, charge.usage);
        }
    }

    /// Build the aggregate report with estimated costs.
    pub fn report(&self) -> UsageReport {
        let totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        let models: Vec<ModelUsage> = totals
            .values()
            .map(|m| {
                let mut m = m.clone();
                m.cost_usd = self.cost_of(&m);
                m
            })
            .collect();

        UsageReport {
            total_calls: models.iter().map(|m| m.calls).sum(),
            total_cost_usd: models.iter().map(|m| m.cost_usd).sum(),
            models,
        }
    }

    fn cost_of(&self, usage: &ModelUsage) -> f64 {
        let Some(price) = self.pricing.models.get(&usage.model) else {
            return 0.0;
        };
        usage.prompt_tokens as f64 / 1_000_000.0 * price.input_per_million
            + usage.completion_tokens as f64 / 1_000_000.0 * price.output_per_million
            + usage.audio_seconds / 60.0 * price.audio_per_minute
    }
}

impl Default for UsageReporter {
    fn default() -> Self {
        Self::new(PricingSettings::default())
    }
}
