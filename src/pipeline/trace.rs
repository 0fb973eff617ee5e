//! Trace recording, cost estimation and aggregation.
//!
//! Totals are computed once, when a run completes, and frozen into the
//! record they describe.

use serde::{Deserialize, Serialize};

use super::Stage;
use crate::config::PricingConfig;
use crate::error::{InsightError, InsightResult};
use crate::langbase::TokenUsage;
use crate::storage::{JudgeTrace, StageTrace};

/// USD price per 1K tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Built-in rates, keyed by bare model name.
const BUILTIN_RATES: &[(&str, ModelRate)] = &[
    ("gpt-4o-mini", ModelRate { input_per_1k: 0.000_15, output_per_1k: 0.000_6 }),
    ("gpt-4o", ModelRate { input_per_1k: 0.002_5, output_per_1k: 0.01 }),
    ("gpt-4.1-mini", ModelRate { input_per_1k: 0.000_4, output_per_1k: 0.001_6 }),
    ("gpt-4.1", ModelRate { input_per_1k: 0.002, output_per_1k: 0.008 }),
    ("o3-mini", ModelRate { input_per_1k: 0.001_1, output_per_1k: 0.004_4 }),
    ("claude-sonnet-4.5", ModelRate { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-sonnet-4", ModelRate { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-5-sonnet", ModelRate { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-5-haiku", ModelRate { input_per_1k: 0.000_8, output_per_1k: 0.004 }),
    ("claude-opus-4", ModelRate { input_per_1k: 0.015, output_per_1k: 0.075 }),
];

/// Model pricing table with a fallback rate for unknown models.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    rates: Vec<(String, ModelRate)>,
    fallback: ModelRate,
}

impl ModelPricing {
    /// Built-in rates plus the configured fallback.
    pub fn new(config: &PricingConfig) -> Self {
        Self {
            rates: BUILTIN_RATES
                .iter()
                .map(|(name, rate)| (name.to_string(), *rate))
                .collect(),
            fallback: ModelRate {
                input_per_1k: config.fallback_input_per_1k,
                output_per_1k: config.fallback_output_per_1k,
            },
        }
    }

    /// Add or replace a rate.
    pub fn with_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        let model = normalize_model(&model.into());
        self.rates.retain(|(name, _)| *name != model);
        self.rates.push((model, rate));
        self
    }

    /// Rate for a model name such as `openai:gpt-4o-mini-2024-07-18`.
    ///
    /// Exact matches win; otherwise the longest known prefix is used.
    pub fn rate_for(&self, model: &str) -> ModelRate {
        let name = normalize_model(model);

        if let Some((_, rate)) = self.rates.iter().find(|(known, _)| *known == name) {
            return *rate;
        }

        self.rates
            .iter()
            .filter(|(known, _)| name.starts_with(known.as_str()))
            .max_by_key(|(known, _)| known.len())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.fallback)
    }

    /// Cost in USD of one call.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        let rate = self.rate_for(model);
        (usage.input_tokens.max(0) as f64 / 1000.0) * rate.input_per_1k
            + (usage.output_tokens.max(0) as f64 / 1000.0) * rate.output_per_1k
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::new(&PricingConfig::default())
    }
}

/// Strip a `provider:` prefix and lower-case.
fn normalize_model(model: &str) -> String {
    model
        .rsplit(':')
        .next()
        .unwrap_or(model)
        .trim()
        .to_lowercase()
}

/// Aggregated totals over a complete set of stage traces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceTotals {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
    pub duration_ms: i64,
}

/// Collects the traces of one pipeline run in stage order.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    traces: Vec<StageTrace>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the next stage's trace. Stages must arrive in pipeline order.
    pub fn record(&mut self, trace: StageTrace) -> InsightResult<()> {
        let expected = Stage::from_index(self.traces.len()).ok_or_else(|| {
            InsightError::Internal {
                message: format!("unexpected trace for {} after final stage", trace.stage),
            }
        })?;
        if trace.stage != expected {
            return Err(InsightError::Internal {
                message: format!("expected trace for {}, got {}", expected, trace.stage),
            });
        }
        self.traces.push(trace);
        Ok(())
    }

    /// Running totals over what has been recorded so far.
    pub fn totals(&self) -> TraceTotals {
        self.traces.iter().fold(TraceTotals::default(), |acc, t| TraceTotals {
            input_tokens: acc.input_tokens + t.input_tokens,
            output_tokens: acc.output_tokens + t.output_tokens,
            total_tokens: acc.total_tokens + t.total_tokens,
            cost: acc.cost + t.cost,
            duration_ms: acc.duration_ms + t.duration_ms,
        })
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Freeze the recorder. Fails unless every stage has a trace.
    pub fn finish(self) -> InsightResult<(Vec<StageTrace>, TraceTotals)> {
        if self.traces.len() != Stage::ALL.len() {
            return Err(InsightError::Internal {
                message: format!(
                    "pipeline produced {} stage traces, expected {}",
                    self.traces.len(),
                    Stage::ALL.len()
                ),
            });
        }
        let totals = self.totals();
        Ok((self.traces, totals))
    }
}

/// Accounting for a single judge call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeCallTrace {
    pub model: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub duration_ms: i64,
}

impl JudgeTrace {
    /// Combine the judge calls of one comparison.
    ///
    /// Tokens and cost are summed; `wall_clock_ms` is the elapsed time of the
    /// concurrent fan-out, not the sum of call durations.
    pub fn aggregate(model: impl Into<String>, calls: &[JudgeCallTrace], wall_clock_ms: i64) -> Self {
        Self {
            model: model.into(),
            total_tokens: calls.iter().map(|c| c.usage.total_tokens).sum(),
            cost: calls.iter().map(|c| c.cost).sum(),
            duration_ms: wall_clock_ms.max(0),
        }
    }
}
