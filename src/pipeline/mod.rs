//! Three-stage Dynamic Temperature Adjustment pipeline.
//!
//! This module provides:
//! - [`StageExecutor`]: one LLM call with per-stage parameters and its trace
//! - [`TraceRecorder`]: per-stage trace collection and pipeline totals
//! - [`PipelineOrchestrator`]: fact extraction → reasoning → summary, persisted
//!   as one immutable [`Analysis`](crate::storage::Analysis)
//!
//! Stages are strictly sequential: each stage reads the source text and the
//! outputs of every earlier stage.

mod executor;
mod orchestrator;
mod trace;

pub use executor::*;
pub use orchestrator::*;
pub use trace::*;

use serde::{Deserialize, Serialize};

use crate::error::{InsightError, InsightResult};
use crate::prompts::{FACT_EXTRACTION_PROMPT, REASONING_PROMPT, SUMMARY_PROMPT};

/// Upper bound accepted for a stage's `max_tokens`.
pub const MAX_STAGE_TOKENS: u32 = 32_000;

/// One step of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "Stage 1: Fact Extraction")]
    FactExtraction,
    #[serde(rename = "Stage 2: Reasoning & Insights")]
    Reasoning,
    #[serde(rename = "Stage 3: Summary")]
    Summary,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::FactExtraction, Stage::Reasoning, Stage::Summary];

    /// Display label, also used as the persisted stage name.
    pub fn label(self) -> &'static str {
        match self {
            Stage::FactExtraction => "Stage 1: Fact Extraction",
            Stage::Reasoning => "Stage 2: Reasoning & Insights",
            Stage::Summary => "Stage 3: Summary",
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Stage::FactExtraction => 0,
            Stage::Reasoning => 1,
            Stage::Summary => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Deterministic extraction, creative reasoning, balanced synthesis.
    pub fn default_temperature(self) -> f64 {
        match self {
            Stage::FactExtraction => 0.25,
            Stage::Reasoning => 0.65,
            Stage::Summary => 0.45,
        }
    }

    pub fn default_top_p(self) -> f64 {
        0.95
    }

    pub fn default_max_tokens(self) -> u32 {
        match self {
            Stage::FactExtraction => 1000,
            Stage::Reasoning => 1500,
            Stage::Summary => 800,
        }
    }

    /// Built-in system prompt used when the caller does not supply one.
    pub fn default_system_prompt(self) -> &'static str {
        match self {
            Stage::FactExtraction => FACT_EXTRACTION_PROMPT,
            Stage::Reasoning => REASONING_PROMPT,
            Stage::Summary => SUMMARY_PROMPT,
        }
    }

    /// Build this stage's user input from the source text and earlier outputs.
    ///
    /// `previous` holds the outputs of the stages before this one, in order.
    pub fn compose_input(self, source_text: &str, previous: &[String]) -> String {
        match self {
            Stage::FactExtraction => source_text.to_string(),
            Stage::Reasoning => format!(
                "Source text:\n{}\n\nExtracted facts:\n{}",
                source_text,
                previous.first().map(String::as_str).unwrap_or_default()
            ),
            Stage::Summary => format!(
                "Source text:\n{}\n\nExtracted facts:\n{}\n\nInsights:\n{}",
                source_text,
                previous.first().map(String::as_str).unwrap_or_default(),
                previous.get(1).map(String::as_str).unwrap_or_default()
            ),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Caller overrides for one stage. Unset fields fall back to the stage defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Fully resolved, validated parameters for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// Caller-supplied system prompt; `None` selects the built-in one.
    pub system_prompt: Option<String>,
}

impl StageParams {
    /// Merge over the stage defaults and validate.
    pub fn resolve(&self, stage: Stage, default_model: &str) -> InsightResult<StageSettings> {
        let field = |name: &str| format!("stages.{}.{}", stage_key(stage), name);

        let model = self
            .model
            .as_deref()
            .unwrap_or(default_model)
            .trim()
            .to_string();
        if model.is_empty() {
            return Err(InsightError::validation(field("model"), "model cannot be empty"));
        }

        let temperature = self.temperature.unwrap_or(stage.default_temperature());
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(InsightError::validation(
                field("temperature"),
                format!("must be between 0.0 and 2.0, got {}", temperature),
            ));
        }

        let top_p = self.top_p.unwrap_or(stage.default_top_p());
        if !top_p.is_finite() || top_p <= 0.0 || top_p > 1.0 {
            return Err(InsightError::validation(
                field("top_p"),
                format!("must be in (0.0, 1.0], got {}", top_p),
            ));
        }

        let max_tokens = self.max_tokens.unwrap_or(stage.default_max_tokens());
        if max_tokens == 0 || max_tokens > MAX_STAGE_TOKENS {
            return Err(InsightError::validation(
                field("max_tokens"),
                format!("must be between 1 and {}, got {}", MAX_STAGE_TOKENS, max_tokens),
            ));
        }

        let system_prompt = self
            .system_prompt
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .cloned();

        Ok(StageSettings {
            model,
            temperature,
            top_p,
            max_tokens,
            system_prompt,
        })
    }
}

fn stage_key(stage: Stage) -> &'static str {
    match stage {
        Stage::FactExtraction => "fact_extraction",
        Stage::Reasoning => "reasoning",
        Stage::Summary => "summary",
    }
}

/// Progress of one pipeline run.
///
/// `Init → Stage1 → Stage2 → Stage3 → Aggregate → Persisted`; any failure
/// moves to `Failed`, and nothing is written in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Stage1,
    Stage2,
    Stage3,
    Aggregate,
    Persisted,
    Failed,
}

impl PipelineState {
    /// Successor on the success path. Terminal states stay put.
    pub fn next(self) -> Self {
        match self {
            PipelineState::Init => PipelineState::Stage1,
            PipelineState::Stage1 => PipelineState::Stage2,
            PipelineState::Stage2 => PipelineState::Stage3,
            PipelineState::Stage3 => PipelineState::Aggregate,
            PipelineState::Aggregate => PipelineState::Persisted,
            PipelineState::Persisted => PipelineState::Persisted,
            PipelineState::Failed => PipelineState::Failed,
        }
    }

    /// Stage executed in this state, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            PipelineState::Stage1 => Some(Stage::FactExtraction),
            PipelineState::Stage2 => Some(Stage::Reasoning),
            PipelineState::Stage3 => Some(Stage::Summary),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Persisted | PipelineState::Failed)
    }
}

/// Applies PII redaction to stage input.
///
/// The pipeline only consumes the on/off flag; the redaction policy lives
/// behind this trait.
pub trait Redactor: Send + Sync {
    fn redact(&self, text: &str) -> String;
}

/// Redactor that returns the text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRedactor;

impl Redactor for PassthroughRedactor {
    fn redact(&self, text: &str) -> String {
        text.to_string()
    }
}
