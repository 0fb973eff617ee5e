//! Storage layer for analyses and comparisons.
//!
//! This module provides the persisted entity types and a SQLite-based,
//! organization-scoped implementation of [`Storage`]. Records are
//! insert-only: analyses are never updated and comparisons are only
//! inserted or deleted.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::langbase::TokenUsage;
use crate::pipeline::Stage;

// ============================================================================
// Analysis
// ============================================================================

/// Execution trace of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    /// Unique trace identifier.
    pub trace_id: String,
    /// Stage this trace belongs to; serialized as its label.
    pub stage: Stage,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
    /// Cost in USD.
    pub cost: f64,
    /// Caller-supplied system prompt; `None` means the built-in stage prompt was used.
    pub system_prompt: Option<String>,
}

/// A completed three-stage analysis of one source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub organization_id: String,
    pub created_by: String,
    pub title: String,
    /// Source text exactly as submitted.
    pub source_text: String,
    /// Whether the stage input went through PII redaction.
    pub pii_redacted: bool,
    /// Stage 1 output.
    pub facts: String,
    /// Stage 2 output.
    pub insights: String,
    /// Stage 3 output.
    pub summary: String,
    /// Exactly three traces, in stage order.
    pub stage_traces: Vec<StageTrace>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub total_duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl StageTrace {
    /// Create a trace with a fresh id.
    pub fn new(stage: Stage, model: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            stage,
            model: model.into(),
            temperature: stage.default_temperature(),
            top_p: stage.default_top_p(),
            max_tokens: stage.default_max_tokens(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            duration_ms: 0,
            cost: 0.0,
            system_prompt: None,
        }
    }

    /// Set sampling parameters.
    pub fn with_sampling(mut self, temperature: f64, top_p: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self.max_tokens = max_tokens;
        self
    }

    /// Set token counts from provider usage.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.input_tokens = usage.input_tokens;
        self.output_tokens = usage.output_tokens;
        self.total_tokens = usage.total_tokens;
        self
    }

    /// Set wall-clock duration.
    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms.max(0);
        self
    }

    /// Set cost in USD.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost.max(0.0);
        self
    }

    /// Record a caller-supplied system prompt.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }
}

impl Analysis {
    /// Output text of the given stage.
    pub fn stage_output(&self, stage: Stage) -> &str {
        match stage {
            Stage::FactExtraction => &self.facts,
            Stage::Reasoning => &self.insights,
            Stage::Summary => &self.summary,
        }
    }

    /// Trace of the given stage, if present.
    pub fn trace(&self, stage: Stage) -> Option<&StageTrace> {
        self.stage_traces.iter().find(|t| t.stage == stage)
    }

    /// Human-readable model summary: the model when all stages share one,
    /// otherwise the per-stage models joined with " / ".
    pub fn model_summary(&self) -> String {
        let models: Vec<&str> = self.stage_traces.iter().map(|t| t.model.as_str()).collect();
        summarize_models(&models)
    }
}

/// Collapse stage models in stage order into a display summary.
pub(crate) fn summarize_models(models: &[&str]) -> String {
    match models.first() {
        Some(first) if models.iter().all(|m| m == first) => first.to_string(),
        _ => models.join(" / "),
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Verdict side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "tie")]
    Tie,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Winner::A => write!(f, "A"),
            Winner::B => write!(f, "B"),
            Winner::Tie => write!(f, "tie"),
        }
    }
}

impl std::str::FromStr for Winner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "a" => Ok(Winner::A),
            "b" => Ok(Winner::B),
            "tie" | "draw" | "equal" => Ok(Winner::Tie),
            _ => Err(format!("Unknown winner: {}", s)),
        }
    }
}

/// Per-side criterion scores. Every requested criterion is present on both
/// sides; `None` is an explicit "could not be assessed".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideScores {
    #[serde(rename = "A")]
    pub a: BTreeMap<String, Option<f64>>,
    #[serde(rename = "B")]
    pub b: BTreeMap<String, Option<f64>>,
}

impl SideScores {
    /// Sum of side A's scores, nulls counting as zero.
    pub fn total_a(&self) -> f64 {
        self.a.values().flatten().sum()
    }

    /// Sum of side B's scores, nulls counting as zero.
    pub fn total_b(&self) -> f64 {
        self.b.values().flatten().sum()
    }
}

/// Judged outcome for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage label, e.g. "Stage 1: Fact Extraction".
    pub stage_name: String,
    pub winner: Winner,
    pub scores: SideScores,
    pub reasoning: String,
}

/// Combined accounting of the judge calls made for one comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeTrace {
    pub model: String,
    pub total_tokens: i64,
    pub cost: f64,
    pub duration_ms: i64,
}

/// A judged, immutable comparison between two analyses of the same source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub id: String,
    pub organization_id: String,
    pub created_by: String,
    pub analysis_a_id: String,
    pub analysis_b_id: String,
    pub judge_model: String,
    pub evaluation_criteria: Vec<String>,
    pub overall_winner: Winner,
    pub overall_reasoning: String,
    /// Exactly three entries, in stage order.
    pub stage_results: Vec<StageResult>,
    pub judge_trace: JudgeTrace,
    pub model_a_summary: String,
    pub model_b_summary: String,
    /// `total_cost(B) - total_cost(A)` in USD.
    pub cost_difference: f64,
    /// Percentage change of B's total score over A's; `None` when A scored zero.
    pub quality_improvement: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Comparison {
    /// Order-independent key of the compared pair.
    pub fn pair_key(&self) -> (String, String) {
        pair_key(&self.analysis_a_id, &self.analysis_b_id)
    }

    /// Listing view of this comparison.
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            id: self.id.clone(),
            analysis_a_id: self.analysis_a_id.clone(),
            analysis_b_id: self.analysis_b_id.clone(),
            model_a_summary: self.model_a_summary.clone(),
            model_b_summary: self.model_b_summary.clone(),
            judge_model: self.judge_model.clone(),
            overall_winner: self.overall_winner,
            cost_difference: self.cost_difference,
            quality_improvement: self.quality_improvement,
            created_at: self.created_at,
        }
    }
}

/// Sort two analysis ids so that (a, b) and (b, a) yield the same key.
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Listing row for comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub id: String,
    pub analysis_a_id: String,
    pub analysis_b_id: String,
    pub model_a_summary: String,
    pub model_b_summary: String,
    pub judge_model: String,
    pub overall_winner: Winner,
    pub cost_difference: f64,
    pub quality_improvement: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Listing row for analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: String,
    pub title: String,
    pub model_summary: String,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Queries
// ============================================================================

/// Optional filters for listing comparisons.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComparisonFilter {
    pub judge_model: Option<String>,
    pub overall_winner: Option<Winner>,
    /// Matches comparisons where either side is this analysis.
    pub analysis_id: Option<String>,
}

/// Offset pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub skip: u32,
    pub limit: u32,
}

/// One page of results plus the unpaginated count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: i64,
}

impl PageRequest {
    /// Default page size when the caller does not give one.
    pub const DEFAULT_LIMIT: u32 = 20;
    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 100;

    /// 1-based page number containing `skip`.
    pub fn page(&self) -> u32 {
        self.skip / self.limit.max(1) + 1
    }

    /// Number of pages needed for `total_count` items.
    pub fn total_pages(&self, total_count: i64) -> i64 {
        let limit = i64::from(self.limit.max(1));
        (total_count.max(0) + limit - 1) / limit
    }
}

// ============================================================================
// Storage trait
// ============================================================================

/// Organization-scoped persistence for analyses and comparisons.
///
/// Every read is filtered by `organization_id`; a record owned by another
/// organization is indistinguishable from a missing one.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert an analysis and its stage traces atomically.
    async fn create_analysis(&self, analysis: &Analysis) -> StorageResult<()>;

    /// Load an analysis with its traces.
    async fn get_analysis(&self, organization_id: &str, id: &str)
        -> StorageResult<Option<Analysis>>;

    /// List analyses, newest first.
    async fn list_analyses(
        &self,
        organization_id: &str,
        page: PageRequest,
    ) -> StorageResult<Page<AnalysisSummary>>;

    /// Id of an existing comparison of this unordered pair, if any.
    async fn find_comparison_for_pair(
        &self,
        organization_id: &str,
        analysis_a_id: &str,
        analysis_b_id: &str,
    ) -> StorageResult<Option<String>>;

    /// Insert a comparison. Fails with `StorageError::Duplicate` when the
    /// unordered pair already exists in the organization.
    async fn create_comparison(&self, comparison: &Comparison) -> StorageResult<()>;

    /// Load a comparison.
    async fn get_comparison(
        &self,
        organization_id: &str,
        id: &str,
    ) -> StorageResult<Option<Comparison>>;

    /// List comparison summaries, newest first.
    async fn list_comparisons(
        &self,
        organization_id: &str,
        filter: &ComparisonFilter,
        page: PageRequest,
    ) -> StorageResult<Page<ComparisonSummary>>;

    /// Delete a comparison. Returns `false` when nothing was deleted.
    async fn delete_comparison(&self, organization_id: &str, id: &str) -> StorageResult<bool>;
}
