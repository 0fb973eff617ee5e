use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::judge::{winner_from_totals, JudgeClient, JudgeVerdict};
use super::{DEFAULT_CRITERIA, MAX_CRITERIA, MAX_CRITERION_CHARS};
use crate::error::{InsightError, InsightResult};
use crate::pipeline::Stage;
use crate::scope::OrgScope;
use crate::storage::{
    Analysis, Comparison, ComparisonFilter, ComparisonSummary, JudgeTrace, Page, PageRequest,
    StageResult, Storage, Winner,
};

/// Request to compare two analyses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRequest {
    pub analysis_a_id: String,
    pub analysis_b_id: String,
    #[serde(default)]
    pub judge_model: Option<String>,
    #[serde(default)]
    pub evaluation_criteria: Option<Vec<String>>,
}

impl ComparisonRequest {
    pub fn new(analysis_a_id: impl Into<String>, analysis_b_id: impl Into<String>) -> Self {
        Self {
            analysis_a_id: analysis_a_id.into(),
            analysis_b_id: analysis_b_id.into(),
            ..Default::default()
        }
    }

    pub fn with_judge_model(mut self, judge_model: impl Into<String>) -> Self {
        self.judge_model = Some(judge_model.into());
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evaluation_criteria = Some(criteria.into_iter().map(Into::into).collect());
        self
    }
}

/// Creates, reads and deletes judged comparisons.
pub struct ComparisonService {
    storage: Arc<dyn Storage>,
    judge: JudgeClient,
    default_judge_model: String,
}

impl ComparisonService {
    pub fn new(
        storage: Arc<dyn Storage>,
        judge: JudgeClient,
        default_judge_model: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            judge,
            default_judge_model: default_judge_model.into(),
        }
    }

    /// Judge both analyses stage by stage and persist the verdict.
    ///
    /// Nothing is written unless all three judge calls succeed.
    pub async fn create(
        &self,
        scope: &OrgScope,
        request: ComparisonRequest,
    ) -> InsightResult<Comparison> {
        let analysis_a_id = required_id("analysis_a_id", &request.analysis_a_id)?;
        let analysis_b_id = required_id("analysis_b_id", &request.analysis_b_id)?;
        if analysis_a_id == analysis_b_id {
            return Err(InsightError::validation(
                "analysis_b_id",
                "an analysis cannot be compared with itself",
            ));
        }
        let criteria = normalize_criteria(request.evaluation_criteria.as_deref())?;
        let judge_model = match request.judge_model.as_deref().map(str::trim) {
            Some("") => {
                return Err(InsightError::validation(
                    "judge_model",
                    "judge model cannot be empty",
                ));
            }
            Some(model) => model.to_string(),
            None => self.default_judge_model.clone(),
        };

        let org = scope.organization_id.as_str();
        let analysis_a = self.load_analysis(org, &analysis_a_id).await?;
        let analysis_b = self.load_analysis(org, &analysis_b_id).await?;

        if analysis_a.source_text.as_bytes() != analysis_b.source_text.as_bytes() {
            return Err(InsightError::PreconditionFailed {
                message: "analyses were produced from different source texts".to_string(),
            });
        }

        if let Some(existing) = self
            .storage
            .find_comparison_for_pair(org, &analysis_a_id, &analysis_b_id)
            .await?
        {
            return Err(InsightError::Conflict {
                message: format!(
                    "analyses {} and {} were already compared in comparison {}",
                    analysis_a_id, analysis_b_id, existing
                ),
            });
        }

        debug!(
            organization_id = %org,
            analysis_a_id = %analysis_a_id,
            analysis_b_id = %analysis_b_id,
            judge_model = %judge_model,
            criteria = ?criteria,
            "Judging stage outputs"
        );

        let start = Instant::now();
        let (fact_extraction, reasoning, summary) = tokio::try_join!(
            self.judge_stage(&judge_model, Stage::FactExtraction, &analysis_a, &analysis_b, &criteria),
            self.judge_stage(&judge_model, Stage::Reasoning, &analysis_a, &analysis_b, &criteria),
            self.judge_stage(&judge_model, Stage::Summary, &analysis_a, &analysis_b, &criteria),
        )?;
        let wall_clock_ms = start.elapsed().as_millis() as i64;

        let verdicts = [fact_extraction, reasoning, summary];
        let calls: Vec<_> = verdicts.iter().map(|v| v.trace.clone()).collect();
        let judge_trace = JudgeTrace::aggregate(&judge_model, &calls, wall_clock_ms);

        let stage_results: Vec<StageResult> = Stage::ALL
            .iter()
            .zip(verdicts)
            .map(|(stage, verdict)| StageResult {
                stage_name: stage.label().to_string(),
                winner: verdict.winner,
                scores: verdict.scores,
                reasoning: verdict.reasoning,
            })
            .collect();

        let total_a: f64 = stage_results.iter().map(|r| r.scores.total_a()).sum();
        let total_b: f64 = stage_results.iter().map(|r| r.scores.total_b()).sum();
        let overall_winner = winner_from_totals(total_a, total_b);

        let comparison = Comparison {
            id: Uuid::new_v4().to_string(),
            organization_id: scope.organization_id.clone(),
            created_by: scope.user_id.clone(),
            analysis_a_id,
            analysis_b_id,
            judge_model,
            overall_reasoning: synthesize_reasoning(overall_winner, total_a, total_b, &stage_results),
            evaluation_criteria: criteria,
            overall_winner,
            stage_results,
            judge_trace,
            model_a_summary: analysis_a.model_summary(),
            model_b_summary: analysis_b.model_summary(),
            cost_difference: analysis_b.total_cost - analysis_a.total_cost,
            quality_improvement: quality_improvement(total_a, total_b),
            created_at: Utc::now().trunc_subsecs(6),
        };

        self.storage.create_comparison(&comparison).await?;

        info!(
            comparison_id = %comparison.id,
            organization_id = %comparison.organization_id,
            overall_winner = %comparison.overall_winner,
            judge_tokens = comparison.judge_trace.total_tokens,
            judge_cost = comparison.judge_trace.cost,
            duration_ms = comparison.judge_trace.duration_ms,
            "Comparison persisted"
        );

        Ok(comparison)
    }

    /// Load a comparison owned by the caller's organization.
    pub async fn get(&self, scope: &OrgScope, id: &str) -> InsightResult<Comparison> {
        self.storage
            .get_comparison(&scope.organization_id, id)
            .await?
            .ok_or_else(|| InsightError::NotFound {
                entity: "Comparison",
                id: id.to_string(),
            })
    }

    /// List comparison summaries, newest first.
    pub async fn list(
        &self,
        scope: &OrgScope,
        filter: &ComparisonFilter,
        page: PageRequest,
    ) -> InsightResult<Page<ComparisonSummary>> {
        Ok(self
            .storage
            .list_comparisons(&scope.organization_id, filter, page)
            .await?)
    }

    /// Delete a comparison. A missing id, including one already deleted, is `NotFound`.
    pub async fn delete(&self, scope: &OrgScope, id: &str) -> InsightResult<()> {
        if self
            .storage
            .delete_comparison(&scope.organization_id, id)
            .await?
        {
            info!(comparison_id = %id, organization_id = %scope.organization_id, "Comparison deleted");
            Ok(())
        } else {
            Err(InsightError::NotFound {
                entity: "Comparison",
                id: id.to_string(),
            })
        }
    }

    async fn load_analysis(&self, organization_id: &str, id: &str) -> InsightResult<Analysis> {
        self.storage
            .get_analysis(organization_id, id)
            .await?
            .ok_or_else(|| InsightError::NotFound {
                entity: "Analysis",
                id: id.to_string(),
            })
    }

    async fn judge_stage(
        &self,
        judge_model: &str,
        stage: Stage,
        analysis_a: &Analysis,
        analysis_b: &Analysis,
        criteria: &[String],
    ) -> InsightResult<JudgeVerdict> {
        self.judge
            .score(
                judge_model,
                stage.label(),
                analysis_a.stage_output(stage),
                analysis_b.stage_output(stage),
                criteria,
            )
            .await
    }
}

fn required_id(field: &str, id: &str) -> InsightResult<String> {
    let id = id.trim();
    if id.is_empty() {
        return Err(InsightError::validation(field, "id cannot be empty"));
    }
    Ok(id.to_string())
}

/// Trim, lower-case and de-duplicate criteria, keeping first occurrence order.
///
/// `None` selects the built-in criteria.
pub fn normalize_criteria(criteria: Option<&[String]>) -> InsightResult<Vec<String>> {
    let Some(criteria) = criteria else {
        return Ok(DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect());
    };

    if criteria.is_empty() {
        return Err(InsightError::validation(
            "evaluation_criteria",
            "at least one criterion is required",
        ));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(criteria.len());
    for criterion in criteria {
        let name = criterion.trim().to_lowercase();
        if name.is_empty() || name.chars().count() > MAX_CRITERION_CHARS {
            return Err(InsightError::validation(
                "evaluation_criteria",
                format!(
                    "criterion names must be 1 to {} characters, got '{}'",
                    MAX_CRITERION_CHARS, criterion
                ),
            ));
        }
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }

    if normalized.len() > MAX_CRITERIA {
        return Err(InsightError::validation(
            "evaluation_criteria",
            format!("at most {} criteria are allowed", MAX_CRITERIA),
        ));
    }

    Ok(normalized)
}

/// Percentage change of B's score total over A's; `None` when A scored zero.
pub fn quality_improvement(total_a: f64, total_b: f64) -> Option<f64> {
    if total_a.abs() <= f64::EPSILON {
        None
    } else {
        Some((total_b - total_a) / total_a * 100.0)
    }
}

/// Overall reasoning derived from the stage verdicts.
fn synthesize_reasoning(
    overall: Winner,
    total_a: f64,
    total_b: f64,
    stage_results: &[StageResult],
) -> String {
    let count = |w: Winner| stage_results.iter().filter(|r| r.winner == w).count();
    let headline = match overall {
        Winner::A => "Output A wins overall",
        Winner::B => "Output B wins overall",
        Winner::Tie => "The outputs tie overall",
    };

    let stages: Vec<String> = stage_results
        .iter()
        .map(|r| format!("{}: {}", r.stage_name, r.winner))
        .collect();

    format!(
        "{} with total scores A {:.2} vs B {:.2}. Stage wins: A {}, B {}, tie {}. {}.",
        headline,
        total_a,
        total_b,
        count(Winner::A),
        count(Winner::B),
        count(Winner::Tie),
        stages.join("; ")
    )
}
