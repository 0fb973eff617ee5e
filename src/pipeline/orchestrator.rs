use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{StageExecutor, StageRequest};
use super::trace::TraceRecorder;
use super::{PassthroughRedactor, PipelineState, Redactor, Stage, StageParams, StageSettings};
use crate::error::{InsightError, InsightResult};
use crate::scope::OrgScope;
use crate::storage::{Analysis, AnalysisSummary, Page, PageRequest, Storage};

/// Longest accepted source text, in characters.
pub const MAX_SOURCE_CHARS: usize = 200_000;

/// Longest accepted title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Per-stage parameter overrides for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOverrides {
    #[serde(default)]
    pub fact_extraction: StageParams,
    #[serde(default)]
    pub reasoning: StageParams,
    #[serde(default)]
    pub summary: StageParams,
}

impl StageOverrides {
    /// Same model for every stage, other parameters left at their defaults.
    pub fn with_model(model: impl Into<String>) -> Self {
        let model = model.into();
        let params = StageParams {
            model: Some(model),
            ..Default::default()
        };
        Self {
            fact_extraction: params.clone(),
            reasoning: params.clone(),
            summary: params,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> &StageParams {
        match stage {
            Stage::FactExtraction => &self.fact_extraction,
            Stage::Reasoning => &self.reasoning,
            Stage::Summary => &self.summary,
        }
    }
}

/// Request to analyze one source text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub source_text: String,
    /// Default model for stages that do not set their own.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stages: StageOverrides,
    /// Apply PII redaction to stage input. Falls back to the configured default.
    #[serde(default)]
    pub pii_redaction: Option<bool>,
}

impl AnalysisRequest {
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Use one model for all three stages.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_stages(mut self, stages: StageOverrides) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_pii_redaction(mut self, enabled: bool) -> Self {
        self.pii_redaction = Some(enabled);
        self
    }
}

/// Sequences the three stages and persists the finished [`Analysis`].
///
/// A run is all-or-nothing: every parameter is validated before the first
/// provider call, and the analysis with its traces is written in a single
/// transaction only after all three stages succeed.
pub struct PipelineOrchestrator {
    executor: StageExecutor,
    storage: Arc<dyn Storage>,
    redactor: Arc<dyn Redactor>,
    default_model: String,
    pii_redaction_default: bool,
}

impl PipelineOrchestrator {
    pub fn new(
        executor: StageExecutor,
        storage: Arc<dyn Storage>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            storage,
            redactor: Arc::new(PassthroughRedactor),
            default_model: default_model.into(),
            pii_redaction_default: false,
        }
    }

    /// Replace the redactor applied when PII redaction is on.
    pub fn with_redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = redactor;
        self
    }

    /// Redaction setting used when a request leaves it unset.
    pub fn with_pii_redaction_default(mut self, enabled: bool) -> Self {
        self.pii_redaction_default = enabled;
        self
    }

    /// Run the pipeline and persist the resulting analysis.
    pub async fn run(&self, scope: &OrgScope, request: AnalysisRequest) -> InsightResult<Analysis> {
        let source_text = validate_source(&request.source_text)?;
        let title = resolve_title(request.title.as_deref(), &source_text)?;
        let settings = self.resolve_settings(&request)?;
        let pii_redacted = request.pii_redaction.unwrap_or(self.pii_redaction_default);

        let stage_source = if pii_redacted {
            self.redactor.redact(&source_text)
        } else {
            source_text.clone()
        };

        let mut state = PipelineState::Init;
        let mut recorder = TraceRecorder::new();
        let mut outputs: Vec<String> = Vec::with_capacity(Stage::ALL.len());

        debug!(
            organization_id = %scope.organization_id,
            pii_redacted,
            "Starting analysis pipeline"
        );

        loop {
            state = state.next();
            let Some(stage) = state.stage() else {
                break;
            };

            let request = StageRequest {
                stage,
                settings: settings[stage.index()].clone(),
                input_text: stage.compose_input(&stage_source, &outputs),
            };

            let execution = match self.executor.execute(request).await {
                Ok(execution) => execution,
                Err(e) => {
                    warn!(
                        organization_id = %scope.organization_id,
                        stage = %stage,
                        state = ?PipelineState::Failed,
                        error = %e,
                        "Analysis pipeline aborted"
                    );
                    return Err(e);
                }
            };

            recorder.record(execution.trace)?;
            outputs.push(execution.output_text);
        }

        debug_assert_eq!(state, PipelineState::Aggregate);
        let (stage_traces, totals) = recorder.finish()?;

        let mut outputs = outputs.into_iter();
        let (Some(facts), Some(insights), Some(summary)) =
            (outputs.next(), outputs.next(), outputs.next())
        else {
            return Err(InsightError::Internal {
                message: "pipeline finished without three stage outputs".to_string(),
            });
        };

        let analysis = Analysis {
            id: Uuid::new_v4().to_string(),
            organization_id: scope.organization_id.clone(),
            created_by: scope.user_id.clone(),
            title,
            source_text,
            pii_redacted,
            facts,
            insights,
            summary,
            stage_traces,
            total_input_tokens: totals.input_tokens,
            total_output_tokens: totals.output_tokens,
            total_tokens: totals.total_tokens,
            total_cost: totals.cost,
            total_duration_ms: totals.duration_ms,
            created_at: Utc::now().trunc_subsecs(6),
        };

        self.storage.create_analysis(&analysis).await?;
        state = state.next();

        info!(
            analysis_id = %analysis.id,
            organization_id = %analysis.organization_id,
            state = ?state,
            models = %analysis.model_summary(),
            total_tokens = analysis.total_tokens,
            total_cost = analysis.total_cost,
            duration_ms = analysis.total_duration_ms,
            "Analysis persisted"
        );

        Ok(analysis)
    }

    /// Load an analysis owned by the caller's organization.
    pub async fn get(&self, scope: &OrgScope, id: &str) -> InsightResult<Analysis> {
        self.storage
            .get_analysis(&scope.organization_id, id)
            .await?
            .ok_or_else(|| InsightError::NotFound {
                entity: "Analysis",
                id: id.to_string(),
            })
    }

    /// List the organization's analyses, newest first.
    pub async fn list(
        &self,
        scope: &OrgScope,
        page: PageRequest,
    ) -> InsightResult<Page<AnalysisSummary>> {
        Ok(self
            .storage
            .list_analyses(&scope.organization_id, page)
            .await?)
    }

    fn resolve_settings(&self, request: &AnalysisRequest) -> InsightResult<Vec<StageSettings>> {
        let default_model = match request.model.as_deref() {
            Some(model) if model.trim().is_empty() => {
                return Err(InsightError::validation("model", "model cannot be empty"));
            }
            Some(model) => model.trim(),
            None => self.default_model.as_str(),
        };

        Stage::ALL
            .iter()
            .map(|stage| request.stages.for_stage(*stage).resolve(*stage, default_model))
            .collect()
    }
}

fn validate_source(source_text: &str) -> InsightResult<String> {
    if source_text.trim().is_empty() {
        return Err(InsightError::validation(
            "source_text",
            "source text cannot be empty",
        ));
    }
    let chars = source_text.chars().count();
    if chars > MAX_SOURCE_CHARS {
        return Err(InsightError::validation(
            "source_text",
            format!("must be at most {} characters, got {}", MAX_SOURCE_CHARS, chars),
        ));
    }
    Ok(source_text.to_string())
}

/// Caller title, or the first line of the source shortened to fit.
fn resolve_title(title: Option<&str>, source_text: &str) -> InsightResult<String> {
    match title.map(str::trim) {
        Some(title) if title.chars().count() > MAX_TITLE_CHARS => Err(InsightError::validation(
            "title",
            format!("must be at most {} characters", MAX_TITLE_CHARS),
        )),
        Some(title) if !title.is_empty() => Ok(title.to_string()),
        _ => {
            let first_line = source_text
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default();
            let mut derived: String = first_line.chars().take(60).collect();
            if first_line.chars().count() > 60 {
                derived.push_str("...");
            }
            Ok(derived)
        }
    }
}
