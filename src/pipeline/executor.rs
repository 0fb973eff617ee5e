use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::trace::ModelPricing;
use super::{Stage, StageSettings};
use crate::error::{InsightError, InsightResult};
use crate::langbase::{CompletionRequest, LlmProvider, Message};
use crate::storage::StageTrace;

/// Input for one stage call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRequest {
    pub stage: Stage,
    pub settings: StageSettings,
    /// Composed user input (source text plus earlier stage outputs).
    pub input_text: String,
}

/// Output text and trace of one stage call.
#[derive(Debug, Clone, PartialEq)]
pub struct StageExecution {
    pub output_text: String,
    pub trace: StageTrace,
}

/// Runs a single pipeline stage against the LLM provider.
///
/// Exactly one provider call per stage. Any provider error or empty output
/// fails the stage; retries belong to the provider.
#[derive(Clone)]
pub struct StageExecutor {
    provider: Arc<dyn LlmProvider>,
    pipe_name: String,
    pricing: ModelPricing,
}

impl StageExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        pipe_name: impl Into<String>,
        pricing: ModelPricing,
    ) -> Self {
        Self {
            provider,
            pipe_name: pipe_name.into(),
            pricing,
        }
    }

    /// Execute one stage and build its trace.
    pub async fn execute(&self, request: StageRequest) -> InsightResult<StageExecution> {
        let StageRequest {
            stage,
            settings,
            input_text,
        } = request;

        let system_prompt = settings
            .system_prompt
            .clone()
            .unwrap_or_else(|| stage.default_system_prompt().to_string());

        let completion_request = CompletionRequest {
            pipe: self.pipe_name.clone(),
            messages: vec![Message::system(system_prompt), Message::user(input_text)],
            model: settings.model.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            json_output: false,
        };

        debug!(
            stage = %stage,
            model = %settings.model,
            temperature = settings.temperature,
            top_p = settings.top_p,
            max_tokens = settings.max_tokens,
            "Executing stage"
        );

        let start = Instant::now();
        let completion = self.provider.execute(completion_request).await.map_err(|e| {
            warn!(stage = %stage, error = %e, "Stage call failed");
            InsightError::UpstreamProvider {
                message: format!("{} failed: {}", stage, e),
            }
        })?;
        let duration_ms = start.elapsed().as_millis() as i64;

        let output_text = completion.text.trim().to_string();
        if output_text.is_empty() {
            warn!(stage = %stage, "Stage returned empty output");
            return Err(InsightError::UpstreamProvider {
                message: format!("{} returned empty output", stage),
            });
        }

        let cost = self.pricing.cost(&settings.model, &completion.usage);
        let trace = StageTrace::new(stage, &settings.model)
            .with_sampling(settings.temperature, settings.top_p, settings.max_tokens)
            .with_usage(completion.usage)
            .with_duration(duration_ms)
            .with_cost(cost)
            .with_system_prompt(settings.system_prompt);

        info!(
            stage = %stage,
            model = %trace.model,
            total_tokens = trace.total_tokens,
            cost = trace.cost,
            duration_ms = trace.duration_ms,
            "Stage completed"
        );

        Ok(StageExecution { output_text, trace })
    }
}
