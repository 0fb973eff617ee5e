//! Shared fixtures for integration tests.
//!
//! `ScriptedProvider` stands in for Langbase: analysis-stage calls echo
//! their parameters, judge calls return a fixed JSON verdict.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dta_insights::comparison::DEFAULT_CRITERIA;
use dta_insights::config::Config;
use dta_insights::error::{LangbaseError, LangbaseResult};
use dta_insights::langbase::{Completion, CompletionRequest, LlmProvider, TokenUsage};
use dta_insights::pipeline::AnalysisRequest;
use dta_insights::storage::{SqliteStorage, Storage};
use dta_insights::{AppState, OrgScope, SharedState};

/// Transcript used across scenarios.
pub const SUPPORT_TRANSCRIPT: &str = "Customer: Hi, my order #4521 hasn't arrived and it's been 10 days.\n\
Agent: I'm sorry about that. I can see the parcel is held at the regional depot.\n\
Customer: Can you get it delivered by Friday?\n\
Agent: I've escalated it and issued a $10 credit. You'll get tracking by tomorrow.";

/// Model whose calls always fail.
pub const BROKEN_MODEL: &str = "broken-model";

/// Model whose calls return blank text.
pub const SILENT_MODEL: &str = "silent-model";

/// In-process LLM provider with scripted answers.
pub struct ScriptedProvider {
    judge_scores: (Option<f64>, Option<f64>),
    judge_text: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            judge_scores: (Some(0.6), Some(0.8)),
            judge_text: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Score every default criterion with these values for A and B.
    pub fn with_judge_scores(mut self, a: Option<f64>, b: Option<f64>) -> Self {
        self.judge_scores = (a, b);
        self
    }

    /// Return this text verbatim from every judge call.
    pub fn with_judge_text(mut self, text: impl Into<String>) -> Self {
        self.judge_text = Some(text.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn judge_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.json_output).count()
    }

    pub fn stage_calls(&self) -> usize {
        self.calls().iter().filter(|c| !c.json_output).count()
    }

    fn judge_verdict(&self) -> String {
        if let Some(text) = &self.judge_text {
            return text.clone();
        }
        let (a, b) = self.judge_scores;
        let side = |score: Option<f64>| {
            DEFAULT_CRITERIA
                .iter()
                .map(|c| (c.to_string(), json!(score)))
                .collect::<serde_json::Map<_, _>>()
        };
        json!({
            "scores": {"A": side(a), "B": side(b)},
            "reasoning": "Scripted verdict."
        })
        .to_string()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn execute(&self, request: CompletionRequest) -> LangbaseResult<Completion> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if request.model == BROKEN_MODEL {
            return Err(LangbaseError::Api {
                status: 500,
                message: "model exploded".to_string(),
            });
        }

        let text = if request.json_output {
            self.judge_verdict()
        } else if request.model == SILENT_MODEL {
            "   ".to_string()
        } else {
            format!(
                "[{} t={}] analysis of {} chars",
                request.model,
                request.temperature,
                request.prompt_text().chars().count()
            )
        };

        let usage = if request.json_output {
            TokenUsage::new(400, 80)
        } else {
            TokenUsage::new(100, 50)
        };

        Ok(Completion {
            text,
            model: Some(request.model.clone()),
            usage,
            latency_ms: 1,
        })
    }
}

pub fn scope() -> OrgScope {
    OrgScope::new("org-1", "user-1")
}

pub fn other_scope() -> OrgScope {
    OrgScope::new("org-2", "user-2")
}

pub async fn memory_storage() -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::new_in_memory()
            .await
            .expect("Failed to create in-memory storage"),
    )
}

/// Application state over an in-memory database and the given provider.
pub async fn test_state(provider: Arc<ScriptedProvider>) -> SharedState {
    test_state_with_config(provider, Config::default()).await
}

pub async fn test_state_with_config(
    provider: Arc<ScriptedProvider>,
    config: Config,
) -> SharedState {
    let storage: Arc<dyn Storage> = memory_storage().await;
    Arc::new(AppState::new(config, storage, provider))
}

/// Analyze the support transcript with one model for all stages.
pub fn transcript_request(model: &str) -> AnalysisRequest {
    AnalysisRequest::new(SUPPORT_TRANSCRIPT)
        .with_title("Late parcel")
        .with_model(model)
}
