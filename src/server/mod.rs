//! HTTP surface for analyses and comparisons.
//!
//! This module provides:
//! - Shared application state wiring storage, pipeline and judge
//! - Request handlers and the organization-scope extractor
//! - Router construction and the serve loop

mod handlers;
mod http;

pub use handlers::*;
pub use http::*;

use std::sync::Arc;

use crate::comparison::{ComparisonService, JudgeClient};
use crate::config::Config;
use crate::langbase::LlmProvider;
use crate::pipeline::{ModelPricing, PipelineOrchestrator, StageExecutor};
use crate::storage::Storage;

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Persistence backend.
    pub storage: Arc<dyn Storage>,
    /// Three-stage analysis pipeline.
    pub pipeline: PipelineOrchestrator,
    /// Blind comparison service.
    pub comparisons: ComparisonService,
}

impl AppState {
    /// Wire the pipeline and comparison service over one provider and store.
    pub fn new(config: Config, storage: Arc<dyn Storage>, provider: Arc<dyn LlmProvider>) -> Self {
        let pricing = ModelPricing::new(&config.pricing);

        tracing::info!(
            analysis_pipe = %config.pipes.analysis,
            judge_pipe = %config.pipes.judge,
            default_model = %config.insights.default_model,
            judge_model = %config.insights.judge_model,
            "Initializing application state"
        );

        let executor = StageExecutor::new(provider.clone(), &config.pipes.analysis, pricing.clone());
        let pipeline =
            PipelineOrchestrator::new(executor, storage.clone(), &config.insights.default_model)
                .with_pii_redaction_default(config.insights.pii_redaction_default);

        let judge = JudgeClient::new(provider, &config.pipes.judge, pricing);
        let comparisons =
            ComparisonService::new(storage.clone(), judge, &config.insights.judge_model);

        Self {
            config,
            storage,
            pipeline,
            comparisons,
        }
    }
}

/// Shared application state type.
pub type SharedState = Arc<AppState>;
