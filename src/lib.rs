//! # DTA Insights
//!
//! A three-stage "Dynamic Temperature Adjustment" analysis pipeline over
//! Langbase Pipes, plus a blind LLM-judged comparison service that produces
//! an auditable verdict between two analyses of the same source text.
//!
//! ## Features
//!
//! - **Analysis pipeline**: fact extraction (low temperature), reasoning and
//!   insights (high temperature), summary synthesis (balanced temperature)
//! - **Tracing and cost**: per-stage token, duration and cost traces, frozen
//!   into pipeline totals
//! - **Blind comparison**: three concurrent judge calls over outputs labeled
//!   "A" and "B", aggregated into one overall verdict
//! - **Organization scoping**: every record and query is confined to one
//!   organization
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum) → PipelineOrchestrator → StageExecutor ×3 → LlmProvider (Langbase)
//!             → ComparisonService    → JudgeClient ×3   ↗
//!                         ↓
//!                   SQLite (sqlx)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dta_insights::{AppState, Config};
//! use dta_insights::langbase::LangbaseClient;
//! use dta_insights::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let langbase = Arc::new(LangbaseClient::new(&config.langbase, config.request.clone())?);
//!     let state = Arc::new(AppState::new(config, storage, langbase));
//!     dta_insights::server::serve(state, async {}).await?;
//!     Ok(())
//! }
//! ```

/// Blind pairwise comparison of analyses.
pub mod comparison;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and the LLM provider capability.
pub mod langbase;
/// Three-stage analysis pipeline.
pub mod pipeline;
/// System prompts for the stages and the judge.
pub mod prompts;
/// Caller organization scope.
pub mod scope;
/// HTTP server and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use scope::OrgScope;
pub use server::{create_router, AppState, SharedState};
