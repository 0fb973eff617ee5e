//! Langbase Pipes client and the provider capability it implements.
//!
//! The pipeline and the judge only depend on [`LlmProvider`]; which
//! provider backs it is a configuration concern.

mod client;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::LangbaseClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::LangbaseResult;

/// Capability interface for a single LLM call.
///
/// Implementations own transport concerns (auth, timeouts, retries with
/// backoff). Callers treat any error as final for their unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion and report its text and token usage.
    async fn execute(&self, request: CompletionRequest) -> LangbaseResult<Completion>;
}
