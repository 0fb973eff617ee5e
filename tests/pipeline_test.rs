//! Integration tests for the three-stage analysis pipeline
//!
//! Runs the orchestrator against a scripted provider and an in-memory
//! SQLite database.

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;

use common::*;
use dta_insights::error::InsightError;
use dta_insights::pipeline::{
    AnalysisRequest, ModelPricing, PipelineOrchestrator, Redactor, Stage, StageExecutor,
    StageOverrides, StageParams,
};
use dta_insights::storage::{PageRequest, Storage};

fn orchestrator(provider: Arc<ScriptedProvider>, storage: Arc<dyn Storage>) -> PipelineOrchestrator {
    let executor = StageExecutor::new(provider, "dta-analysis-v1", ModelPricing::default());
    PipelineOrchestrator::new(executor, storage, "gpt-4o-mini")
}

#[cfg(test)]
mod run_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_run_persists_three_stage_analysis() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let analysis = state
            .pipeline
            .run(&scope(), transcript_request("gpt-4o"))
            .await
            .unwrap();

        assert_eq!(analysis.stage_traces.len(), 3);
        assert_eq!(
            analysis
                .stage_traces
                .iter()
                .map(|t| t.stage.label())
                .collect::<Vec<_>>(),
            vec![
                "Stage 1: Fact Extraction",
                "Stage 2: Reasoning & Insights",
                "Stage 3: Summary"
            ]
        );
        assert_eq!(
            analysis.total_tokens,
            analysis.stage_traces.iter().map(|t| t.total_tokens).sum::<i64>()
        );
        assert_eq!(analysis.total_tokens, 450);
        assert!(analysis.total_cost > 0.0);
        assert_eq!(analysis.title, "Late parcel");
        assert_eq!(analysis.source_text, SUPPORT_TRANSCRIPT);
        assert_eq!(analysis.created_by, "user-1");
        assert_eq!(provider.stage_calls(), 3);

        let stored = state.pipeline.get(&scope(), &analysis.id).await.unwrap();
        assert_eq!(stored, analysis);
    }

    #[tokio::test]
    async fn test_run_applies_stage_defaults() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let analysis = state
            .pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT))
            .await
            .unwrap();

        let expected = [(0.25, 1000), (0.65, 1500), (0.45, 800)];
        for (trace, (temperature, max_tokens)) in analysis.stage_traces.iter().zip(expected) {
            assert_eq!(trace.model, "gpt-4o-mini");
            assert_eq!(trace.temperature, temperature);
            assert_eq!(trace.top_p, 0.95);
            assert_eq!(trace.max_tokens, max_tokens);
            assert!(trace.system_prompt.is_none());
        }

        let calls = provider.calls();
        for (call, stage) in calls.iter().zip(Stage::ALL) {
            assert_eq!(call.messages[0].content, stage.default_system_prompt());
            assert_eq!(call.pipe, "dta-analysis-v1");
        }
    }

    #[tokio::test]
    async fn test_run_threads_stage_outputs_forward() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let analysis = state
            .pipeline
            .run(&scope(), transcript_request("gpt-4o"))
            .await
            .unwrap();

        let calls = provider.calls();
        let stage_input = |i: usize| calls[i].messages[1].content.clone();

        assert_eq!(stage_input(0), SUPPORT_TRANSCRIPT);
        assert!(stage_input(1).contains(SUPPORT_TRANSCRIPT));
        assert!(stage_input(1).contains(&analysis.facts));
        assert!(stage_input(2).contains(SUPPORT_TRANSCRIPT));
        assert!(stage_input(2).contains(&analysis.facts));
        assert!(stage_input(2).contains(&analysis.insights));
    }

    #[tokio::test]
    async fn test_run_with_per_stage_overrides() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let stages = StageOverrides {
            reasoning: StageParams {
                model: Some("gpt-4o".to_string()),
                temperature: Some(0.9),
                ..Default::default()
            },
            summary: StageParams {
                system_prompt: Some("Answer in one sentence.".to_string()),
                max_tokens: Some(120),
                ..Default::default()
            },
            ..Default::default()
        };
        let request = AnalysisRequest::new(SUPPORT_TRANSCRIPT).with_stages(stages);

        let analysis = state.pipeline.run(&scope(), request).await.unwrap();

        let reasoning = analysis.trace(Stage::Reasoning).unwrap();
        assert_eq!(reasoning.model, "gpt-4o");
        assert_eq!(reasoning.temperature, 0.9);

        let summary = analysis.trace(Stage::Summary).unwrap();
        assert_eq!(summary.max_tokens, 120);
        assert_eq!(summary.system_prompt.as_deref(), Some("Answer in one sentence."));
        assert_eq!(provider.calls()[2].messages[0].content, "Answer in one sentence.");

        assert_eq!(
            analysis.model_summary(),
            "gpt-4o-mini / gpt-4o / gpt-4o-mini"
        );
    }

    #[tokio::test]
    async fn test_title_derived_from_source() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider).await;

        let analysis = state
            .pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT))
            .await
            .unwrap();
        assert!(analysis.title.starts_with("Customer: Hi, my order #4521"));
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_invalid_parameters_make_no_provider_calls() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let stages = StageOverrides {
            summary: StageParams {
                top_p: Some(1.5),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = state
            .pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT).with_stages(stages))
            .await
            .unwrap_err();

        assert!(matches!(err, InsightError::InputValidation { .. }));
        assert_eq!(provider.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let err = state
            .pipeline
            .run(&scope(), AnalysisRequest::new("  \n"))
            .await
            .unwrap_err();
        assert!(matches!(err, InsightError::InputValidation { .. }));
        assert_eq!(provider.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_stage_failure_persists_nothing() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let stages = StageOverrides {
            reasoning: StageParams {
                model: Some(BROKEN_MODEL.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = state
            .pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT).with_stages(stages))
            .await
            .unwrap_err();

        assert!(matches!(err, InsightError::UpstreamProvider { .. }));
        // Stage 3 never runs after Stage 2 fails.
        assert_eq!(provider.stage_calls(), 2);

        let page = state
            .pipeline
            .list(&scope(), PageRequest { skip: 0, limit: 20 })
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_empty_stage_output_fails_run() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider.clone()).await;

        let err = state
            .pipeline
            .run(&scope(), transcript_request(SILENT_MODEL))
            .await
            .unwrap_err();

        assert!(matches!(err, InsightError::UpstreamProvider { .. }));
        assert_eq!(provider.stage_calls(), 1);
    }
}

#[cfg(test)]
mod redaction_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct MaskDigits;

    impl Redactor for MaskDigits {
        fn redact(&self, text: &str) -> String {
            text.chars()
                .map(|c| if c.is_ascii_digit() { '#' } else { c })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_redaction_applies_to_stage_input_only() {
        let provider = Arc::new(ScriptedProvider::new());
        let storage: Arc<dyn Storage> = memory_storage().await;
        let pipeline =
            orchestrator(provider.clone(), storage).with_redactor(Arc::new(MaskDigits));

        let analysis = pipeline
            .run(
                &scope(),
                AnalysisRequest::new(SUPPORT_TRANSCRIPT).with_pii_redaction(true),
            )
            .await
            .unwrap();

        assert!(analysis.pii_redacted);
        assert_eq!(analysis.source_text, SUPPORT_TRANSCRIPT);
        for call in provider.calls() {
            assert!(!call.messages[1].content.contains("4521"));
        }
    }

    #[tokio::test]
    async fn test_redaction_default_off() {
        let provider = Arc::new(ScriptedProvider::new());
        let storage: Arc<dyn Storage> = memory_storage().await;
        let pipeline =
            orchestrator(provider.clone(), storage).with_redactor(Arc::new(MaskDigits));

        let analysis = pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT))
            .await
            .unwrap();

        assert!(!analysis.pii_redacted);
        assert!(provider.calls()[0].messages[1].content.contains("4521"));
    }

    #[tokio::test]
    async fn test_redaction_default_from_configuration() {
        let provider = Arc::new(ScriptedProvider::new());
        let storage: Arc<dyn Storage> = memory_storage().await;
        let pipeline = orchestrator(provider.clone(), storage)
            .with_redactor(Arc::new(MaskDigits))
            .with_pii_redaction_default(true);

        let analysis = pipeline
            .run(&scope(), AnalysisRequest::new(SUPPORT_TRANSCRIPT))
            .await
            .unwrap();
        assert!(analysis.pii_redacted);
    }
}

#[cfg(test)]
mod query_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_get_is_organization_scoped() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider).await;

        let analysis = state
            .pipeline
            .run(&scope(), transcript_request("gpt-4o"))
            .await
            .unwrap();

        let err = state
            .pipeline
            .get(&other_scope(), &analysis.id)
            .await
            .unwrap_err();
        assert!(matches!(err, InsightError::NotFound { entity: "Analysis", .. }));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_pagination() {
        let provider = Arc::new(ScriptedProvider::new());
        let state = test_state(provider).await;

        let mut ids = Vec::new();
        for model in ["gpt-4o-mini", "gpt-4o", "gpt-4.1"] {
            let analysis = state
                .pipeline
                .run(&scope(), transcript_request(model))
                .await
                .unwrap();
            ids.push(analysis.id);
        }

        let page = state
            .pipeline
            .list(&scope(), PageRequest { skip: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[2]);
        assert_eq!(page.items[0].model_summary, "gpt-4.1");

        let rest = state
            .pipeline
            .list(&scope(), PageRequest { skip: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.items[0].id, ids[0]);

        let other = state
            .pipeline
            .list(&other_scope(), PageRequest { skip: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(other.total_count, 0);
    }
}
