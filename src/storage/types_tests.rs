//! Unit tests for storage types and builder patterns.
//!
//! Tests builders, serialization and derived values for StageTrace,
//! Analysis, Winner, SideScores, Comparison and PageRequest.

use super::*;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;

fn trace(stage: Stage, model: &str, tokens: i64) -> StageTrace {
    StageTrace::new(stage, model).with_usage(TokenUsage::new(tokens, 0))
}

fn analysis(models: [&str; 3]) -> Analysis {
    Analysis {
        id: "an-1".to_string(),
        organization_id: "org-1".to_string(),
        created_by: "user-1".to_string(),
        title: "Support call".to_string(),
        source_text: "Customer: hi".to_string(),
        pii_redacted: false,
        facts: "- greeting".to_string(),
        insights: "polite".to_string(),
        summary: "A greeting.".to_string(),
        stage_traces: vec![
            trace(Stage::FactExtraction, models[0], 10),
            trace(Stage::Reasoning, models[1], 20),
            trace(Stage::Summary, models[2], 30),
        ],
        total_input_tokens: 60,
        total_output_tokens: 0,
        total_tokens: 60,
        total_cost: 0.0,
        total_duration_ms: 0,
        created_at: Utc::now(),
    }
}

// ============================================================================
// StageTrace tests
// ============================================================================

#[test]
fn test_stage_trace_new_uses_stage_defaults() {
    let trace = StageTrace::new(Stage::Reasoning, "gpt-4o");
    assert!(!trace.trace_id.is_empty());
    assert_eq!(trace.temperature, 0.65);
    assert_eq!(trace.top_p, 0.95);
    assert_eq!(trace.max_tokens, 1500);
    assert_eq!(trace.total_tokens, 0);
    assert!(trace.system_prompt.is_none());
}

#[test]
fn test_stage_trace_builders() {
    let trace = StageTrace::new(Stage::Summary, "gpt-4o-mini")
        .with_sampling(0.1, 0.5, 64)
        .with_usage(TokenUsage::new(12, 8))
        .with_duration(-5)
        .with_cost(-1.0)
        .with_system_prompt(Some("terse".to_string()));

    assert_eq!(trace.temperature, 0.1);
    assert_eq!(trace.max_tokens, 64);
    assert_eq!(trace.total_tokens, 20);
    assert_eq!(trace.duration_ms, 0);
    assert_eq!(trace.cost, 0.0);
    assert_eq!(trace.system_prompt.as_deref(), Some("terse"));
}

#[test]
fn test_stage_trace_serializes_stage_label() {
    let value = serde_json::to_value(StageTrace::new(Stage::FactExtraction, "m")).unwrap();
    assert_eq!(value["stage"], "Stage 1: Fact Extraction");
    assert_eq!(value["system_prompt"], serde_json::Value::Null);
}

// ============================================================================
// Analysis tests
// ============================================================================

#[test]
fn test_analysis_stage_output() {
    let analysis = analysis(["m", "m", "m"]);
    assert_eq!(analysis.stage_output(Stage::FactExtraction), "- greeting");
    assert_eq!(analysis.stage_output(Stage::Reasoning), "polite");
    assert_eq!(analysis.stage_output(Stage::Summary), "A greeting.");
    assert_eq!(analysis.trace(Stage::Reasoning).map(|t| t.total_tokens), Some(20));
}

#[test]
fn test_analysis_model_summary_single_model() {
    assert_eq!(analysis(["gpt-4o", "gpt-4o", "gpt-4o"]).model_summary(), "gpt-4o");
}

#[test]
fn test_analysis_model_summary_mixed_models() {
    assert_eq!(
        analysis(["gpt-4o-mini", "gpt-4o", "gpt-4o-mini"]).model_summary(),
        "gpt-4o-mini / gpt-4o / gpt-4o-mini"
    );
}

// ============================================================================
// Winner tests
// ============================================================================

#[test]
fn test_winner_serialization() {
    assert_eq!(serde_json::to_value(Winner::A).unwrap(), json!("A"));
    assert_eq!(serde_json::to_value(Winner::Tie).unwrap(), json!("tie"));
    let parsed: Winner = serde_json::from_value(json!("B")).unwrap();
    assert_eq!(parsed, Winner::B);
}

#[test]
fn test_winner_from_str() {
    assert_eq!("a".parse::<Winner>().unwrap(), Winner::A);
    assert_eq!(" B ".parse::<Winner>().unwrap(), Winner::B);
    assert_eq!("Tie".parse::<Winner>().unwrap(), Winner::Tie);
    assert_eq!("draw".parse::<Winner>().unwrap(), Winner::Tie);
    assert!("neither".parse::<Winner>().is_err());
}

#[test]
fn test_winner_display_roundtrip() {
    for winner in [Winner::A, Winner::B, Winner::Tie] {
        assert_eq!(winner.to_string().parse::<Winner>().unwrap(), winner);
    }
}

// ============================================================================
// SideScores tests
// ============================================================================

#[test]
fn test_side_scores_totals_skip_nulls() {
    let mut scores = SideScores::default();
    scores.a.insert("accuracy".to_string(), Some(0.5));
    scores.a.insert("clarity".to_string(), None);
    scores.b.insert("accuracy".to_string(), Some(0.25));
    scores.b.insert("clarity".to_string(), Some(0.25));

    assert_eq!(scores.total_a(), 0.5);
    assert_eq!(scores.total_b(), 0.5);
}

#[test]
fn test_side_scores_serialize_with_labels_and_nulls() {
    let mut scores = SideScores::default();
    scores.a.insert("clarity".to_string(), None);
    scores.b.insert("clarity".to_string(), Some(1.0));

    assert_eq!(
        serde_json::to_value(&scores).unwrap(),
        json!({"A": {"clarity": null}, "B": {"clarity": 1.0}})
    );
}

// ============================================================================
// Comparison tests
// ============================================================================

#[test]
fn test_pair_key_is_order_independent() {
    assert_eq!(pair_key("b", "a"), pair_key("a", "b"));
    assert_eq!(pair_key("a", "b"), ("a".to_string(), "b".to_string()));
}

#[test]
fn test_comparison_summary_copies_fields() {
    let comparison = Comparison {
        id: "cmp-1".to_string(),
        organization_id: "org-1".to_string(),
        created_by: "user-1".to_string(),
        analysis_a_id: "z".to_string(),
        analysis_b_id: "a".to_string(),
        judge_model: "claude-sonnet-4.5".to_string(),
        evaluation_criteria: vec!["accuracy".to_string()],
        overall_winner: Winner::B,
        overall_reasoning: "B better".to_string(),
        stage_results: vec![],
        judge_trace: JudgeTrace {
            model: "claude-sonnet-4.5".to_string(),
            total_tokens: 10,
            cost: 0.1,
            duration_ms: 5,
        },
        model_a_summary: "gpt-4o-mini".to_string(),
        model_b_summary: "gpt-4o".to_string(),
        cost_difference: 0.02,
        quality_improvement: None,
        created_at: Utc::now(),
    };

    assert_eq!(comparison.pair_key(), ("a".to_string(), "z".to_string()));

    let summary = comparison.summary();
    assert_eq!(summary.id, "cmp-1");
    assert_eq!(summary.overall_winner, Winner::B);
    assert_eq!(summary.model_b_summary, "gpt-4o");
    assert_eq!(summary.quality_improvement, None);
    assert_eq!(summary.created_at, comparison.created_at);
}

// ============================================================================
// PageRequest tests
// ============================================================================

#[test]
fn test_page_request_page_number() {
    assert_eq!(PageRequest { skip: 0, limit: 5 }.page(), 1);
    assert_eq!(PageRequest { skip: 4, limit: 5 }.page(), 1);
    assert_eq!(PageRequest { skip: 5, limit: 5 }.page(), 2);
    assert_eq!(PageRequest { skip: 0, limit: 0 }.page(), 1);
}

#[test]
fn test_page_request_total_pages() {
    let page = PageRequest { skip: 0, limit: 5 };
    assert_eq!(page.total_pages(0), 0);
    assert_eq!(page.total_pages(5), 1);
    assert_eq!(page.total_pages(6), 2);
    assert_eq!(page.total_pages(-3), 0);
}
