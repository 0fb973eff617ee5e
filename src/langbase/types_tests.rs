//! Unit tests for Langbase API types.
//!
//! Tests request/response types, serialization, deserialization,
//! and the provider-neutral completion types.

use super::*;
use serde_json::json;

// Message tests
#[test]
fn test_message_system() {
    let msg = Message::system("You are a careful analyst");
    assert!(matches!(msg.role, MessageRole::System));
    assert_eq!(msg.content, "You are a careful analyst");
}

#[test]
fn test_message_role_serializes_lowercase() {
    let value = serde_json::to_value(Message::user("hi")).unwrap();
    assert_eq!(value, json!({"role": "user", "content": "hi"}));
}

// PipeRequest tests
#[test]
fn test_pipe_request_new() {
    let req = PipeRequest::new("test-pipe", vec![Message::user("test")]);
    assert_eq!(req.name, "test-pipe");
    assert_eq!(req.messages.len(), 1);
    assert!(!req.stream);
    assert!(req.model.is_none());
    assert!(req.json.is_none());
}

#[test]
fn test_pipe_request_skips_unset_overrides() {
    let req = PipeRequest::new("p", vec![]);
    let value = serde_json::to_value(&req).unwrap();
    assert!(value.get("model").is_none());
    assert!(value.get("temperature").is_none());
    assert!(value.get("json").is_none());
    assert_eq!(value["stream"], json!(false));
}

#[test]
fn test_pipe_request_with_sampling() {
    let req = PipeRequest::new("p", vec![])
        .with_model("openai:gpt-4o")
        .with_sampling(0.25, 0.95, 1000)
        .with_json_output(true);
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["model"], "openai:gpt-4o");
    assert_eq!(value["temperature"], json!(0.25));
    assert_eq!(value["top_p"], json!(0.95));
    assert_eq!(value["max_tokens"], json!(1000));
    assert_eq!(value["json"], json!(true));
}

// PipeResponse tests
#[test]
fn test_pipe_response_deserialize_with_usage() {
    let response: PipeResponse = serde_json::from_value(json!({
        "success": true,
        "completion": "done",
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }
    }))
    .unwrap();

    assert!(response.success);
    let usage = response.raw.unwrap().usage.unwrap();
    assert_eq!(usage.total_tokens, Some(15));
}

#[test]
fn test_pipe_response_deserialize_minimal() {
    let response: PipeResponse =
        serde_json::from_value(json!({"success": true, "completion": "x"})).unwrap();
    assert!(response.raw.is_none());
    assert_eq!(response.completion, "x");
}

// CreatePipeRequest tests
#[test]
fn test_create_pipe_request_builder() {
    let req = CreatePipeRequest::new("judge")
        .with_description("Blind judge")
        .with_status(PipeStatus::Private)
        .with_model("anthropic:claude-sonnet-4.5")
        .with_upsert(true)
        .with_json_output(true)
        .with_store(false);

    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["name"], "judge");
    assert_eq!(value["status"], "private");
    assert_eq!(value["upsert"], json!(true));
    assert_eq!(value["store"], json!(false));
    assert!(value.get("messages").is_none());
}

// TokenUsage tests
#[test]
fn test_token_usage_total_is_sum() {
    let usage = TokenUsage::new(120, 30);
    assert_eq!(usage.total_tokens, 150);
}

#[test]
fn test_token_estimate_rounds_up() {
    assert_eq!(TokenUsage::estimate_tokens(""), 0);
    assert_eq!(TokenUsage::estimate_tokens("abc"), 1);
    assert_eq!(TokenUsage::estimate_tokens("abcde"), 2);
}

#[test]
fn test_token_usage_prefers_provider_counts() {
    let usage = Usage {
        prompt_tokens: Some(100),
        completion_tokens: Some(40),
        total_tokens: Some(999),
    };
    let tokens = TokenUsage::from_provider(Some(&usage), "ignored", "ignored");
    assert_eq!(tokens, TokenUsage::new(100, 40));
}

#[test]
fn test_token_usage_estimates_missing_side() {
    let usage = Usage {
        prompt_tokens: Some(8),
        completion_tokens: None,
        total_tokens: None,
    };
    let tokens = TokenUsage::from_provider(Some(&usage), "", "12345678");
    assert_eq!(tokens.input_tokens, 8);
    assert_eq!(tokens.output_tokens, 2);
    assert_eq!(tokens.total_tokens, 10);
}

// CompletionRequest tests
#[test]
fn test_completion_request_to_pipe_request() {
    let request = CompletionRequest {
        pipe: "dta-analysis-v1".to_string(),
        messages: vec![Message::system("sys"), Message::user("text")],
        model: "gpt-4o".to_string(),
        temperature: 0.65,
        top_p: 0.95,
        max_tokens: 1500,
        json_output: false,
    };

    let pipe = request.to_pipe_request();
    assert_eq!(pipe.name, "dta-analysis-v1");
    assert_eq!(pipe.model.as_deref(), Some("gpt-4o"));
    assert_eq!(pipe.temperature, Some(0.65));
    assert_eq!(pipe.max_tokens, Some(1500));
    assert_eq!(pipe.json, Some(false));
    assert_eq!(request.prompt_text(), "sys\ntext");
}
