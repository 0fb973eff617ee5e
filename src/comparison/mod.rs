//! Blind pairwise comparison of two analyses.
//!
//! This module provides:
//! - [`JudgeClient`]: one blind judge call scoring outputs "A" and "B"
//! - [`ComparisonService`]: create/get/list/delete of immutable comparisons
//!
//! The judge never learns which model produced which output. Labels follow
//! the caller's argument order so a verdict can be reproduced.

mod judge;
mod service;

pub use judge::*;
pub use service::*;

/// Built-in evaluation criteria, in the order they are reported.
pub const DEFAULT_CRITERIA: [&str; 5] = [
    "groundedness",
    "faithfulness",
    "completeness",
    "clarity",
    "accuracy",
];

/// Largest number of criteria one comparison may use.
pub const MAX_CRITERIA: usize = 10;

/// Longest accepted criterion name.
pub const MAX_CRITERION_CHARS: usize = 64;

/// Score totals closer than this are a tie.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Extract the JSON payload from a judge completion.
///
/// Accepts raw JSON, a fenced ```json block, a plain fenced block, or a
/// single object embedded in prose.
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    // Fast path: raw JSON
    let trimmed = completion.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    if let (Some(start), Some(end)) = (completion.find('{'), completion.rfind('}')) {
        if start < end {
            return Ok(&completion[start..=end]);
        }
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw_object() {
        let result = extract_json_from_completion(r#"{"winner": "A"}"#);
        assert_eq!(result.unwrap(), r#"{"winner": "A"}"#);
    }

    #[test]
    fn test_extract_json_with_whitespace() {
        let result = extract_json_from_completion("  \n  {\"winner\": \"B\"}  \n  ");
        assert_eq!(result.unwrap(), r#"{"winner": "B"}"#);
    }

    #[test]
    fn test_extract_json_from_json_code_block() {
        let input = "Verdict:\n```json\n{\"winner\": \"tie\"}\n```\nDone.";
        assert_eq!(
            extract_json_from_completion(input).unwrap(),
            r#"{"winner": "tie"}"#
        );
    }

    #[test]
    fn test_extract_json_from_plain_code_block() {
        let input = "```\n{\"winner\": \"A\"}\n```";
        assert_eq!(
            extract_json_from_completion(input).unwrap(),
            r#"{"winner": "A"}"#
        );
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let input = "Sure. {\"winner\": \"A\", \"reasoning\": \"x\"} Hope this helps.";
        assert_eq!(
            extract_json_from_completion(input).unwrap(),
            r#"{"winner": "A", "reasoning": "x"}"#
        );
    }

    #[test]
    fn test_extract_json_empty_block() {
        let result = extract_json_from_completion("```json\n\n```");
        assert!(result.unwrap_err().contains("empty or malformed"));
    }

    #[test]
    fn test_extract_json_no_json_found() {
        let result = extract_json_from_completion("A is better.");
        assert!(result.unwrap_err().contains("No JSON found"));
    }
}
