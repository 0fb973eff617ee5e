use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{extract_json_from_completion, SCORE_EPSILON};
use crate::error::{InsightError, InsightResult};
use crate::langbase::{CompletionRequest, LlmProvider, Message};
use crate::pipeline::{JudgeCallTrace, ModelPricing};
use crate::prompts::{criterion_description, JUDGE_SYSTEM_PROMPT};
use crate::storage::{SideScores, Winner};

/// Sampling used for judge calls.
const JUDGE_TEMPERATURE: f64 = 0.0;
const JUDGE_TOP_P: f64 = 1.0;
const JUDGE_MAX_TOKENS: u32 = 1024;

/// Verdict of one judge call.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub winner: Winner,
    /// Every requested criterion is present on both sides.
    pub scores: SideScores,
    pub reasoning: String,
    pub trace: JudgeCallTrace,
}

/// Judge response as the model writes it, before validation.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    scores: Option<HashMap<String, HashMap<String, Value>>>,
    #[serde(default)]
    winner: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Blind judge over a pair of stage outputs.
#[derive(Clone)]
pub struct JudgeClient {
    provider: Arc<dyn LlmProvider>,
    pipe_name: String,
    pricing: ModelPricing,
}

impl JudgeClient {
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

    /// Score `output_a` against `output_b` on each criterion.
    ///
    /// Fails with `UpstreamProvider` when the call fails or the response
    /// cannot be turned into a complete, in-range verdict.
    pub async fn score(
        &self,
        judge_model: &str,
        stage_name: &str,
        output_a: &str,
        output_b: &str,
        criteria: &[String],
    ) -> InsightResult<JudgeVerdict> {
        let request = CompletionRequest {
            pipe: self.pipe_name.clone(),
            messages: vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(build_judge_prompt(stage_name, output_a, output_b, criteria)),
            ],
            model: judge_model.to_string(),
            temperature: JUDGE_TEMPERATURE,
            top_p: JUDGE_TOP_P,
            max_tokens: JUDGE_MAX_TOKENS,
            json_output: true,
        };

        debug!(stage = %stage_name, judge_model = %judge_model, "Requesting judge verdict");

        let start = Instant::now();
        let completion = self.provider.execute(request).await.map_err(|e| {
            warn!(stage = %stage_name, error = %e, "Judge call failed");
            InsightError::UpstreamProvider {
                message: format!("judge call for {} failed: {}", stage_name, e),
            }
        })?;
        let duration_ms = start.elapsed().as_millis() as i64;

        let (winner, scores, reasoning) =
            parse_verdict(&completion.text, criteria).map_err(|reason| {
                warn!(stage = %stage_name, reason = %reason, "Invalid judge response");
                InsightError::UpstreamProvider {
                    message: format!("invalid judge response for {}: {}", stage_name, reason),
                }
            })?;

        let trace = JudgeCallTrace {
            model: judge_model.to_string(),
            usage: completion.usage,
            cost: self.pricing.cost(judge_model, &completion.usage),
            duration_ms,
        };

        debug!(
            stage = %stage_name,
            winner = %winner,
            total_tokens = trace.usage.total_tokens,
            "Judge verdict received"
        );

        Ok(JudgeVerdict {
            winner,
            scores,
            reasoning,
            trace,
        })
    }
}

/// User message for one judge call. Only the labels "A" and "B" identify the outputs.
pub fn build_judge_prompt(
    stage_name: &str,
    output_a: &str,
    output_b: &str,
    criteria: &[String],
) -> String {
    let criteria_lines: Vec<String> = criteria
        .iter()
        .map(|c| match criterion_description(c) {
            Some(description) => format!("- {}: {}", c, description),
            None => format!("- {}", c),
        })
        .collect();

    format!(
        "Task: {}\n\nCriteria:\n{}\n\n=== Output A ===\n{}\n=== End of Output A ===\n\n=== Output B ===\n{}\n=== End of Output B ===",
        stage_name,
        criteria_lines.join("\n"),
        output_a,
        output_b
    )
}

/// Winner implied by two score totals.
pub fn winner_from_totals(total_a: f64, total_b: f64) -> Winner {
    if (total_a - total_b).abs() <= SCORE_EPSILON {
        Winner::Tie
    } else if total_a > total_b {
        Winner::A
    } else {
        Winner::B
    }
}

/// Validate and normalize a judge completion.
fn parse_verdict(text: &str, criteria: &[String]) -> Result<(Winner, SideScores, String), String> {
    let json = extract_json_from_completion(text)?;
    let raw: RawVerdict =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON: {}", e))?;

    let sides = raw
        .scores
        .as_ref()
        .ok_or_else(|| "judge response has no scores".to_string())?;
    let side = |label: &str| {
        sides
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(label))
            .map(|(_, scores)| scores)
            .ok_or_else(|| format!("judge response has no scores for side {}", label))
    };

    let scores = SideScores {
        a: normalize_side(side("A")?, criteria, "A")?,
        b: normalize_side(side("B")?, criteria, "B")?,
    };

    let winner = match raw.winner.as_deref().map(str::trim) {
        Some(w) if !w.is_empty() => w.parse::<Winner>()?,
        _ => winner_from_totals(scores.total_a(), scores.total_b()),
    };

    let reasoning = raw
        .reasoning
        .map(|r| r.trim().to_string())
        .unwrap_or_default();

    Ok((winner, scores, reasoning))
}

/// Map a side's raw scores onto the requested criteria.
///
/// Keys match case-insensitively; absent criteria become explicit `None`.
fn normalize_side(
    raw: &HashMap<String, Value>,
    criteria: &[String],
    label: &str,
) -> Result<BTreeMap<String, Option<f64>>, String> {
    let mut normalized = BTreeMap::new();

    for criterion in criteria {
        let value = raw
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(criterion))
            .map(|(_, v)| v);

        let score = match value {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let score = n
                    .as_f64()
                    .ok_or_else(|| format!("score {}.{} is not a number", label, criterion))?;
                if !(0.0..=1.0).contains(&score) {
                    return Err(format!(
                        "score {}.{} = {} is outside [0, 1]",
                        label, criterion, score
                    ));
                }
                Some(score)
            }
            Some(other) => {
                return Err(format!(
                    "score {}.{} is not a number: {}",
                    label, criterion, other
                ));
            }
        };

        normalized.insert(criterion.clone(), score);
    }

    Ok(normalized)
}
