use std::collections::HashMap;
use std::sync::Arc;

use claimcheck_common::types::CheckworthyDecision;

use crate::config::render_prompt;
use crate::llm::{ParseError, StageClient, UsageMeter};

/// Reason recorded for every claim when no valid classification came back.
pub const CHECKWORTHY_FAILED_REASON: &str = "No (Failed to get a valid response from LLM)";

/// One decision per input claim, in input order.
#[derive(Clone, Debug, Default)]
pub struct CheckworthyOutcome {
    pub decisions: Vec<CheckworthyDecision>,
    /// Set when attempts were exhausted and every claim fell back to "no".
    pub failed: bool,
}

/// Batched yes/no classification of claims.
pub struct CheckworthyClassifier {
    llm: Arc<StageClient>,
    prompt: String,
    attempts: u32,
}

fn normalize(key: &str) -> String {
    let key = key.trim();
    let key = match key.split_once(". ") {
        Some((n, rest)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => key,
    };
    key.trim().to_lowercase()
}

/// Map every claim to its answer, or reject the response if any claim is
/// missing or its answer is not yes/no-prefixed.
fn match_answers(
    claims: &[String],
    answers: HashMap<String, String>,
) -> Result<Vec<CheckworthyDecision>, ParseError> {
    let normalized: HashMap<String, &String> =
        answers.iter().map(|(k, v)| (normalize(k), v)).collect();

    claims
        .iter()
        .map(|claim| {
            let answer = answers
                .get(claim)
                .or_else(|| normalized.get(&normalize(claim)).copied())
                .ok_or_else(|| ParseError(format!("no checkworthy answer for claim: {claim}")))?;
            let lowered = answer.trim_start().to_lowercase();
            let checkworthy = if lowered.starts_with("yes") {
                true
            } else if lowered.starts_with("no") {
                false
            } else {
                return Err(ParseError(format!("answer is not yes/no: {answer}")));
            };
            Ok(CheckworthyDecision {
                claim: claim.clone(),
                checkworthy,
                reason: answer.trim().to_string(),
            })
        })
        .collect()
}

impl CheckworthyClassifier {
    pub fn new(llm: Arc<StageClient>, prompt: impl Into<String>, attempts: u32) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            attempts,
        }
    }

    pub async fn classify(&self, claims: &[String], meter: &UsageMeter) -> CheckworthyOutcome {
        if claims.is_empty() {
            return CheckworthyOutcome::default();
        }

        let listing = claims
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}", i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render_prompt(&self.prompt, &[("claims", &listing)]);

        let result = self
            .llm
            .complete_structured(
                "",
                &prompt,
                self.attempts,
                meter,
                |answers: HashMap<String, String>| match_answers(claims, answers),
            )
            .await;

        match result {
            Ok(decisions) => {
                let checkworthy = decisions.iter().filter(|d| d.checkworthy).count();
                tracing::info!(claims = claims.len(), checkworthy, "Classified checkworthiness");
                CheckworthyOutcome {
                    decisions,
                    failed: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    claims = claims.len(),
                    error = %e,
                    "Checkworthy classification failed, marking every claim not checkworthy"
                );
                CheckworthyOutcome {
                    decisions: claims
                        .iter()
                        .map(|c| CheckworthyDecision {
                            claim: c.clone(),
                            checkworthy: false,
                            reason: CHECKWORTHY_FAILED_REASON.to_string(),
                        })
                        .collect(),
                    failed: true,
                }
            }
        }
    }
}
