use std::sync::Arc;

use claimcheck_common::types::{Evidence, Relationship};
use serde::{Deserialize, Serialize};

use crate::config::render_prompt;
use crate::fanout::fan_out;
use crate::llm::{ParseError, StageClient, UsageMeter};

/// Reasoning attached to every evidence item of a claim whose verification
/// response could not be parsed.
pub const PARSE_FAILURE_REASONING: &str = "[System Warning] Failed to parse LLM response.";

const NO_REASONING: &str = "[No reasoning provided]";

#[derive(Serialize)]
struct PromptEvidence<'a> {
    id: String,
    text: &'a str,
    trust_level: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    verifications: Vec<Verification>,
}

#[derive(Deserialize)]
struct Verification {
    id: String,
    #[serde(default)]
    reasoning: Option<String>,
    relationship: String,
}

fn evidence_id(index: usize) -> String {
    format!("E{}", index + 1)
}

fn parse_evidence_id(id: &str) -> Option<usize> {
    id.trim()
        .strip_prefix(['E', 'e'])?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

/// Map verifications back onto evidence positions. Every item must receive
/// exactly one SUPPORTS/REFUTES/IRRELEVANT label.
fn map_verifications(
    count: usize,
    response: VerifyResponse,
) -> Result<Vec<(Relationship, String)>, ParseError> {
    let mut labels: Vec<Option<(Relationship, String)>> = vec![None; count];

    for v in response.verifications {
        let index = parse_evidence_id(&v.id)
            .filter(|i| *i < count)
            .ok_or_else(|| ParseError(format!("unknown evidence id: {}", v.id)))?;
        let relationship = Relationship::parse(&v.relationship)
            .filter(|r| *r != Relationship::Cached)
            .ok_or_else(|| ParseError(format!("invalid relationship: {}", v.relationship)))?;
        let reasoning = v
            .reasoning
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| NO_REASONING.to_string());
        labels[index] = Some((relationship, reasoning));
    }

    labels
        .into_iter()
        .enumerate()
        .map(|(i, l)| l.ok_or_else(|| ParseError(format!("no verification for {}", evidence_id(i)))))
        .collect()
}

/// Batched entailment check: one request per claim carrying all of its
/// evidence, claims dispatched concurrently.
pub struct ClaimVerifier {
    llm: Arc<StageClient>,
    prompt: String,
    attempts: u32,
    concurrency: usize,
}

impl ClaimVerifier {
    pub fn new(
        llm: Arc<StageClient>,
        prompt: impl Into<String>,
        attempts: u32,
        concurrency: usize,
    ) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            attempts,
            concurrency,
        }
    }

    /// Label every evidence item of every claim. Output lists have the same
    /// length and order as the input lists.
    pub async fn verify_all(
        &self,
        batches: Vec<(String, Vec<Evidence>)>,
        meter: &UsageMeter,
    ) -> Vec<Vec<Evidence>> {
        fan_out(batches, self.concurrency, |(claim, evidences)| async move {
            self.verify(&claim, evidences, meter).await
        })
        .await
    }

    pub async fn verify(&self, claim: &str, mut evidences: Vec<Evidence>, meter: &UsageMeter) -> Vec<Evidence> {
        if evidences.is_empty() {
            return evidences;
        }

        let items: Vec<PromptEvidence<'_>> = evidences
            .iter()
            .enumerate()
            .map(|(i, e)| PromptEvidence {
                id: evidence_id(i),
                text: &e.text,
                trust_level: e.trust_level.as_str(),
            })
            .collect();
        let evidence_json = match serde_json::to_string_pretty(&items) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize evidence for verification");
                return label_all_irrelevant(evidences);
            }
        };
        let prompt = render_prompt(
            &self.prompt,
            &[("claim", claim), ("evidence", &evidence_json)],
        );

        let count = evidences.len();
        let result = self
            .llm
            .complete_structured("", &prompt, self.attempts, meter, |response: VerifyResponse| {
                map_verifications(count, response)
            })
            .await;

        match result {
            Ok(labels) => {
                for (evidence, (relationship, reasoning)) in evidences.iter_mut().zip(labels) {
                    evidence.label(relationship, reasoning);
                }
                tracing::info!(claim = %claim, evidences = count, "Verified claim");
                evidences
            }
            Err(e) => {
                metrics::counter!("verify.parse_failures").increment(1);
                tracing::warn!(
                    claim = %claim,
                    evidences = count,
                    error = %e,
                    "Verification response unusable, marking evidence irrelevant"
                );
                label_all_irrelevant(evidences)
            }
        }
    }
}

fn label_all_irrelevant(mut evidences: Vec<Evidence>) -> Vec<Evidence> {
    for evidence in &mut evidences {
        evidence.label(Relationship::Irrelevant, PARSE_FAILURE_REASONING);
    }
    evidences
}
