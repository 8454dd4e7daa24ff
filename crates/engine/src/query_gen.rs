use std::sync::Arc;

use claimcheck_common::types::ClaimQueries;
use serde::Deserialize;

use crate::config::render_prompt;
use crate::fanout::fan_out;
use crate::llm::{StageClient, UsageMeter};

#[derive(Deserialize)]
struct QuestionsResponse {
    #[serde(rename = "Questions", alias = "questions")]
    questions: Vec<String>,
}

/// Per-claim search query generation, run concurrently.
pub struct QueryGenerator {
    llm: Arc<StageClient>,
    prompt: String,
    attempts: u32,
    max_queries: usize,
    concurrency: usize,
}

impl QueryGenerator {
    pub fn new(
        llm: Arc<StageClient>,
        prompt: impl Into<String>,
        attempts: u32,
        max_queries: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            llm,
            prompt: prompt.into(),
            attempts,
            max_queries,
            concurrency,
        }
    }

    /// One entry per claim, in claim order. A claim whose generation fails
    /// gets only itself as a query.
    pub async fn generate(&self, claims: &[String], meter: &UsageMeter) -> Vec<ClaimQueries> {
        if claims.is_empty() {
            return Vec::new();
        }
        tracing::info!(claims = claims.len(), "Generating search queries");
        fan_out(claims, self.concurrency, |claim| self.generate_one(claim, meter)).await
    }

    async fn generate_one(&self, claim: &str, meter: &UsageMeter) -> ClaimQueries {
        let prompt = render_prompt(&self.prompt, &[("claim", claim)]);
        let result = self
            .llm
            .complete_json::<QuestionsResponse>("", &prompt, self.attempts, meter)
            .await;

        let questions = match result {
            Ok(response) => response.questions,
            Err(e) => {
                tracing::warn!(claim = %claim, error = %e, "Query generation failed, using claim only");
                return ClaimQueries::claim_only(claim);
            }
        };

        let mut queries = vec![claim.to_string()];
        for question in questions {
            if queries.len() >= self.max_queries.max(1) {
                break;
            }
            let question = question.trim();
            if question.is_empty() || queries.iter().any(|q| q.eq_ignore_ascii_case(question)) {
                continue;
            }
            queries.push(question.to_string());
        }

        ClaimQueries {
            claim: claim.to_string(),
            queries,
        }
    }
}
