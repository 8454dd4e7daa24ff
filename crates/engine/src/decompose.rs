use std::sync::Arc;

use claimcheck_common::types::ArgumentGraph;

use crate::config::render_prompt;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::llm::{ParseError, StageClient, UsageMeter};

/// Decomposed document: the pruned argument graph and its unique claims
/// in node order.
#[derive(Clone, Debug, Default)]
pub struct Decomposition {
    pub graph: ArgumentGraph,
    pub claims: Vec<String>,
}

/// LLM decomposition of a document into a claim/entity graph, followed by
/// near-duplicate claim removal.
pub struct Decomposer {
    llm: Arc<StageClient>,
    embedder: Option<Arc<dyn Embedder>>,
    prompt: String,
    attempts: u32,
    dedup_threshold: f64,
}

impl Decomposer {
    pub fn new(
        llm: Arc<StageClient>,
        embedder: Option<Arc<dyn Embedder>>,
        prompt: impl Into<String>,
        attempts: u32,
        dedup_threshold: f64,
    ) -> Self {
        Self {
            llm,
            embedder,
            prompt: prompt.into(),
            attempts,
            dedup_threshold,
        }
    }

    /// Never fails: after exhausting attempts the graph is empty.
    pub async fn decompose(&self, text: &str, meter: &UsageMeter) -> Decomposition {
        let mut graph = self.create_graph(text, meter).await;

        let dropped = graph.drop_dangling_edges();
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped graph edges referencing unknown nodes");
        }

        let candidates = graph.claims();
        let claims = self.dedup_claims(&candidates).await;
        if claims.len() < candidates.len() {
            tracing::info!(
                before = candidates.len(),
                after = claims.len(),
                "Deduplicated decomposed claims"
            );
            graph.retain_claims(&claims);
        }

        Decomposition { graph, claims }
    }

    async fn create_graph(&self, text: &str, meter: &UsageMeter) -> ArgumentGraph {
        let prompt = render_prompt(&self.prompt, &[("document", text)]);
        let result = self
            .llm
            .complete_structured("", &prompt, self.attempts, meter, |graph: ArgumentGraph| {
                if graph.nodes.iter().any(|n| n.label.trim().is_empty()) {
                    return Err(ParseError("graph node with empty label".into()));
                }
                Ok(graph)
            })
            .await;

        match result {
            Ok(graph) => {
                tracing::info!(
                    nodes = graph.nodes.len(),
                    edges = graph.edges.len(),
                    "Created argument graph"
                );
                graph
            }
            Err(e) => {
                tracing::warn!(
                    attempts = self.attempts,
                    error = %e,
                    "Failed to create argument graph, returning empty graph"
                );
                ArgumentGraph::default()
            }
        }
    }

    /// Longest-first greedy dedup; survivors keep their original order.
    /// Exact (case-insensitive) repeats always collapse. Near duplicates are
    /// detected by embedding similarity, or Jaro-Winkler when embeddings are
    /// unavailable.
    pub async fn dedup_claims(&self, claims: &[String]) -> Vec<String> {
        let mut unique: Vec<&String> = Vec::new();
        for claim in claims {
            let key = claim.trim().to_lowercase();
            if !unique.iter().any(|u| u.trim().to_lowercase() == key) {
                unique.push(claim);
            }
        }
        if unique.len() < 2 {
            return unique.into_iter().cloned().collect();
        }

        let texts: Vec<String> = unique.iter().map(|c| c.to_string()).collect();
        let embeddings = match &self.embedder {
            Some(embedder) => match embedder.embed(&texts).await {
                Ok(v) if v.len() == texts.len() => Some(v),
                Ok(_) => {
                    tracing::warn!("Embedding count mismatch during claim dedup");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Claim embedding failed, falling back to string similarity");
                    None
                }
            },
            None => None,
        };

        let similarity = |a: usize, b: usize| -> f64 {
            match &embeddings {
                Some(e) => cosine_similarity(&e[a], &e[b]),
                None => strsim::jaro_winkler(&texts[a].to_lowercase(), &texts[b].to_lowercase()),
            }
        };

        let mut order: Vec<usize> = (0..texts.len()).collect();
        order.sort_by(|&a, &b| texts[b].len().cmp(&texts[a].len()));

        let mut kept: Vec<usize> = Vec::new();
        for candidate in order {
            if kept
                .iter()
                .all(|&k| similarity(candidate, k) < self.dedup_threshold)
            {
                kept.push(candidate);
            }
        }
        kept.sort_unstable();

        kept.into_iter().map(|i| texts[i].clone()).collect()
    }
}
