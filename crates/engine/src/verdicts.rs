use std::sync::Arc;

use claimcheck_common::types::{ClaimDetail, Evidence, Factuality, Relationship, TrustLevel};
use serde_json::json;

use crate::embeddings::{embed_one, Embedder};
use crate::store::{NewVectorEntry, VectorIndex};

pub const CACHED_EVIDENCE_TEXT: &str =
    "[CACHED KNOWLEDGE] This claim was previously verified by this system.";
pub const CACHED_EVIDENCE_URL: &str = "Internal Knowledge Base (Historical Data)";

const NO_STORED_REASONING: &str = "No reasoning stored.";
const REASONING_ITEM_CHARS: usize = 200;
const REASONING_TOTAL_CHARS: usize = 1000;

/// A previously verified claim close enough to reuse.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedVerdict {
    /// Single CACHED evidence item carrying the stored reasoning.
    pub evidence: Evidence,
    pub factuality: f64,
    pub distance: f64,
}

/// Knowledge base of verified claims, keyed by claim embedding.
#[derive(Clone)]
pub struct VerdictStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    max_distance: f64,
}

impl VerdictStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        max_distance: f64,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            max_distance,
        }
    }

    /// Nearest stored verdict strictly within the distance threshold.
    /// Lookup failures are treated as a miss.
    pub async fn lookup(&self, claim: &str) -> Option<CachedVerdict> {
        let embedding = match embed_one(self.embedder.as_ref(), claim).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Claim embedding failed, skipping verdict cache");
                return None;
            }
        };

        let hit = match self.index.query(&self.collection, &embedding, 1).await {
            Ok(hits) => hits.into_iter().next()?,
            Err(e) => {
                tracing::warn!(error = %e, "Verdict cache lookup failed, treating as miss");
                return None;
            }
        };
        if hit.distance >= self.max_distance {
            return None;
        }
        let factuality = hit.metadata.get("factuality").and_then(|f| f.as_f64())?;
        let reasoning = hit
            .metadata
            .get("reasoning")
            .and_then(|r| r.as_str())
            .filter(|r| !r.is_empty())
            .unwrap_or(NO_STORED_REASONING);

        metrics::counter!("verdicts.cache.hit").increment(1);
        tracing::info!(
            claim = %claim,
            cached = %hit.document,
            distance = hit.distance,
            "Reusing verified claim"
        );

        let mut evidence = Evidence::new(claim, CACHED_EVIDENCE_TEXT, CACHED_EVIDENCE_URL, TrustLevel::High);
        evidence.label(Relationship::Cached, reasoning);
        Some(CachedVerdict {
            evidence,
            factuality,
            distance: hit.distance,
        })
    }

    /// Store every freshly verified claim with a numeric factuality and at
    /// least one evidence item. Returns the number written.
    pub async fn store(&self, details: &[ClaimDetail]) -> claimcheck_common::Result<usize> {
        let worth_keeping: Vec<(&ClaimDetail, f64)> = details
            .iter()
            .filter(|d| !d.evidences.is_empty() && !is_cached(d))
            .filter_map(|d| match d.factuality {
                Factuality::Score(s) => Some((d, s)),
                _ => None,
            })
            .collect();
        if worth_keeping.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = worth_keeping.iter().map(|(d, _)| d.claim.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let entries: Vec<NewVectorEntry> = worth_keeping
            .iter()
            .zip(texts)
            .zip(embeddings)
            .map(|(((detail, factuality), text), embedding)| NewVectorEntry {
                embedding,
                document: text,
                metadata: json!({
                    "factuality": factuality,
                    "reasoning": combined_reasoning(&detail.evidences),
                }),
            })
            .collect();
        let count = entries.len();
        self.index.add(&self.collection, entries).await?;
        metrics::counter!("verdicts.stored").increment(count as u64);
        Ok(count)
    }
}

fn is_cached(detail: &ClaimDetail) -> bool {
    detail
        .evidences
        .iter()
        .any(|e| e.relationship == Some(Relationship::Cached))
}

/// Per-item reasoning truncated and joined with " || ", capped overall.
pub fn combined_reasoning(evidences: &[Evidence]) -> String {
    let joined = evidences
        .iter()
        .filter_map(|e| e.reasoning.as_deref())
        .filter(|r| !r.is_empty())
        .map(|r| r.chars().take(REASONING_ITEM_CHARS).collect::<String>())
        .collect::<Vec<_>>()
        .join(" || ");
    joined.chars().take(REASONING_TOTAL_CHARS).collect()
}
