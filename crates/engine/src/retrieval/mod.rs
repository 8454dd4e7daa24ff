mod chunking;
mod rerank;
mod web;

use std::collections::HashSet;
use std::sync::Arc;

use claimcheck_common::config::RetrievalConfig;
use claimcheck_common::types::{ClaimQueries, Evidence, TrustLevel};
use serde_json::json;

use crate::embeddings::{embed_one, Embedder};
use crate::fanout::fan_out;
use crate::llm::UsageMeter;
use crate::screening::MetadataAnalyzer;
use crate::store::{NewVectorEntry, VectorIndex};

pub use chunking::{chunk_text, select_non_overlapping, split_sentences, Passage};
pub use rerank::{
    EmbeddingReranker, FallbackReranker, HttpReranker, LexicalReranker, PassageReranker,
    RerankError,
};
pub use web::{FetchServiceClient, WebError, WebSearch};

#[cfg(test)]
pub(crate) use web::mock;

/// URL recorded for semantic-cache passages stored without a source.
const UNKNOWN_SOURCE: &str = "Internal Knowledge Base";

/// Distance-indexed store of previously ingested passages.
#[derive(Clone)]
pub struct SemanticCache {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub collection: String,
}

/// A reranked passage from a live page.
#[derive(Clone, Debug)]
struct LivePassage {
    url: String,
    text: String,
    score: f64,
}

/// Evidence gathered for one claim before trust screening, with the live
/// passages it came from.
struct Gathered {
    evidences: Vec<Evidence>,
    live: Vec<LivePassage>,
}

/// Semantic cache first, live web search for the remaining slots, then a
/// batched trust screen that discards low-trust sources.
pub struct HybridRetriever {
    cache: Option<SemanticCache>,
    web: Option<Arc<dyn WebSearch>>,
    reranker: Arc<dyn PassageReranker>,
    metadata: Arc<MetadataAnalyzer>,
    config: RetrievalConfig,
    concurrency: usize,
}

impl HybridRetriever {
    pub fn new(
        cache: Option<SemanticCache>,
        web: Option<Arc<dyn WebSearch>>,
        reranker: Arc<dyn PassageReranker>,
        metadata: Arc<MetadataAnalyzer>,
        config: RetrievalConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            cache,
            web,
            reranker,
            metadata,
            config,
            concurrency,
        }
    }

    /// Evidence per claim, aligned with `claims`.
    pub async fn retrieve(&self, claims: &[ClaimQueries], meter: &UsageMeter) -> Vec<Vec<Evidence>> {
        if claims.is_empty() {
            return Vec::new();
        }

        let gathered = fan_out(claims, self.concurrency, |q| self.gather(q)).await;

        let urls: Vec<String> = gathered
            .iter()
            .flat_map(|g| g.evidences.iter())
            .map(|e| e.url.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let trust = self.metadata.resolve_urls(&urls, meter).await;

        gathered
            .into_iter()
            .zip(claims)
            .map(|(gathered, q)| {
                let before = gathered.evidences.len();
                let kept: Vec<Evidence> = gathered
                    .evidences
                    .into_iter()
                    .filter_map(|mut e| {
                        let resolved = trust.get(&e.url).copied().unwrap_or_default();
                        if resolved == TrustLevel::Low {
                            tracing::warn!(url = %e.url, "Discarding evidence from low-trust source");
                            return None;
                        }
                        if e.trust_level != TrustLevel::High {
                            e.trust_level = resolved;
                        }
                        Some(e)
                    })
                    .collect();

                // Cache hits are served as high trust; only high sources go in.
                let trusted: Vec<LivePassage> = gathered
                    .live
                    .into_iter()
                    .filter(|p| trust.get(&p.url) == Some(&TrustLevel::High))
                    .collect();
                self.write_back(&q.claim, trusted);

                tracing::info!(
                    claim = %q.claim,
                    evidences = kept.len(),
                    discarded = before - kept.len(),
                    "Retrieved evidence"
                );
                kept
            })
            .collect()
    }

    async fn gather(&self, queries: &ClaimQueries) -> Gathered {
        let mut evidences = self.lookup_cache(queries).await;
        let mut live = Vec::new();

        if evidences.len() < self.config.target_evidence_count {
            if let Some(web) = &self.web {
                live = self.search_live(web.as_ref(), queries).await;
                evidences.extend(live.iter().map(|p| {
                    Evidence::new(&queries.claim, p.text.clone(), p.url.clone(), TrustLevel::Unknown)
                }));
            }
        }

        Gathered {
            evidences: dedup_by_url(evidences),
            live,
        }
    }

    async fn lookup_cache(&self, queries: &ClaimQueries) -> Vec<Evidence> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };

        let embedding = match embed_one(cache.embedder.as_ref(), queries.primary()).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, skipping semantic cache");
                return Vec::new();
            }
        };

        let hits = match cache
            .index
            .query(&cache.collection, &embedding, self.config.target_evidence_count)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Semantic cache lookup failed, treating as miss");
                return Vec::new();
            }
        };

        let accepted: Vec<Evidence> = hits
            .into_iter()
            .filter(|h| h.distance <= self.config.cache_distance_threshold)
            .map(|h| {
                let url = h
                    .metadata
                    .get("source")
                    .and_then(|s| s.as_str())
                    .unwrap_or(UNKNOWN_SOURCE)
                    .to_string();
                // Curated entries carry no tier and are trusted as-is.
                let trust_level = h
                    .metadata
                    .get("trust_level")
                    .and_then(|t| serde_json::from_value(t.clone()).ok())
                    .unwrap_or(TrustLevel::High);
                Evidence::new(&queries.claim, h.document, url, trust_level)
            })
            .collect();

        if !accepted.is_empty() {
            metrics::counter!("retrieval.cache.hit").increment(accepted.len() as u64);
        }
        accepted
    }

    /// Top passages per query, assembled round-robin across queries.
    async fn search_live(&self, web: &dyn WebSearch, queries: &ClaimQueries) -> Vec<LivePassage> {
        let per_query = fan_out(&queries.queries, self.concurrency, |query| {
            self.passages_for_query(web, query)
        })
        .await;

        round_robin(per_query, self.config.max_passages_per_claim)
    }

    async fn passages_for_query(&self, web: &dyn WebSearch, query: &str) -> Vec<LivePassage> {
        let urls = match web
            .search(query, self.config.max_search_results_per_query)
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(query, error = %e, "Web search failed");
                return Vec::new();
            }
        };

        let per_url = fan_out(urls, self.concurrency, |url| async move {
            let text = match web.fetch_text(&url).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Skipping unfetchable page");
                    return Vec::new();
                }
            };
            self.rank_page(query, url, &text).await
        })
        .await;

        let mut passages: Vec<LivePassage> = per_url.into_iter().flatten().collect();
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(self.config.max_passages_per_url);
        passages
    }

    async fn rank_page(&self, query: &str, url: String, text: &str) -> Vec<LivePassage> {
        let passages = chunk_text(
            text,
            self.config.sentences_per_passage,
            self.config.sliding_distance,
            self.config.min_sentence_chars,
            self.config.max_sentence_chars,
        );
        if passages.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let scores = match self.reranker.score(query, &texts).await {
            Ok(scores) if scores.len() == passages.len() => scores,
            Ok(_) | Err(_) => {
                tracing::warn!(url = %url, "Passage reranking failed, skipping page");
                return Vec::new();
            }
        };

        select_non_overlapping(
            passages.into_iter().zip(scores).collect(),
            self.config.max_passages_per_url,
        )
        .into_iter()
        .map(|(p, score)| LivePassage {
            url: url.clone(),
            text: p.text,
            score,
        })
        .collect()
    }

    /// Append trust-screened live passages to the semantic cache in the
    /// background.
    fn write_back(&self, claim: &str, passages: Vec<LivePassage>) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        if passages.is_empty() {
            return;
        }
        let claim = claim.to_string();

        tokio::spawn(async move {
            let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
            let embeddings = match cache.embedder.embed(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping semantic cache write-back");
                    return;
                }
            };
            let entries = passages
                .into_iter()
                .zip(embeddings)
                .map(|(p, embedding)| NewVectorEntry {
                    embedding,
                    document: p.text,
                    metadata: json!({
                        "source": p.url,
                        "claim": claim,
                        "trust_level": TrustLevel::High,
                    }),
                })
                .collect();
            if let Err(e) = cache.index.add(&cache.collection, entries).await {
                tracing::warn!(error = %e, "Semantic cache write-back failed");
            }
        });
    }
}

fn round_robin(per_query: Vec<Vec<LivePassage>>, cap: usize) -> Vec<LivePassage> {
    let mut out = Vec::new();
    let rounds = per_query.iter().map(Vec::len).max().unwrap_or(0);
    for round in 0..rounds {
        for list in &per_query {
            if out.len() >= cap {
                return out;
            }
            if let Some(p) = list.get(round) {
                out.push(p.clone());
            }
        }
    }
    out
}

/// Keep the first evidence item per URL.
pub fn dedup_by_url(evidences: Vec<Evidence>) -> Vec<Evidence> {
    let mut seen = HashSet::new();
    evidences
        .into_iter()
        .filter(|e| seen.insert(e.url.clone()))
        .collect()
}
