use std::collections::HashMap;
use std::sync::Arc;

use claimcheck_common::types::{AdvisorLabel, AdvisorPrior, ClaimDetail, ScreeningLesson};
use serde_json::json;

use crate::embeddings::{embed_one, Embedder};
use crate::store::{NewVectorEntry, VectorIndex};

/// Characters of a document embedded for screening memory.
const MAX_EMBED_CHARS: usize = 2000;

fn embed_text(text: &str) -> String {
    text.chars().take(MAX_EMBED_CHARS).collect()
}

/// Nearest-neighbour memory of past screening outcomes.
pub struct ScreeningAdvisor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    neighbours: usize,
    max_distance: f64,
}

impl ScreeningAdvisor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
        neighbours: usize,
        max_distance: f64,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            neighbours,
            max_distance,
        }
    }

    /// Majority label of close past documents. Ties go to the label of the
    /// nearest voter. `None` when memory is empty, unreachable or too far.
    pub async fn prior(&self, text: &str) -> Option<AdvisorPrior> {
        let embedding = match embed_one(self.embedder.as_ref(), &embed_text(text)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Advisor embedding failed");
                return None;
            }
        };

        let hits = match self
            .index
            .query(&self.collection, &embedding, self.neighbours)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Advisor memory lookup failed, treating as miss");
                return None;
            }
        };

        // (votes, nearest distance) per label
        let mut tally: HashMap<AdvisorLabel, (usize, f64)> = HashMap::new();
        let mut consulted = 0;
        for hit in hits.iter().filter(|h| h.distance <= self.max_distance) {
            let Some(label) = hit
                .metadata
                .get("label")
                .and_then(|l| l.as_str())
                .and_then(AdvisorLabel::parse)
            else {
                continue;
            };
            consulted += 1;
            let entry = tally.entry(label).or_insert((0, f64::INFINITY));
            entry.0 += 1;
            entry.1 = entry.1.min(hit.distance);
        }

        let (label, (votes, _)) = tally
            .iter()
            .max_by(|(_, a), (_, b)| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)))?;
        let nearest_distance = tally
            .values()
            .map(|(_, d)| *d)
            .fold(f64::INFINITY, f64::min);

        Some(AdvisorPrior {
            label: *label,
            votes: *votes,
            neighbours: consulted,
            nearest_distance,
        })
    }

    /// Embed lessons and append them to screening memory.
    pub async fn remember(&self, lessons: &[ScreeningLesson]) -> claimcheck_common::Result<usize> {
        if lessons.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = lessons.iter().map(|l| embed_text(&l.text)).collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let entries: Vec<NewVectorEntry> = lessons
            .iter()
            .zip(texts)
            .zip(embeddings)
            .map(|((lesson, text), embedding)| NewVectorEntry {
                embedding,
                document: text,
                metadata: json!({
                    "label": lesson.label.as_str(),
                    "lesson_id": lesson.id.to_string(),
                    "recorded_at": lesson.recorded_at.to_rfc3339(),
                }),
            })
            .collect();
        let count = entries.len();
        self.index.add(&self.collection, entries).await?;
        Ok(count)
    }
}

/// Coarse label of a finished check, used to teach the advisor.
pub fn infer_label(details: &[ClaimDetail], screened_out: bool) -> AdvisorLabel {
    if screened_out || details.is_empty() {
        AdvisorLabel::NoClaims
    } else if details.iter().any(|d| d.checkworthy) {
        AdvisorLabel::Verifiable
    } else {
        AdvisorLabel::Opinion
    }
}

#[cfg(test)]
mod tests {
    use claimcheck_common::types::Factuality;

    use super::*;
    use crate::embeddings::mock::FixedEmbedder;
    use crate::store::MemoryVectorIndex;

    fn advisor(embedder: FixedEmbedder, index: Arc<MemoryVectorIndex>) -> ScreeningAdvisor {
        ScreeningAdvisor::new(Arc::new(embedder), index, "screening_memory", 5, 0.3)
    }

    fn detail(checkworthy: bool) -> ClaimDetail {
        ClaimDetail {
            id: 0,
            claim: "c".into(),
            checkworthy,
            checkworthy_reason: String::new(),
            queries: vec![],
            evidences: vec![],
            factuality: Factuality::NothingToCheck,
        }
    }

    #[tokio::test]
    async fn test_remember_then_prior() {
        let embedder = FixedEmbedder::with(&[
            ("vaccines cause magnetism", vec![1.0, 0.0, 0.0]),
            ("vaccine magnet claims", vec![0.95, 0.05, 0.0]),
            ("i love autumn", vec![0.0, 1.0, 0.0]),
            ("magnetic vaccine rumour", vec![0.9, 0.1, 0.0]),
        ]);
        let index = Arc::new(MemoryVectorIndex::new());
        let advisor = advisor(embedder, index.clone());

        let stored = advisor
            .remember(&[
                ScreeningLesson::new("vaccines cause magnetism", AdvisorLabel::Verifiable),
                ScreeningLesson::new("vaccine magnet claims", AdvisorLabel::Verifiable),
                ScreeningLesson::new("i love autumn", AdvisorLabel::Opinion),
            ])
            .await
            .unwrap();
        assert_eq!(stored, 3);
        assert_eq!(index.count("screening_memory"), 3);

        let prior = advisor.prior("magnetic vaccine rumour").await.unwrap();
        assert_eq!(prior.label, AdvisorLabel::Verifiable);
        assert_eq!(prior.votes, 2);
        assert_eq!(prior.neighbours, 2);
        assert!(prior.nearest_distance < 0.05);
    }

    #[tokio::test]
    async fn test_prior_none_when_memory_empty() {
        let advisor = advisor(FixedEmbedder::default(), Arc::new(MemoryVectorIndex::new()));
        assert!(advisor.prior("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_prior_none_when_embedding_fails() {
        let advisor = advisor(FixedEmbedder::failing(), Arc::new(MemoryVectorIndex::new()));
        assert!(advisor.prior("anything").await.is_none());
    }

    #[test]
    fn test_infer_label() {
        assert_eq!(infer_label(&[], false), AdvisorLabel::NoClaims);
        assert_eq!(infer_label(&[detail(true)], true), AdvisorLabel::NoClaims);
        assert_eq!(
            infer_label(&[detail(false), detail(true)], false),
            AdvisorLabel::Verifiable
        );
        assert_eq!(infer_label(&[detail(false)], false), AdvisorLabel::Opinion);
    }
}
