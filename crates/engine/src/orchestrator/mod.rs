mod aggregate;
mod progress;

use std::sync::Arc;
use std::time::Instant;

use claimcheck_common::types::{
    AdvisorLabel, ArgumentGraph, CheckworthyDecision, ClaimDetail, DocumentSummary, FactCheckReport, PipelineUsage,
    RawDocument, ReportStatus, ScreeningLesson, Stage, SummaryFactuality,
    WARNING_CHECKWORTHY_FAILED,
};
use tracing::Instrument;

use crate::checkworthy::CheckworthyClassifier;
use crate::coref::CoreferenceResolver;
use crate::decompose::{Decomposer, Decomposition};
use crate::fanout::fan_out;
use crate::llm::UsageMeter;
use crate::query_gen::QueryGenerator;
use crate::queue::LessonSink;
use crate::retrieval::HybridRetriever;
use crate::screening::{infer_label, ScreeningGate};
use crate::verdicts::{CachedVerdict, VerdictStore};
use crate::verify::ClaimVerifier;

pub use aggregate::{
    build_details, claim_factuality, summarize, ClaimOutcome, REFUTED_AT, SUPPORTED_AT,
};
pub use progress::ProgressSender;

/// The pipeline's stage components, in execution order.
pub struct PipelineStages {
    pub screening: ScreeningGate,
    pub coreference: CoreferenceResolver,
    pub decomposer: Decomposer,
    pub checkworthy: CheckworthyClassifier,
    pub query_generator: QueryGenerator,
    pub retriever: HybridRetriever,
    pub verifier: ClaimVerifier,
}

/// Model names reported in per-stage usage.
#[derive(Clone, Debug, Default)]
pub struct StageModels {
    /// Screening, coreference and source credibility share one role.
    pub screening: String,
    pub decomposer: String,
    pub checkworthy: String,
    pub query_generator: String,
    pub claimverify: String,
}

/// Drives one document through screening, decomposition, checking,
/// retrieval and verification, then aggregates the report.
///
/// Stages run in sequence; work inside a stage fans out. Learning-loop
/// writes happen in the background and never affect the report.
pub struct FactChecker {
    stages: PipelineStages,
    models: StageModels,
    verdicts: Option<VerdictStore>,
    lessons: Option<Arc<dyn LessonSink>>,
    concurrency: usize,
}

impl FactChecker {
    pub fn new(
        stages: PipelineStages,
        models: StageModels,
        verdicts: Option<VerdictStore>,
        lessons: Option<Arc<dyn LessonSink>>,
        concurrency: usize,
    ) -> Self {
        Self {
            stages,
            models,
            verdicts,
            lessons,
            concurrency,
        }
    }

    pub async fn check(&self, document: &RawDocument, progress: &ProgressSender) -> FactCheckReport {
        let span = tracing::info_span!("fact_check", document_id = %document.id);
        self.run(document, progress).instrument(span).await
    }

    async fn run(&self, document: &RawDocument, progress: &ProgressSender) -> FactCheckReport {
        metrics::counter!("pipeline.documents").increment(1);
        let screening_meter = UsageMeter::new(&self.models.screening);

        progress.emit(Stage::Screening, "Screening source and writing style");
        let started = Instant::now();
        let screening = self.stages.screening.screen(document, &screening_meter).await;
        observe(Stage::Screening, started);

        if let Some(warning) = screening.warning.clone() {
            tracing::warn!(
                domain = screening.domain.as_deref().unwrap_or("-"),
                "Document screened out"
            );
            progress.emit(Stage::Done, "Screened out before claim extraction");
            self.learn(&document.text, AdvisorLabel::NoClaims);
            return FactCheckReport {
                document_id: document.id,
                raw_text: document.text.clone(),
                token_count: document.token_count(),
                usage: PipelineUsage {
                    screening: screening_meter.snapshot(),
                    ..PipelineUsage::default()
                },
                claim_detail: Vec::new(),
                summary: DocumentSummary::empty(SummaryFactuality::Message(warning)),
                sag: ArgumentGraph::default(),
                status: ReportStatus::ScreenedOut,
                screening,
                warnings: Vec::new(),
            };
        }

        progress.emit(Stage::Coreference, "Resolving coreferences");
        let started = Instant::now();
        let resolved = self
            .stages
            .coreference
            .resolve(&document.text, &screening_meter)
            .await;
        observe(Stage::Coreference, started);

        progress.emit(Stage::Decomposing, "Extracting claims");
        let decomposer_meter = UsageMeter::new(&self.models.decomposer);
        let started = Instant::now();
        let Decomposition { graph, claims } = self
            .stages
            .decomposer
            .decompose(&resolved, &decomposer_meter)
            .await;
        observe(Stage::Decomposing, started);
        if claims.is_empty() {
            progress.emit(Stage::Decomposing, "No verifiable claims found");
        }

        progress.emit(
            Stage::Checkworthy,
            format!("Classifying {} claims", claims.len()),
        );
        let checkworthy_meter = UsageMeter::new(&self.models.checkworthy);
        let started = Instant::now();
        let classified = self
            .stages
            .checkworthy
            .classify(&claims, &checkworthy_meter)
            .await;
        observe(Stage::Checkworthy, started);

        let mut warnings = Vec::new();
        if classified.failed {
            warnings.push(WARNING_CHECKWORTHY_FAILED.to_string());
        }

        let mut outcomes: Vec<ClaimOutcome> =
            classified.decisions.iter().map(|_| ClaimOutcome::Skipped).collect();
        let checkworthy: Vec<usize> = classified
            .decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.checkworthy)
            .map(|(i, _)| i)
            .collect();

        let mut to_check = Vec::new();
        let cached = self.lookup_verdicts(&classified.decisions, &checkworthy).await;
        for (i, hit) in checkworthy.into_iter().zip(cached) {
            match hit {
                Some(verdict) => {
                    outcomes[i] = ClaimOutcome::Reused {
                        evidence: verdict.evidence,
                        factuality: verdict.factuality,
                    }
                }
                None => to_check.push(i),
            }
        }
        let claims_to_check: Vec<String> = to_check
            .iter()
            .map(|i| classified.decisions[*i].claim.clone())
            .collect();

        let query_meter = UsageMeter::new(&self.models.query_generator);
        let retrieval_meter = UsageMeter::new(&self.models.screening);
        let verify_meter = UsageMeter::new(&self.models.claimverify);

        if !claims_to_check.is_empty() {
            progress.emit(
                Stage::QueryGeneration,
                format!("Generating queries for {} claims", claims_to_check.len()),
            );
            let started = Instant::now();
            let queries = self
                .stages
                .query_generator
                .generate(&claims_to_check, &query_meter)
                .await;
            observe(Stage::QueryGeneration, started);

            progress.emit(Stage::Retrieval, "Gathering evidence");
            let started = Instant::now();
            let evidences = self
                .stages
                .retriever
                .retrieve(&queries, &retrieval_meter)
                .await;
            observe(Stage::Retrieval, started);

            progress.emit(Stage::Verification, "Verifying evidence");
            let started = Instant::now();
            let verified = self
                .stages
                .verifier
                .verify_all(
                    claims_to_check.into_iter().zip(evidences).collect(),
                    &verify_meter,
                )
                .await;
            observe(Stage::Verification, started);

            for ((i, q), evidences) in to_check.into_iter().zip(queries).zip(verified) {
                outcomes[i] = ClaimOutcome::Verified {
                    queries: q.queries,
                    evidences,
                };
            }
        }

        progress.emit(Stage::Aggregation, "Aggregating results");
        let details = build_details(&classified.decisions, outcomes);
        let summary = summarize(&details);

        self.remember_verdicts(&details);
        // Failed classification marks every claim unworthy; its label is not learned.
        if !classified.failed {
            self.learn(&document.text, infer_label(&details, false));
        }

        let usage = PipelineUsage {
            screening: screening_meter.snapshot(),
            decomposer: decomposer_meter.snapshot(),
            checkworthy: checkworthy_meter.snapshot(),
            query_generator: query_meter.snapshot(),
            evidence_crawler: retrieval_meter.snapshot(),
            claimverify: verify_meter.snapshot(),
        };

        tracing::info!(
            claims = summary.num_claims,
            checkworthy = summary.num_checkworthy_claims,
            verified = summary.num_verified_claims,
            supported = summary.num_supported_claims,
            refuted = summary.num_refuted_claims,
            tokens = usage.total(),
            "Fact check complete"
        );
        progress.emit(Stage::Done, "Fact check complete");

        FactCheckReport {
            document_id: document.id,
            raw_text: document.text.clone(),
            token_count: document.token_count(),
            usage,
            claim_detail: details,
            summary,
            sag: graph,
            status: ReportStatus::Completed,
            screening,
            warnings,
        }
    }

    async fn lookup_verdicts(
        &self,
        decisions: &[CheckworthyDecision],
        indices: &[usize],
    ) -> Vec<Option<CachedVerdict>> {
        match &self.verdicts {
            Some(verdicts) => {
                fan_out(indices, self.concurrency, |i| {
                    verdicts.lookup(&decisions[*i].claim)
                })
                .await
            }
            None => vec![None; indices.len()],
        }
    }

    fn remember_verdicts(&self, details: &[ClaimDetail]) {
        let Some(verdicts) = self.verdicts.clone() else {
            return;
        };
        let details = details.to_vec();
        tokio::spawn(async move {
            match verdicts.store(&details).await {
                Ok(n) if n > 0 => tracing::debug!(stored = n, "Stored verified claims"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to store verified claims"),
            }
        });
    }

    fn learn(&self, text: &str, label: AdvisorLabel) {
        let Some(sink) = self.lessons.clone() else {
            return;
        };
        let lesson = ScreeningLesson::new(text, label);
        tokio::spawn(async move {
            let lesson_id = lesson.id;
            if let Err(e) = sink.publish(lesson).await {
                tracing::warn!(lesson_id = %lesson_id, error = %e, "Failed to publish screening lesson");
            }
        });
    }
}

fn observe(stage: Stage, started: Instant) {
    metrics::histogram!("pipeline.stage.latency", "stage" => stage.label())
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use claimcheck_common::config::{RetrievalConfig, ScreeningConfig};
    use claimcheck_common::types::{Factuality, Relationship, SourceRecord, TrustLevel};

    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::embeddings::mock::FixedEmbedder;
    use crate::llm::mock::ScriptedLlm;
    use crate::llm::{SlidingWindowLimiter, StageClient};
    use crate::queue::ChannelLessonSink;
    use crate::retrieval::mock::StubWeb;
    use crate::retrieval::LexicalReranker;
    use crate::screening::{MetadataAnalyzer, StylometryAnalyzer};
    use crate::store::{MemoryTrustStore, MemoryVectorIndex, VectorIndex};

    struct Scripts {
        decompose: Arc<ScriptedLlm>,
        checkworthy: Arc<ScriptedLlm>,
        queries: Arc<ScriptedLlm>,
        verify: Arc<ScriptedLlm>,
    }

    fn stage(llm: Arc<ScriptedLlm>) -> Arc<StageClient> {
        Arc::new(StageClient::new(
            llm,
            Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60))),
            Arc::new(CircuitBreaker::new("llm_api", 3, 60)),
            16,
            Duration::from_secs(5),
        ))
    }

    fn screening_config() -> ScreeningConfig {
        ScreeningConfig {
            sensationalism_threshold: 0.5,
            uppercase_weight: 2.0,
            keyword_weight: 5.0,
            entropy_weight: 0.25,
            concentration_weight: 0.25,
            entropy_mean: 7.0,
            entropy_std: 0.9,
            top_k_terms: 10,
            idf_path: None,
            sensational_keywords: vec!["shocking".into(), "exposed".into()],
            advisor_neighbors: 5,
            advisor_max_distance: 0.3,
        }
    }

    fn retrieval_config() -> RetrievalConfig {
        RetrievalConfig {
            cache_distance_threshold: 0.2,
            target_evidence_count: 3,
            max_search_results_per_query: 3,
            sentences_per_passage: 2,
            sliding_distance: 1,
            max_passages_per_url: 5,
            max_passages_per_claim: 5,
            min_sentence_chars: 3,
            max_sentence_chars: 250,
            fetch_timeout_ms: 3000,
            fetch_attempts: 2,
        }
    }

    fn checker(
        scripts: &Scripts,
        web: Arc<StubWeb>,
        verdicts: Option<VerdictStore>,
        lessons: Option<Arc<dyn LessonSink>>,
    ) -> FactChecker {
        let store = MemoryTrustStore::new([
            SourceRecord {
                domain: "zoo.example".into(),
                name: "Zoo".into(),
                bias: "least biased".into(),
                credibility: "HIGH".into(),
                country: String::new(),
            },
            SourceRecord {
                domain: "rumors.example".into(),
                name: "Rumors".into(),
                bias: "questionable".into(),
                credibility: "VERY LOW".into(),
                country: String::new(),
            },
        ]);
        let metadata = Arc::new(MetadataAnalyzer::new(Arc::new(store), None, "", 1));

        let stages = PipelineStages {
            screening: ScreeningGate::new(
                metadata.clone(),
                StylometryAnalyzer::new(&screening_config(), HashMap::new()),
                None,
                0.5,
            ),
            coreference: CoreferenceResolver::new(None),
            decomposer: Decomposer::new(stage(scripts.decompose.clone()), None, "{{document}}", 2, 0.85),
            checkworthy: CheckworthyClassifier::new(stage(scripts.checkworthy.clone()), "{{claims}}", 2),
            query_generator: QueryGenerator::new(stage(scripts.queries.clone()), "{{claim}}", 2, 5, 4),
            retriever: HybridRetriever::new(
                None,
                Some(web),
                Arc::new(LexicalReranker),
                metadata,
                retrieval_config(),
                4,
            ),
            verifier: ClaimVerifier::new(stage(scripts.verify.clone()), "{{claim}}\n{{evidence}}", 2, 4),
        };
        FactChecker::new(stages, StageModels::default(), verdicts, lessons, 4)
    }

    const GRAPH: &str = r#"{
        "nodes": [
            {"id": 1, "label": "All birds can fly.", "type": "Claim"},
            {"id": 2, "label": "Pizza is the best food.", "type": "Claim"}
        ],
        "edges": []
    }"#;

    const CHECKWORTHY: &str = r#"{
        "All birds can fly.": "Yes (Biological claim.)",
        "Pizza is the best food.": "No (Opinion.)"
    }"#;

    fn bird_scripts(verify: &[&str]) -> Scripts {
        Scripts {
            decompose: Arc::new(ScriptedLlm::ok(&[GRAPH])),
            checkworthy: Arc::new(ScriptedLlm::ok(&[CHECKWORTHY])),
            queries: Arc::new(ScriptedLlm::ok(&[r#"{"Questions": ["Can penguins fly?"]}"#])),
            verify: Arc::new(ScriptedLlm::ok(verify)),
        }
    }

    fn bird_web() -> Arc<StubWeb> {
        Arc::new(StubWeb::default().with_page(
            "All birds can fly.",
            "https://zoo.example/penguins",
            "Penguins cannot fly.",
        ))
    }

    #[tokio::test]
    async fn test_bird_claim_refuted() {
        let scripts = bird_scripts(&[r#"{"verifications": [
            {"id": "E1", "reasoning": "Penguins are flightless birds.", "relationship": "REFUTES"}
        ]}"#]);
        let report = checker(&scripts, bird_web(), None, None)
            .check(
                &RawDocument::new("All birds can fly. Pizza is the best food.", None),
                &ProgressSender::disabled(),
            )
            .await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.claim_detail.len(), 2);

        let birds = &report.claim_detail[0];
        assert!(birds.checkworthy);
        assert_eq!(birds.queries, vec!["All birds can fly.", "Can penguins fly?"]);
        assert_eq!(birds.evidences.len(), 1);
        assert_eq!(birds.evidences[0].trust_level, TrustLevel::High);
        assert_eq!(birds.evidences[0].relationship, Some(Relationship::Refutes));
        assert_eq!(birds.factuality, Factuality::Score(0.0));

        let pizza = &report.claim_detail[1];
        assert!(!pizza.checkworthy);
        assert_eq!(pizza.factuality, Factuality::NothingToCheck);

        assert_eq!(report.summary.num_checkworthy_claims, 1);
        assert_eq!(report.summary.num_refuted_claims, 1);
        assert_eq!(report.summary.factuality, SummaryFactuality::Score(0.0));
        assert_eq!(report.usage.claimverify.prompt_tokens, 10);
        assert_eq!(report.sag.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_verification_parse_failure_keeps_evidence() {
        let scripts = bird_scripts(&["garbage", "still garbage"]);
        let report = checker(&scripts, bird_web(), None, None)
            .check(
                &RawDocument::new("All birds can fly. Pizza is the best food.", None),
                &ProgressSender::disabled(),
            )
            .await;

        let birds = &report.claim_detail[0];
        assert_eq!(birds.evidences.len(), 1);
        assert_eq!(birds.evidences[0].relationship, Some(Relationship::Irrelevant));
        assert_eq!(birds.factuality, Factuality::NoConclusiveEvidence);
        assert_eq!(report.summary.factuality, SummaryFactuality::NotApplicable);
    }

    #[tokio::test]
    async fn test_screened_out_document_skips_pipeline() {
        let scripts = bird_scripts(&[]);
        let web = bird_web();
        let (sink, mut lessons) = ChannelLessonSink::new();
        let report = checker(&scripts, web.clone(), None, Some(Arc::new(sink)))
            .check(
                &RawDocument::new(
                    "SHOCKING TRUTH EXPOSED about the election",
                    Some("https://rumors.example/post/1".into()),
                ),
                &ProgressSender::disabled(),
            )
            .await;

        assert_eq!(report.status, ReportStatus::ScreenedOut);
        assert!(report.claim_detail.is_empty());
        match &report.summary.factuality {
            SummaryFactuality::Message(m) => assert!(m.starts_with("Early Warning")),
            other => panic!("expected warning message, got {other:?}"),
        }
        assert_eq!(scripts.decompose.calls(), 0);
        assert_eq!(scripts.checkworthy.calls(), 0);
        assert_eq!(scripts.queries.calls(), 0);
        assert_eq!(scripts.verify.calls(), 0);
        assert_eq!(web.searches.load(Ordering::SeqCst), 0);
        assert_eq!(web.fetches.load(Ordering::SeqCst), 0);

        let lesson = tokio::time::timeout(Duration::from_secs(1), lessons.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lesson.label, AdvisorLabel::NoClaims);
    }

    #[tokio::test]
    async fn test_known_verdict_skips_retrieval() {
        let index = Arc::new(MemoryVectorIndex::new());
        let verdicts = VerdictStore::new(
            Arc::new(FixedEmbedder::with(&[("All birds can fly.", vec![1.0, 0.0])])),
            index.clone(),
            "verified_facts",
            0.2,
        );
        index
            .add(
                "verified_facts",
                vec![crate::store::NewVectorEntry {
                    embedding: vec![1.0, 0.0],
                    document: "All birds can fly.".into(),
                    metadata: serde_json::json!({"factuality": 0.0, "reasoning": "Penguins."}),
                }],
            )
            .await
            .unwrap();

        let scripts = bird_scripts(&[]);
        let web = bird_web();
        let report = checker(&scripts, web.clone(), Some(verdicts), None)
            .check(
                &RawDocument::new("All birds can fly. Pizza is the best food.", None),
                &ProgressSender::disabled(),
            )
            .await;

        let birds = &report.claim_detail[0];
        assert_eq!(birds.factuality, Factuality::Score(0.0));
        assert_eq!(birds.evidences[0].relationship, Some(Relationship::Cached));
        assert!(birds.queries.is_empty());
        assert_eq!(scripts.queries.calls(), 0);
        assert_eq!(scripts.verify.calls(), 0);
        assert_eq!(web.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_checkworthy_recorded_as_warning() {
        let scripts = Scripts {
            decompose: Arc::new(ScriptedLlm::ok(&[GRAPH])),
            checkworthy: Arc::new(ScriptedLlm::ok(&["nope", "nope"])),
            queries: Arc::new(ScriptedLlm::ok(&[])),
            verify: Arc::new(ScriptedLlm::ok(&[])),
        };
        let (progress, mut events) = ProgressSender::channel(32);
        let report = checker(&scripts, bird_web(), None, None)
            .check(
                &RawDocument::new("All birds can fly. Pizza is the best food.", None),
                &progress,
            )
            .await;

        assert_eq!(report.warnings, vec![WARNING_CHECKWORTHY_FAILED.to_string()]);
        assert_eq!(report.claim_detail.len(), 2);
        assert!(report
            .claim_detail
            .iter()
            .all(|d| d.factuality == Factuality::NothingToCheck));
        assert_eq!(scripts.queries.calls(), 0);

        let mut stages = Vec::new();
        while let Ok(event) = events.try_recv() {
            stages.push(event.stage);
        }
        assert_eq!(stages.first(), Some(&Stage::Screening));
        assert_eq!(stages.last(), Some(&Stage::Done));
    }

    #[tokio::test]
    async fn test_failed_checkworthy_not_learned() {
        let scripts = Scripts {
            decompose: Arc::new(ScriptedLlm::ok(&[GRAPH])),
            checkworthy: Arc::new(ScriptedLlm::ok(&["nope", "nope"])),
            queries: Arc::new(ScriptedLlm::ok(&[])),
            verify: Arc::new(ScriptedLlm::ok(&[])),
        };
        let (sink, mut lessons) = ChannelLessonSink::new();
        let report = checker(&scripts, bird_web(), None, Some(Arc::new(sink)))
            .check(
                &RawDocument::new("All birds can fly. Pizza is the best food.", None),
                &ProgressSender::disabled(),
            )
            .await;

        assert_eq!(report.warnings, vec![WARNING_CHECKWORTHY_FAILED.to_string()]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lessons.try_recv().is_err());
    }
}
