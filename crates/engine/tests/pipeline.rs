//! End-to-end pipeline tests over the public API with in-process stubs.
//! No live services required.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use claimcheck_common::config::{RetrievalConfig, ScreeningConfig};
use claimcheck_common::types::{
    Factuality, RawDocument, Relationship, ReportStatus, SourceRecord, Stage, SummaryFactuality,
    TrustLevel,
};
use claimcheck_engine::checkworthy::CheckworthyClassifier;
use claimcheck_engine::circuit_breaker::CircuitBreaker;
use claimcheck_engine::coref::CoreferenceResolver;
use claimcheck_engine::decompose::Decomposer;
use claimcheck_engine::embeddings::{Embedder, EmbeddingError};
use claimcheck_engine::llm::{
    ChatOptions, LlmCaller, LlmError, LlmResponse, Message, SlidingWindowLimiter, StageClient,
    StopReason, TokenUsage,
};
use claimcheck_engine::orchestrator::{FactChecker, PipelineStages, ProgressSender, StageModels};
use claimcheck_engine::query_gen::QueryGenerator;
use claimcheck_engine::retrieval::{HybridRetriever, LexicalReranker, WebError, WebSearch};
use claimcheck_engine::screening::{MetadataAnalyzer, ScreeningGate, StylometryAnalyzer};
use claimcheck_engine::store::{MemoryTrustStore, MemoryVectorIndex};
use claimcheck_engine::verdicts::VerdictStore;
use claimcheck_engine::verify::ClaimVerifier;

/// LLM stub answering with the first route whose needle occurs in the prompt.
struct RoutedLlm {
    routes: Vec<(String, String)>,
    calls: AtomicUsize,
}

impl RoutedLlm {
    fn new(routes: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            routes: routes
                .iter()
                .map(|(needle, reply)| (needle.to_string(), reply.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmCaller for RoutedLlm {
    fn chat<'a>(
        &'a self,
        _system: &'a str,
        messages: &'a [Message],
        _options: &'a ChatOptions,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();
        let reply = self
            .routes
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| LlmError::Api("no route for prompt".into()));
        Box::pin(async move {
            reply.map(|text| LlmResponse {
                text,
                stop_reason: StopReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 20,
                    output_tokens: 8,
                },
            })
        })
    }

    fn model(&self) -> &str {
        "routed"
    }
}

/// Web stub: fixed URLs per query and fixed page text per URL.
#[derive(Default)]
struct StaticWeb {
    results: HashMap<String, Vec<String>>,
    pages: HashMap<String, String>,
    searches: AtomicUsize,
}

impl StaticWeb {
    fn page(mut self, query: &str, url: &str, text: &str) -> Self {
        self.results
            .entry(query.to_string())
            .or_default()
            .push(url.to_string());
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

impl WebSearch for StaticWeb {
    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, WebError>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let mut urls = self.results.get(query).cloned().unwrap_or_default();
        urls.truncate(max_results);
        Box::pin(async move { Ok(urls) })
    }

    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, WebError>> {
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| WebError::Http(format!("no page for {url}")));
        Box::pin(async move { page })
    }
}

/// Embedder with one axis per known claim; everything else shares a third axis.
struct AxisEmbedder;

impl Embedder for AxisEmbedder {
    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send + 'a>> {
        let vectors = texts
            .iter()
            .map(|t| {
                if t.contains("Water boils") {
                    vec![1.0, 0.0, 0.0]
                } else if t.contains("Coffee") {
                    vec![0.0, 1.0, 0.0]
                } else {
                    vec![0.0, 0.0, 1.0]
                }
            })
            .collect();
        Box::pin(async move { Ok(vectors) })
    }
}

struct Llms {
    decompose: Arc<RoutedLlm>,
    checkworthy: Arc<RoutedLlm>,
    queries: Arc<RoutedLlm>,
    verify: Arc<RoutedLlm>,
}

const WATER: &str = "Water boils at 100 degrees Celsius at sea level.";
const COFFEE: &str = "Coffee is good for your health.";
const SUMMER: &str = "Summer is the nicest season.";

fn llms() -> Llms {
    let graph = format!(
        r#"{{"nodes": [
            {{"id": 1, "label": "{WATER}", "type": "Claim"}},
            {{"id": 2, "label": "{COFFEE}", "type": "Claim"}},
            {{"id": 3, "label": "{SUMMER}", "type": "Claim"}}
        ], "edges": []}}"#
    );
    let checkworthy = format!(
        r#"{{"{WATER}": "Yes (Physical fact.)", "{COFFEE}": "Yes (Health claim.)", "{SUMMER}": "No (Opinion.)"}}"#
    );
    Llms {
        decompose: RoutedLlm::new(&[("", &graph)]),
        checkworthy: RoutedLlm::new(&[("", &checkworthy)]),
        queries: RoutedLlm::new(&[("", r#"{"Questions": []}"#)]),
        verify: RoutedLlm::new(&[
            (
                WATER,
                r#"{"verifications": [
                    {"id": "E1", "reasoning": "Standard boiling point.", "relationship": "SUPPORTS"}
                ]}"#,
            ),
            (
                COFFEE,
                r#"{"verifications": [
                    {"id": "E1", "reasoning": "Study one.", "relationship": "SUPPORTS"},
                    {"id": "E2", "reasoning": "Study two.", "relationship": "REFUTES"}
                ]}"#,
            ),
        ]),
    }
}

fn web() -> Arc<StaticWeb> {
    Arc::new(
        StaticWeb::default()
            .page(
                WATER,
                "https://physics.example/boiling",
                "Pure water boils at 100 degrees Celsius under standard atmospheric pressure.",
            )
            .page(
                WATER,
                "https://rumors.example/boiling",
                "Water never really boils, scientists are hiding the truth.",
            )
            .page(
                COFFEE,
                "https://health.example/coffee-benefits",
                "Moderate coffee drinking is linked to lower mortality.",
            )
            .page(
                COFFEE,
                "https://journal.example/coffee-risks",
                "Heavy coffee drinking raises blood pressure in some adults.",
            ),
    )
}

fn stage(llm: Arc<RoutedLlm>) -> Arc<StageClient> {
    Arc::new(StageClient::new(
        llm,
        Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60))),
        Arc::new(CircuitBreaker::new("llm_api", 5, 60)),
        32,
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
        max_search_results_per_query: 5,
        sentences_per_passage: 2,
        sliding_distance: 1,
        max_passages_per_url: 3,
        max_passages_per_claim: 5,
        min_sentence_chars: 3,
        max_sentence_chars: 250,
        fetch_timeout_ms: 3000,
        fetch_attempts: 1,
    }
}

fn source(domain: &str, credibility: &str) -> SourceRecord {
    SourceRecord {
        domain: domain.into(),
        name: domain.into(),
        bias: "least biased".into(),
        credibility: credibility.into(),
        country: String::new(),
    }
}

fn checker(llms: &Llms, web: Arc<StaticWeb>, verdicts: Option<VerdictStore>) -> FactChecker {
    let trust = MemoryTrustStore::new([
        source("physics.example", "HIGH"),
        source("health.example", "HIGH"),
        source("journal.example", "MOSTLY FACTUAL"),
        source("rumors.example", "VERY LOW"),
    ]);
    let metadata = Arc::new(MetadataAnalyzer::new(Arc::new(trust), None, "", 1));

    let stages = PipelineStages {
        screening: ScreeningGate::new(
            metadata.clone(),
            StylometryAnalyzer::new(&screening_config(), HashMap::new()),
            None,
            0.5,
        ),
        coreference: CoreferenceResolver::new(None),
        decomposer: Decomposer::new(stage(llms.decompose.clone()), None, "{{document}}", 2, 0.85),
        checkworthy: CheckworthyClassifier::new(stage(llms.checkworthy.clone()), "{{claims}}", 2),
        query_generator: QueryGenerator::new(stage(llms.queries.clone()), "{{claim}}", 2, 5, 4),
        retriever: HybridRetriever::new(
            None,
            Some(web),
            Arc::new(LexicalReranker),
            metadata,
            retrieval_config(),
            4,
        ),
        verifier: ClaimVerifier::new(stage(llms.verify.clone()), "{{claim}}\n{{evidence}}", 2, 4),
    };
    FactChecker::new(stages, StageModels::default(), verdicts, None, 4)
}

fn document() -> RawDocument {
    RawDocument::new(format!("{WATER} {COFFEE} {SUMMER}"), None)
}

#[tokio::test]
async fn test_mixed_document_report() {
    let llms = llms();
    let (progress, mut events) = ProgressSender::channel(64);
    let report = checker(&llms, web(), None).check(&document(), &progress).await;

    assert_eq!(report.status, ReportStatus::Completed);
    assert!(report.warnings.is_empty());
    assert_eq!(report.claim_detail.len(), 3);
    assert_eq!(
        report.claim_detail.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let water = &report.claim_detail[0];
    assert_eq!(water.claim, WATER);
    // The low-trust page never reaches verification.
    assert_eq!(water.evidences.len(), 1);
    assert_eq!(water.evidences[0].url, "https://physics.example/boiling");
    assert_eq!(water.evidences[0].trust_level, TrustLevel::High);
    assert_eq!(water.evidences[0].relationship, Some(Relationship::Supports));
    assert_eq!(water.factuality, Factuality::Score(1.0));

    let coffee = &report.claim_detail[1];
    assert_eq!(coffee.evidences.len(), 2);
    assert_eq!(coffee.factuality, Factuality::Score(0.5));

    let summer = &report.claim_detail[2];
    assert!(!summer.checkworthy);
    assert!(summer.evidences.is_empty());
    assert_eq!(summer.factuality, Factuality::NothingToCheck);

    assert_eq!(report.summary.num_claims, 3);
    assert_eq!(report.summary.num_checkworthy_claims, 2);
    assert_eq!(report.summary.num_verified_claims, 2);
    assert_eq!(report.summary.num_supported_claims, 1);
    assert_eq!(report.summary.num_refuted_claims, 0);
    assert_eq!(report.summary.num_controversial_claims, 1);
    assert_eq!(report.summary.factuality, SummaryFactuality::Score(0.75));

    // One query generation and one verification call per checkworthy claim.
    assert_eq!(llms.queries.calls(), 2);
    assert_eq!(llms.verify.calls(), 2);
    assert_eq!(report.usage.claimverify.prompt_tokens, 40);
    assert_eq!(report.usage.decomposer.prompt_tokens, 20);

    let mut stages = Vec::new();
    while let Ok(event) = events.try_recv() {
        stages.push(event.stage);
    }
    assert_eq!(stages.first(), Some(&Stage::Screening));
    assert!(stages.contains(&Stage::Retrieval));
    assert_eq!(stages.last(), Some(&Stage::Done));
}

#[tokio::test]
async fn test_verified_claims_reused_on_second_check() {
    let llms = llms();
    let web = web();
    let index = Arc::new(MemoryVectorIndex::new());
    let verdicts = VerdictStore::new(Arc::new(AxisEmbedder), index.clone(), "verified_facts", 0.2);
    let checker = checker(&llms, web.clone(), Some(verdicts));

    let first = checker.check(&document(), &ProgressSender::disabled()).await;
    assert_eq!(first.claim_detail[0].factuality, Factuality::Score(1.0));

    // Verdicts are written in the background.
    tokio::time::timeout(Duration::from_secs(2), async {
        while index.count("verified_facts") < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("verdicts were not stored");

    let searches = web.searches.load(Ordering::SeqCst);
    let query_calls = llms.queries.calls();
    let verify_calls = llms.verify.calls();

    let second = checker.check(&document(), &ProgressSender::disabled()).await;

    assert_eq!(web.searches.load(Ordering::SeqCst), searches);
    assert_eq!(llms.queries.calls(), query_calls);
    assert_eq!(llms.verify.calls(), verify_calls);

    let water = &second.claim_detail[0];
    assert_eq!(water.factuality, Factuality::Score(1.0));
    assert_eq!(water.evidences.len(), 1);
    assert_eq!(water.evidences[0].relationship, Some(Relationship::Cached));
    assert!(water.queries.is_empty());

    let coffee = &second.claim_detail[1];
    assert_eq!(coffee.factuality, Factuality::Score(0.5));
    assert_eq!(second.summary.factuality, SummaryFactuality::Score(0.75));

    // Reused verdicts are not stored a second time.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(index.count("verified_facts"), 2);
}

#[tokio::test]
async fn test_sensational_low_trust_document_short_circuits() {
    let llms = llms();
    let web = web();
    let report = checker(&llms, web.clone(), None)
        .check(
            &RawDocument::new(
                "SHOCKING TRUTH EXPOSED about the election",
                Some("https://rumors.example/post/1".into()),
            ),
            &ProgressSender::disabled(),
        )
        .await;

    assert_eq!(report.status, ReportStatus::ScreenedOut);
    assert_eq!(report.screening.trust_level, TrustLevel::Low);
    assert!(report.screening.warning.is_some());
    assert!(report.claim_detail.is_empty());
    assert_eq!(report.summary.num_claims, 0);

    assert_eq!(llms.decompose.calls(), 0);
    assert_eq!(llms.checkworthy.calls(), 0);
    assert_eq!(llms.queries.calls(), 0);
    assert_eq!(llms.verify.calls(), 0);
    assert_eq!(web.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_document_without_claims() {
    let llms = Llms {
        decompose: RoutedLlm::new(&[("", r#"{"nodes": [], "edges": []}"#)]),
        checkworthy: RoutedLlm::new(&[]),
        queries: RoutedLlm::new(&[]),
        verify: RoutedLlm::new(&[]),
    };
    let report = checker(&llms, web(), None)
        .check(
            &RawDocument::new("Hello there, how are you today?", None),
            &ProgressSender::disabled(),
        )
        .await;

    assert_eq!(report.status, ReportStatus::Completed);
    assert!(report.claim_detail.is_empty());
    assert_eq!(report.summary.factuality, SummaryFactuality::NotApplicable);
    assert_eq!(llms.checkworthy.calls(), 0);
    assert_eq!(llms.verify.calls(), 0);
}
