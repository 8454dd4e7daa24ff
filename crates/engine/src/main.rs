use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use claimcheck_common::api::check::CheckRequest;
use claimcheck_common::config::LlmRoleConfig;
use claimcheck_common::types::RawDocument;
use claimcheck_engine::checkworthy::CheckworthyClassifier;
use claimcheck_engine::circuit_breaker::CircuitBreakerRegistry;
use claimcheck_engine::config::{self, ConfigError, EngineConfig};
use claimcheck_engine::coref::{CoreferenceResolver, LlmClusterer};
use claimcheck_engine::decompose::Decomposer;
use claimcheck_engine::embeddings::{EmbeddingClient, Embedder};
use claimcheck_engine::llm::{LlmClient, SlidingWindowLimiter, StageClient};
use claimcheck_engine::orchestrator::{FactChecker, PipelineStages, ProgressSender, StageModels};
use claimcheck_engine::query_gen::QueryGenerator;
use claimcheck_engine::queue::{ChannelLessonSink, LessonIndexer, LessonQueue, LessonSink, LessonSource};
use claimcheck_engine::retrieval::{
    EmbeddingReranker, FallbackReranker, FetchServiceClient, HttpReranker, HybridRetriever,
    PassageReranker, SemanticCache,
};
use claimcheck_engine::screening::{
    MetadataAnalyzer, ScreeningAdvisor, ScreeningGate, StylometryAnalyzer,
};
use claimcheck_engine::store::{MemoryTrustStore, MemoryVectorIndex, StoreClient, TrustStore, VectorIndex};
use claimcheck_engine::verdicts::VerdictStore;
use claimcheck_engine::verify::ClaimVerifier;

/// Shared application state accessible from axum handlers.
struct AppState {
    checker: Arc<FactChecker>,
    store: Option<Arc<StoreClient>>,
    queue: Option<Arc<LessonQueue>>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("ClaimCheck Engine starting");

    // Load configuration. Misconfiguration is fatal.
    let config_dir = std::env::var("CLAIMCHECK_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let engine_config = match config::load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let breakers = Arc::new(CircuitBreakerRegistry::new());

    // PostgreSQL is optional; without it stores live in memory.
    let store = match std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()) {
        Some(url) => {
            let client = match StoreClient::connect(&url, 10).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    std::process::exit(1);
                }
            };
            if let Err(e) = client.migrate().await {
                tracing::error!(error = %e, "Failed to run PostgreSQL migrations");
                std::process::exit(1);
            }
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory trust store and vector index");
            None
        }
    };

    let (trust_store, vector_index): (Arc<dyn TrustStore>, Arc<dyn VectorIndex>) = match &store {
        Some(client) => (
            client.clone() as Arc<dyn TrustStore>,
            client.clone() as Arc<dyn VectorIndex>,
        ),
        None => (
            Arc::new(MemoryTrustStore::new([])),
            Arc::new(MemoryVectorIndex::new()),
        ),
    };

    if let (Some(client), Ok(path)) = (&store, std::env::var("SOURCES_EXPORT_PATH")) {
        seed_sources(client, &path).await;
    }

    let embedder: Arc<dyn Embedder> = match EmbeddingClient::new(
        engine_config.system.embeddings.clone(),
        engine_config.system.retry.embeddings.clone(),
        breakers.embeddings.clone(),
    ) {
        Some(client) => Arc::new(client),
        None => {
            tracing::error!("Embedding client unavailable, refusing to start");
            std::process::exit(1);
        }
    };

    let advisor = Arc::new(ScreeningAdvisor::new(
        embedder.clone(),
        vector_index.clone(),
        &engine_config.system.cache.advisor_collection,
        engine_config.system.screening.advisor_neighbors,
        engine_config.system.screening.advisor_max_distance,
    ));

    // Learning loop: Redis stream when configured, in-process channel otherwise.
    let (sink, source, queue): (Arc<dyn LessonSink>, LessonSource, Option<Arc<LessonQueue>>) =
        match std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()) {
            Some(url) => {
                let queue = match LessonQueue::connect(&url).await {
                    Ok(queue) => Arc::new(queue),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to connect to Redis");
                        std::process::exit(1);
                    }
                };
                if let Err(e) = queue.initialize_stream().await {
                    tracing::error!(error = %e, "Failed to initialize lesson stream");
                    std::process::exit(1);
                }
                let source = LessonSource::Redis {
                    queue: queue.clone(),
                    consumer: format!("indexer-{}", uuid::Uuid::new_v4()),
                };
                (queue.clone() as Arc<dyn LessonSink>, source, Some(queue))
            }
            None => {
                tracing::warn!("REDIS_URL not set, indexing screening lessons in-process");
                let (sink, rx) = ChannelLessonSink::new();
                (
                    Arc::new(sink) as Arc<dyn LessonSink>,
                    LessonSource::Channel(rx),
                    None,
                )
            }
        };
    let indexer = LessonIndexer::start(source, advisor.clone());

    let checker = match build_checker(
        &engine_config,
        &breakers,
        trust_store,
        vector_index,
        embedder,
        advisor,
        sink,
    ) {
        Ok(checker) => Arc::new(checker),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build pipeline, refusing to start");
            std::process::exit(1);
        }
    };

    spawn_breaker_metrics(breakers.clone());

    let state = Arc::new(AppState {
        checker,
        store,
        queue,
        breakers,
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/check", post(check_handler))
        .with_state(state);

    let port: u16 = std::env::var("ENGINE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "ClaimCheck Engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("HTTP server error");

    indexer.shutdown();
    indexer.join().await;
    tracing::info!("ClaimCheck Engine stopped");
}

async fn seed_sources(store: &StoreClient, path: &str) {
    match std::fs::read_to_string(path) {
        Ok(export) => match store.seed_sources(&export).await {
            Ok(count) => tracing::info!(count, path, "Seeded trust store"),
            Err(e) => tracing::warn!(error = %e, path, "Failed to seed trust store"),
        },
        Err(e) => tracing::warn!(error = %e, path, "Failed to read sources export"),
    }
}

fn stage_client(
    role: &LlmRoleConfig,
    config: &EngineConfig,
    limiter: &Arc<SlidingWindowLimiter>,
    breakers: &CircuitBreakerRegistry,
) -> Result<Arc<StageClient>, ConfigError> {
    let client = LlmClient::new(role.clone(), config.system.retry.llm_api.clone()).ok_or_else(|| {
        ConfigError::Validation(format!("LLM client unavailable for model {}", role.model))
    })?;
    Ok(Arc::new(StageClient::new(
        Arc::new(client),
        limiter.clone(),
        breakers.llm_api.clone(),
        config.system.cache.memo_capacity,
        Duration::from_secs(role.timeout_seconds),
    )))
}

/// Assemble every pipeline stage from configuration.
fn build_checker(
    config: &EngineConfig,
    breakers: &CircuitBreakerRegistry,
    trust_store: Arc<dyn TrustStore>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    advisor: Arc<ScreeningAdvisor>,
    lessons: Arc<dyn LessonSink>,
) -> Result<FactChecker, ConfigError> {
    let system = &config.system;
    let attempts = system.pipeline.num_seed_retries;
    let concurrency = system.pipeline.max_concurrency;

    // One limiter for the shared backend.
    let limiter = Arc::new(SlidingWindowLimiter::new(
        system.rate_limit.llm_max_requests,
        Duration::from_secs(system.rate_limit.llm_window_seconds),
    ));
    let screening_llm = stage_client(&system.llm.screening, config, &limiter, breakers)?;
    let decompose_llm = stage_client(&system.llm.decompose, config, &limiter, breakers)?;
    let checkworthy_llm = stage_client(&system.llm.checkworthy, config, &limiter, breakers)?;
    let query_llm = stage_client(&system.llm.query_generation, config, &limiter, breakers)?;
    let verify_llm = stage_client(&system.llm.claim_verify, config, &limiter, breakers)?;

    let metadata = Arc::new(MetadataAnalyzer::new(
        trust_store,
        Some(screening_llm.clone()),
        config.prompt("source_credibility")?,
        attempts,
    )
    .with_cache_capacity(system.cache.source_cache_capacity));
    let stylometry = StylometryAnalyzer::from_config(&system.screening, &config.config_dir)?;

    let web = Arc::new(FetchServiceClient::new(
        std::env::var("FETCH_BASE_URL").unwrap_or_else(|_| "http://localhost:8081".into()),
        breakers.fetch.clone(),
        Duration::from_millis(system.retrieval.fetch_timeout_ms),
        system.retrieval.fetch_attempts,
    ));

    let embedding_reranker: Arc<dyn PassageReranker> =
        Arc::new(EmbeddingReranker::new(embedder.clone()));
    let reranker: Arc<dyn PassageReranker> =
        match std::env::var("RERANK_URL").ok().filter(|u| !u.is_empty()) {
            Some(url) => Arc::new(FallbackReranker::new(
                Arc::new(HttpReranker::new(url, breakers.rerank.clone())),
                embedding_reranker,
            )),
            None => {
                tracing::warn!("RERANK_URL not set, ranking passages by embedding similarity");
                embedding_reranker
            }
        };

    let stages = PipelineStages {
        screening: ScreeningGate::new(
            metadata.clone(),
            stylometry,
            Some(advisor),
            system.screening.sensationalism_threshold,
        ),
        coreference: CoreferenceResolver::new(Some(Arc::new(LlmClusterer::new(
            screening_llm.clone(),
            config.prompt("coreference")?,
            attempts,
        )))),
        decomposer: Decomposer::new(
            decompose_llm.clone(),
            Some(embedder.clone()),
            config.prompt("decompose")?,
            attempts,
            system.pipeline.dedup_threshold,
        ),
        checkworthy: CheckworthyClassifier::new(
            checkworthy_llm.clone(),
            config.prompt("checkworthy")?,
            attempts,
        ),
        query_generator: QueryGenerator::new(
            query_llm.clone(),
            config.prompt("query_generation")?,
            attempts,
            system.pipeline.max_queries_per_claim,
            concurrency,
        ),
        retriever: HybridRetriever::new(
            Some(SemanticCache {
                embedder: embedder.clone(),
                index: vector_index.clone(),
                collection: system.cache.passages_collection.clone(),
            }),
            Some(web),
            reranker,
            metadata,
            system.retrieval.clone(),
            concurrency,
        ),
        verifier: ClaimVerifier::new(
            verify_llm.clone(),
            config.prompt("claim_verify")?,
            attempts,
            concurrency,
        ),
    };

    let models = StageModels {
        screening: screening_llm.model().to_string(),
        decomposer: decompose_llm.model().to_string(),
        checkworthy: checkworthy_llm.model().to_string(),
        query_generator: query_llm.model().to_string(),
        claimverify: verify_llm.model().to_string(),
    };

    let verdicts = VerdictStore::new(
        embedder,
        vector_index,
        &system.cache.verdicts_collection,
        system.cache.verdict_distance_threshold,
    );

    Ok(FactChecker::new(
        stages,
        models,
        Some(verdicts),
        Some(lessons),
        concurrency,
    ))
}

fn spawn_breaker_metrics(breakers: Arc<CircuitBreakerRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            breakers.report_metrics();
        }
    });
}

/// Fact-check one document. Progress events are logged as they arrive.
async fn check_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckRequest>,
) -> Response {
    if request.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "text must not be empty" })),
        )
            .into_response();
    }

    let document = RawDocument::new(request.text, request.source_url);
    let (progress, mut events) = ProgressSender::channel(32);
    let document_id = document.id;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(
                document_id = %document_id,
                stage = event.stage.label(),
                message = %event.message,
                "Pipeline progress"
            );
        }
    });

    let report = state.checker.check(&document, &progress).await;
    Json(report).into_response()
}

/// Health check endpoint. Reports every configured backing service.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let postgres_ok = match &state.store {
        Some(store) => Some(store.health_check().await.is_ok()),
        None => None,
    };
    let redis_ok = match &state.queue {
        Some(queue) => Some(queue.health_check().await.is_ok()),
        None => None,
    };

    let all_healthy = postgres_ok.unwrap_or(true) && redis_ok.unwrap_or(true);
    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let label = |ok: Option<bool>| match ok {
        Some(true) => "healthy",
        Some(false) => "unhealthy",
        None => "disabled",
    };

    let body = serde_json::json!({
        "status": if all_healthy { "healthy" } else { "unhealthy" },
        "services": {
            "postgres": label(postgres_ok),
            "redis": label(redis_ok),
        },
        "open_circuits": state.breakers.open_circuits(),
    });

    (status, Json(body))
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
