use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::RwLock;

mod cache;
mod fetch;
mod rate_limit;
mod routes;
mod search;

use cache::PageCache;
use rate_limit::HostRateLimiter;

/// Browser-like default; many news sites refuse unknown agents.
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Shared application state.
pub struct AppState {
    pub http: reqwest::Client,
    pub cache: Arc<RwLock<PageCache>>,
    pub rate_limiter: Arc<HostRateLimiter>,
    pub metrics_handle: PrometheusHandle,
    /// SearXNG backend URL for web search.
    pub search_backend_url: String,
    /// Page timeout when the request does not set one.
    pub default_timeout: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
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

    tracing::info!("ClaimCheck fetch sidecar starting");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let cache_ttl_secs: u64 = env_or("FETCH_CACHE_TTL", 3600);
    let cache_capacity: usize = env_or("FETCH_CACHE_CAPACITY", 2048);
    let rate_limit: f64 = env_or("FETCH_RATE_LIMIT", 2.0);
    let default_timeout_ms: u64 = env_or("FETCH_TIMEOUT_MS", 3000);

    let user_agent =
        std::env::var("FETCH_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    let http = reqwest::Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .expect("Failed to build HTTP client");

    let search_backend_url =
        std::env::var("SEARCH_BACKEND_URL").unwrap_or_else(|_| "http://localhost:8888".into());

    let state = Arc::new(AppState {
        http,
        cache: Arc::new(RwLock::new(PageCache::new(
            Duration::from_secs(cache_ttl_secs),
            cache_capacity,
        ))),
        rate_limiter: Arc::new(HostRateLimiter::new(rate_limit)),
        metrics_handle,
        search_backend_url,
        default_timeout: Duration::from_millis(default_timeout_ms),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/fetch", post(routes::fetch_handler))
        .route("/search", post(routes::search_handler))
        .with_state(state);

    let port: u16 = env_or("FETCH_PORT", 8081);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "ClaimCheck fetch sidecar listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    )
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
