use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use claimcheck_common::api::fetch::{
    FetchMetadata, FetchRequest, FetchResponse, SearchRequest, SearchResponse,
};

use crate::cache::CachedPage;
use crate::fetch::{extract_visible_text, fetch_page, url_host, FetchError};
use crate::search::{search_web, DEFAULT_MAX_RESULTS, MAX_RESULTS_LIMIT};
use crate::AppState;

/// Upper bound on waiting for a per-host rate limit permit.
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

type HandlerError = (StatusCode, String);

/// POST /fetch: retrieve a page and return its visible text.
pub async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, HandlerError> {
    let start = Instant::now();

    let host = url_host(&request.url).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            FetchError::InvalidUrl(request.url.clone()).to_string(),
        )
    })?;

    if let Some(page) = state.cache.read().await.get(&request.url) {
        return Ok(Json(response(request.url, page, true)));
    }

    state
        .rate_limiter
        .acquire(&host, RATE_LIMIT_WAIT)
        .await
        .map_err(|e| (StatusCode::TOO_MANY_REQUESTS, e.to_string()))?;

    let options = request.options.unwrap_or_default();
    let timeout = options
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.default_timeout);

    let fetched = fetch_page(
        &state.http,
        &request.url,
        timeout,
        options.user_agent.as_deref(),
    )
    .await
    .map_err(|e| {
        metrics::counter!("fetch.request.errors", "domain" => host.clone()).increment(1);
        tracing::debug!(url = %request.url, error = %e, "Upstream fetch failed");
        (StatusCode::BAD_GATEWAY, e.to_string())
    })?;

    let content = if fetched.is_html() {
        extract_visible_text(&fetched.body)
    } else if fetched
        .content_type
        .as_deref()
        .map_or(true, |ct| ct.starts_with("text/"))
    {
        fetched.body
    } else {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "unsupported content type: {}",
                fetched.content_type.unwrap_or_default()
            ),
        ));
    };

    let page = CachedPage {
        content,
        status_code: fetched.status_code,
        content_type: fetched.content_type,
    };
    state
        .cache
        .write()
        .await
        .insert(request.url.clone(), page.clone());

    metrics::histogram!("fetch.request.total_latency", "domain" => host)
        .record(start.elapsed().as_secs_f64());

    Ok(Json(response(request.url, page, false)))
}

/// POST /search: candidate URLs for a query from the search backend.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HandlerError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".into()));
    }

    let max_results = request
        .max_results
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .clamp(1, MAX_RESULTS_LIMIT);

    let start = Instant::now();
    let results = search_web(&state.http, &state.search_backend_url, query, max_results)
        .await
        .map_err(|e| {
            metrics::counter!("fetch.search.errors").increment(1);
            tracing::warn!(query, error = %e, "Search backend failed");
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;

    metrics::histogram!("fetch.search.latency").record(start.elapsed().as_secs_f64());
    tracing::debug!(query, results = results.len(), "Search complete");

    Ok(Json(SearchResponse { results }))
}

fn response(url: String, page: CachedPage, cached: bool) -> FetchResponse {
    FetchResponse {
        content: page.content,
        metadata: FetchMetadata {
            status_code: page.status_code,
            content_type: page.content_type,
            url,
            cached,
        },
    }
}
