use std::collections::HashSet;
use std::time::Duration;

use claimcheck_common::api::fetch::SearchResult;
use serde::Deserialize;

use crate::fetch::{url_host, FetchError};

/// Results returned when the caller does not ask for a count.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Upper bound on results per query.
pub const MAX_RESULTS_LIMIT: usize = 50;

#[derive(Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Deserialize)]
struct SearxResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Query a SearXNG instance (`GET /search?q=..&format=json`).
pub async fn search_web(
    http: &reqwest::Client,
    backend_url: &str,
    query: &str,
    max_results: usize,
) -> Result<Vec<SearchResult>, FetchError> {
    let endpoint = format!("{}/search", backend_url.trim_end_matches('/'));
    let response = http
        .get(&endpoint)
        .query(&[("q", query), ("format", "json")])
        .timeout(Duration::from_secs(15))
        .send()
        .await
        .map_err(|e| FetchError::Http(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status().as_u16()));
    }

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::Http(e.to_string()))?;
    parse_results(&body, max_results)
}

/// Keep http(s) results, first occurrence of each URL, at most `max_results`.
pub fn parse_results(body: &str, max_results: usize) -> Result<Vec<SearchResult>, FetchError> {
    let parsed: SearxResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let mut seen = HashSet::new();
    Ok(parsed
        .results
        .into_iter()
        .filter(|r| url_host(&r.url).is_some())
        .filter(|r| seen.insert(r.url.clone()))
        .take(max_results)
        .map(|r| SearchResult {
            url: r.url,
            title: r.title.filter(|t| !t.is_empty()),
            snippet: r.content.filter(|c| !c.is_empty()),
        })
        .collect())
}
