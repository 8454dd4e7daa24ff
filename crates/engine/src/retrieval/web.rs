use std::sync::Arc;
use std::time::Duration;

use claimcheck_common::api::fetch::{
    FetchOptions, FetchRequest, FetchResponse, SearchRequest, SearchResponse,
};
use futures::future::BoxFuture;

use crate::circuit_breaker::CircuitBreaker;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Fetch service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unsupported content at {0}")]
    Unsupported(String),

    #[error("Fetch circuit breaker is open")]
    CircuitOpen,
}

impl From<WebError> for claimcheck_common::ClaimCheckError {
    fn from(e: WebError) -> Self {
        match e {
            WebError::CircuitOpen => claimcheck_common::ClaimCheckError::CircuitOpen("fetch".into()),
            other => claimcheck_common::ClaimCheckError::Fetch(other.to_string()),
        }
    }
}

/// Web search and page fetch capability.
pub trait WebSearch: Send + Sync {
    /// Candidate URLs for a query, best first.
    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, WebError>>;

    /// Visible text of a page.
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, WebError>>;
}

/// Client for the fetch sidecar (`POST /search`, `POST /fetch`).
pub struct FetchServiceClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    fetch_timeout: Duration,
    fetch_attempts: u32,
}

impl FetchServiceClient {
    pub fn new(
        base_url: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        fetch_timeout: Duration,
        fetch_attempts: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker,
            fetch_timeout,
            fetch_attempts: fetch_attempts.max(1),
        }
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req, timeout: Duration) -> Result<Resp, WebError>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        if !self.breaker.allow() {
            return Err(WebError::CircuitOpen);
        }

        let start = std::time::Instant::now();
        let result = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.breaker.record_failure();
                return Err(WebError::Http(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() && status.as_u16() != 502 {
                self.breaker.record_failure();
            }
            return Err(WebError::Status {
                status: status.as_u16(),
                body,
            });
        }

        self.breaker.record_success();
        metrics::histogram!("fetch.request.latency", "path" => path.to_string())
            .record(start.elapsed().as_secs_f64());

        response
            .json()
            .await
            .map_err(|e| WebError::Http(format!("Failed to parse response: {e}")))
    }

    pub async fn search_urls(&self, query: &str, max_results: usize) -> Result<Vec<String>, WebError> {
        let request = SearchRequest {
            query: query.to_string(),
            max_results: Some(max_results),
        };
        let response: SearchResponse = self
            .post("/search", &request, Duration::from_secs(30))
            .await?;
        Ok(response
            .results
            .into_iter()
            .map(|r| r.url)
            .take(max_results)
            .collect())
    }

    /// Fetch a page, retrying a fixed number of times. PDFs are skipped.
    pub async fn fetch_page(&self, url: &str) -> Result<String, WebError> {
        if url.to_lowercase().ends_with(".pdf") {
            return Err(WebError::Unsupported(url.to_string()));
        }

        let request = FetchRequest {
            url: url.to_string(),
            options: Some(FetchOptions {
                timeout_ms: Some(self.fetch_timeout.as_millis() as u64),
                user_agent: None,
            }),
        };
        // Sidecar overhead on top of the page timeout.
        let timeout = self.fetch_timeout + Duration::from_secs(2);

        let mut last = None;
        for attempt in 1..=self.fetch_attempts {
            match self.post::<_, FetchResponse>("/fetch", &request, timeout).await {
                Ok(response) => {
                    let pdf = response
                        .metadata
                        .content_type
                        .as_deref()
                        .is_some_and(|ct| ct.contains("pdf"));
                    if pdf {
                        return Err(WebError::Unsupported(url.to_string()));
                    }
                    return Ok(response.content);
                }
                Err(e @ WebError::CircuitOpen) => return Err(e),
                Err(e) => {
                    tracing::debug!(url, attempt, error = %e, "Page fetch failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| WebError::Http("no fetch attempts made".into())))
    }
}

impl WebSearch for FetchServiceClient {
    fn search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, WebError>> {
        Box::pin(self.search_urls(query, max_results))
    }

    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, WebError>> {
        Box::pin(self.fetch_page(url))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pdf_urls_skipped_without_request() {
        let client = FetchServiceClient::new(
            "http://127.0.0.1:9",
            Arc::new(CircuitBreaker::new("fetch", 5, 60)),
            Duration::from_millis(100),
            2,
        );
        let result = client.fetch_page("https://example.com/report.PDF").await;
        assert!(matches!(result, Err(WebError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let breaker = Arc::new(CircuitBreaker::new("fetch", 1, 600));
        breaker.record_failure();
        let client = FetchServiceClient::new("http://127.0.0.1:9", breaker, Duration::from_millis(100), 3);
        let result = client.fetch_page("https://example.com/a").await;
        assert!(matches!(result, Err(WebError::CircuitOpen)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = FetchServiceClient::new(
            "http://fetch:8081/",
            Arc::new(CircuitBreaker::new("fetch", 5, 60)),
            Duration::from_secs(3),
            2,
        );
        assert_eq!(client.base_url, "http://fetch:8081");
    }
}
