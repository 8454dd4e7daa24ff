use std::collections::HashSet;
use std::time::{Duration, Instant};

use scraper::{ElementRef, Html, Selector};

/// Elements whose text is never visible page content.
const HIDDEN_ELEMENTS: &[&str] = &[
    "script", "style", "head", "title", "meta", "noscript", "svg", "template", "iframe",
];

/// Page chrome dropped when falling back to the whole body.
const CHROME_ELEMENTS: &[&str] = &["nav", "footer", "header", "aside", "form"];

/// Containers that usually hold the article itself, in preference order.
const MAIN_CONTENT: &[&str] = &["article", "main", "[role=main]"];

/// A fetched page before text extraction.
#[derive(Debug)]
pub struct FetchedPage {
    pub body: String,
    pub status_code: u16,
    pub content_type: Option<String>,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
    }
}

/// GET a URL. Non-success statuses are errors.
pub async fn fetch_page(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
    user_agent: Option<&str>,
) -> Result<FetchedPage, FetchError> {
    let start = Instant::now();
    let host = url_host(url).ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

    let mut request = http.get(url).timeout(timeout);
    if let Some(ua) = user_agent {
        request = request.header(reqwest::header::USER_AGENT, ua);
    }

    let response = request
        .send()
        .await
        .map_err(|e| FetchError::Http(e.to_string()))?;

    let status_code = response.status().as_u16();
    if !response.status().is_success() {
        return Err(FetchError::Status(status_code));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::Http(e.to_string()))?;

    metrics::histogram!("fetch.request.latency", "domain" => host)
        .record(start.elapsed().as_secs_f64());

    Ok(FetchedPage {
        body,
        status_code,
        content_type,
    })
}

/// Visible text of an HTML page.
///
/// Uses the first article-like container when the page has one, otherwise
/// the whole body minus navigation and other chrome.
pub fn extract_visible_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for sel in MAIN_CONTENT {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(container) = document.select(&selector).next() {
            let text = visible_text(container, HIDDEN_ELEMENTS);
            if !text.is_empty() {
                return text;
            }
        }
    }

    let skipped: Vec<&str> = HIDDEN_ELEMENTS.iter().chain(CHROME_ELEMENTS).copied().collect();
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next());
    visible_text(body.unwrap_or_else(|| document.root_element()), &skipped)
}

fn visible_text(root: ElementRef<'_>, skipped: &[&str]) -> String {
    let skipped: HashSet<&str> = skipped.iter().copied().collect();
    let mut parts = Vec::new();
    collect_text(root, &skipped, &mut parts);
    collapse_whitespace(&parts.join(" "))
}

fn collect_text<'a>(element: ElementRef<'a>, skipped: &HashSet<&str>, out: &mut Vec<&'a str>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed);
            }
        } else if let Some(child) = ElementRef::wrap(child) {
            if !skipped.contains(child.value().name()) {
                collect_text(child, skipped, out);
            }
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Host of an http(s) URL, lowercased.
pub fn url_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().map(|h| h.to_lowercase())
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Not an http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("Search backend returned malformed response: {0}")]
    Malformed(String),
}
