use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use claimcheck_common::types::{SourceRecord, TrustLevel};
use regex::Regex;
use serde::Deserialize;

use crate::config::render_prompt;
use crate::llm::{MemoCache, ParseError, StageClient, UsageMeter};
use crate::store::TrustStore;

const DEFAULT_CACHE_CAPACITY: usize = 4096;

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})").expect("valid domain regex")
});

/// First `http(s)://` domain mentioned in free text, lowercased, without "www.".
pub fn extract_domain(text: &str) -> Option<String> {
    DOMAIN_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
}

/// Host of a URL, lowercased, without "www.".
pub fn domain_of_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    host.contains('.').then_some(host)
}

/// The domain followed by each parent with at least two labels:
/// `a.news.example.com` -> `[a.news.example.com, news.example.com, example.com]`.
fn candidates(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    (0..labels.len().saturating_sub(1))
        .map(|i| labels[i..].join("."))
        .collect()
}

#[derive(Deserialize)]
struct CredibilityResponse {
    sources: Vec<CredibilityEntry>,
}

#[derive(Deserialize)]
struct CredibilityEntry {
    domain: String,
    #[serde(default)]
    name: String,
    credibility: String,
    #[serde(default)]
    bias: String,
}

/// Resolves URLs and domains to trust tiers.
///
/// Lookup order per domain (and then each parent domain): in-process cache,
/// persistent trust store, then one batched LLM assessment for everything
/// still unknown. LLM assessments are cached and written back to the store.
/// The in-process cache is bounded and evicts least recently used domains.
pub struct MetadataAnalyzer {
    store: Arc<dyn TrustStore>,
    llm: Option<Arc<StageClient>>,
    prompt: String,
    attempts: u32,
    cache: Mutex<MemoCache<String, SourceRecord>>,
}

impl MetadataAnalyzer {
    pub fn new(
        store: Arc<dyn TrustStore>,
        llm: Option<Arc<StageClient>>,
        prompt: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            store,
            llm,
            prompt: prompt.into(),
            attempts,
            cache: Mutex::new(MemoCache::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Mutex::new(MemoCache::new(capacity));
        self
    }

    /// Trust tier of a document: from its source URL, or else the first
    /// domain mentioned in its text. `None` domain means nothing to resolve.
    pub async fn analyze(
        &self,
        text: &str,
        source_url: Option<&str>,
        meter: &UsageMeter,
    ) -> (Option<String>, TrustLevel) {
        let domain = source_url
            .and_then(domain_of_url)
            .or_else(|| extract_domain(text));

        let Some(domain) = domain else {
            return (None, TrustLevel::Unknown);
        };

        let levels = self.resolve(std::slice::from_ref(&domain), meter).await;
        let level = levels.get(&domain).copied().unwrap_or_default();
        (Some(domain), level)
    }

    /// Trust tier for every URL; URLs without a parsable host map to Unknown.
    pub async fn resolve_urls(
        &self,
        urls: &[String],
        meter: &UsageMeter,
    ) -> HashMap<String, TrustLevel> {
        let url_domains: Vec<(String, Option<String>)> = urls
            .iter()
            .map(|u| (u.clone(), domain_of_url(u)))
            .collect();
        let domains: Vec<String> = url_domains
            .iter()
            .filter_map(|(_, d)| d.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let levels = self.resolve(&domains, meter).await;

        url_domains
            .into_iter()
            .map(|(url, domain)| {
                let level = domain
                    .and_then(|d| levels.get(&d).copied())
                    .unwrap_or_default();
                (url, level)
            })
            .collect()
    }

    /// Resolve a batch of normalised domains. Never fails; unresolvable
    /// domains are reported as Unknown.
    pub async fn resolve(
        &self,
        domains: &[String],
        meter: &UsageMeter,
    ) -> HashMap<String, TrustLevel> {
        let mut resolved: HashMap<String, TrustLevel> = HashMap::new();
        let mut pending: Vec<&String> = Vec::new();

        for domain in domains {
            match self.cached(domain) {
                Some(level) => {
                    resolved.insert(domain.clone(), level);
                }
                None => pending.push(domain),
            }
        }

        if pending.is_empty() {
            return resolved;
        }

        // Persistent store, one query for every candidate of every pending domain.
        let all_candidates: Vec<String> = pending
            .iter()
            .flat_map(|d| candidates(d))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let stored = match self.store.lookup(&all_candidates).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Trust store lookup failed, treating as miss");
                HashMap::new()
            }
        };

        if !stored.is_empty() {
            self.write_cache(stored.values().cloned());
        }

        let mut unknown: Vec<String> = Vec::new();
        for domain in pending {
            let hit = candidates(domain)
                .iter()
                .find_map(|c| stored.get(c))
                .map(SourceRecord::trust_level);
            match hit {
                Some(level) => {
                    resolved.insert(domain.clone(), level);
                }
                None => unknown.push(domain.clone()),
            }
        }

        if !unknown.is_empty() {
            let assessed = self.assess_unknown(&unknown, meter).await;
            for domain in unknown {
                let level = assessed
                    .get(&domain)
                    .map(SourceRecord::trust_level)
                    .unwrap_or_default();
                resolved.insert(domain, level);
            }
        }

        resolved
    }

    fn cached(&self, domain: &str) -> Option<TrustLevel> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        candidates(domain)
            .into_iter()
            .find_map(|c| cache.get(&c))
            .map(|r| r.trust_level())
    }

    fn write_cache(&self, records: impl IntoIterator<Item = SourceRecord>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            cache.insert(record.domain.clone(), record);
        }
    }

    /// One LLM call for all unknown domains.
    async fn assess_unknown(
        &self,
        domains: &[String],
        meter: &UsageMeter,
    ) -> HashMap<String, SourceRecord> {
        let Some(llm) = &self.llm else {
            return HashMap::new();
        };

        let listing = domains
            .iter()
            .map(|d| format!("- {d}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render_prompt(&self.prompt, &[("domains", &listing)]);
        let wanted: HashSet<&str> = domains.iter().map(String::as_str).collect();

        let result = llm
            .complete_structured(
                "",
                &prompt,
                self.attempts,
                meter,
                |resp: CredibilityResponse| {
                    if resp.sources.is_empty() {
                        return Err(ParseError("no sources in credibility response".into()));
                    }
                    Ok(resp.sources)
                },
            )
            .await;

        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(domains = domains.len(), error = %e, "Source credibility assessment failed");
                return HashMap::new();
            }
        };

        let records: Vec<SourceRecord> = entries
            .into_iter()
            .filter_map(|e| {
                let domain = e.domain.trim().to_lowercase();
                let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
                wanted.contains(domain.as_str()).then(|| SourceRecord {
                    domain,
                    name: e.name,
                    bias: e.bias,
                    credibility: e.credibility.trim().to_uppercase(),
                    country: String::new(),
                })
            })
            .collect();

        tracing::info!(
            requested = domains.len(),
            assessed = records.len(),
            "Assessed unknown source domains"
        );

        self.write_cache(records.iter().cloned());

        let known: Vec<SourceRecord> = records
            .iter()
            .filter(|r| r.trust_level() != TrustLevel::Unknown)
            .cloned()
            .collect();
        if !known.is_empty() {
            if let Err(e) = self.store.upsert(&known).await {
                tracing::warn!(error = %e, "Failed to persist assessed source records");
            }
        }

        records.into_iter().map(|r| (r.domain.clone(), r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::llm::mock::ScriptedLlm;
    use crate::llm::SlidingWindowLimiter;
    use crate::store::MemoryTrustStore;

    fn record(domain: &str, credibility: &str) -> SourceRecord {
        SourceRecord {
            domain: domain.into(),
            name: String::new(),
            bias: String::new(),
            credibility: credibility.into(),
            country: String::new(),
        }
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

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("Read https://www.Example.com/a/b and http://other.org"),
            Some("example.com".into())
        );
        assert_eq!(extract_domain("no links here"), None);
    }

    #[test]
    fn test_domain_of_url() {
        assert_eq!(
            domain_of_url("https://www.bbc.co.uk/news/1"),
            Some("bbc.co.uk".into())
        );
        assert_eq!(domain_of_url("not a url"), None);
        assert_eq!(domain_of_url("http://localhost/x"), None);
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates("a.news.example.com"),
            vec!["a.news.example.com", "news.example.com", "example.com"]
        );
        assert_eq!(candidates("example.com"), vec!["example.com"]);
    }

    #[tokio::test]
    async fn test_subdomain_inherits_parent_record() {
        let store = Arc::new(MemoryTrustStore::new([record("example.com", "VERY LOW")]));
        let analyzer = MetadataAnalyzer::new(store, None, "{{domains}}", 1);
        let meter = UsageMeter::new("none");

        let (domain, level) = analyzer
            .analyze("", Some("https://news.example.com/story"), &meter)
            .await;
        assert_eq!(domain.as_deref(), Some("news.example.com"));
        assert_eq!(level, TrustLevel::Low);
    }

    #[tokio::test]
    async fn test_no_domain_is_unknown() {
        let analyzer =
            MetadataAnalyzer::new(Arc::new(MemoryTrustStore::default()), None, "{{domains}}", 1);
        let meter = UsageMeter::new("none");
        let (domain, level) = analyzer.analyze("plain text", None, &meter).await;
        assert!(domain.is_none());
        assert_eq!(level, TrustLevel::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_domains_batched_into_one_call_and_cached() {
        let llm = Arc::new(ScriptedLlm::ok(&[r#"{"sources": [
            {"domain": "alpha.org", "name": "Alpha", "credibility": "high", "bias": "center"},
            {"domain": "beta.net", "credibility": "LOW", "bias": "right"}
        ]}"#]));
        let store = Arc::new(MemoryTrustStore::default());
        let analyzer = MetadataAnalyzer::new(store.clone(), Some(stage(llm.clone())), "{{domains}}", 2);
        let meter = UsageMeter::new("scripted");

        let urls = vec![
            "https://alpha.org/a".to_string(),
            "https://beta.net/b".to_string(),
            "https://www.alpha.org/c".to_string(),
        ];
        let levels = analyzer.resolve_urls(&urls, &meter).await;

        assert_eq!(levels[&urls[0]], TrustLevel::High);
        assert_eq!(levels[&urls[1]], TrustLevel::Low);
        assert_eq!(levels[&urls[2]], TrustLevel::High);
        assert_eq!(llm.calls(), 1);
        assert_eq!(store.len(), 2);

        // Second resolution is served from the in-process cache.
        let again = analyzer.resolve(&["beta.net".to_string()], &meter).await;
        assert_eq!(again["beta.net"], TrustLevel::Low);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_unknown() {
        let llm = Arc::new(ScriptedLlm::ok(&["garbage", "still garbage"]));
        let analyzer = MetadataAnalyzer::new(
            Arc::new(MemoryTrustStore::default()),
            Some(stage(llm)),
            "{{domains}}",
            2,
        );
        let meter = UsageMeter::new("scripted");
        let levels = analyzer.resolve(&["mystery.info".to_string()], &meter).await;
        assert_eq!(levels["mystery.info"], TrustLevel::Unknown);
    }

    #[tokio::test]
    async fn test_cache_evicts_least_recently_used_domain() {
        let store = Arc::new(MemoryTrustStore::new([
            record("alpha.org", "HIGH"),
            record("beta.net", "LOW"),
            record("gamma.com", "MIXED"),
        ]));
        let analyzer =
            MetadataAnalyzer::new(store, None, "{{domains}}", 1).with_cache_capacity(2);
        let meter = UsageMeter::new("none");

        analyzer.resolve(&["alpha.org".to_string()], &meter).await;
        analyzer.resolve(&["beta.net".to_string()], &meter).await;
        assert_eq!(analyzer.cached("alpha.org"), Some(TrustLevel::High));
        analyzer.resolve(&["gamma.com".to_string()], &meter).await;

        assert_eq!(analyzer.cache.lock().unwrap().len(), 2);
        assert_eq!(analyzer.cached("beta.net"), None);
        assert_eq!(analyzer.cached("alpha.org"), Some(TrustLevel::High));
        assert_eq!(analyzer.cached("gamma.com"), Some(TrustLevel::Neutral));
    }
}
