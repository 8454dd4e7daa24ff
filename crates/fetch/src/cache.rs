use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Extracted page text as served to callers.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedPage {
    pub content: String,
    pub status_code: u16,
    pub content_type: Option<String>,
}

/// In-memory page cache with TTL expiry and a size bound.
///
/// When full, expired entries are dropped first, then the oldest insert.
pub struct PageCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    capacity: usize,
}

struct CacheEntry {
    page: CachedPage,
    inserted_at: Instant,
}

impl PageCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, url: &str) -> Option<CachedPage> {
        match self.entries.get(url) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                metrics::counter!("fetch.cache.hit").increment(1);
                Some(entry.page.clone())
            }
            _ => {
                metrics::counter!("fetch.cache.miss").increment(1);
                None
            }
        }
    }

    pub fn insert(&mut self, url: String, page: CachedPage) {
        if !self.entries.contains_key(&url) && self.entries.len() >= self.capacity {
            let ttl = self.ttl;
            self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

            if self.entries.len() >= self.capacity {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone());
                if let Some(key) = oldest {
                    self.entries.remove(&key);
                }
            }
        }

        self.entries.insert(
            url,
            CacheEntry {
                page,
                inserted_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
