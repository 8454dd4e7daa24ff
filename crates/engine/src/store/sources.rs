use std::collections::HashMap;
use std::sync::RwLock;

use claimcheck_common::types::SourceRecord;
use futures::future::BoxFuture;
use serde::Deserialize;

use super::{StoreClient, StoreError};

/// Keyed domain reputation lookup.
pub trait TrustStore: Send + Sync {
    /// Records for the given domains; domains without a record are absent.
    fn lookup<'a>(
        &'a self,
        domains: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, SourceRecord>, StoreError>>;

    /// Insert or replace records, keyed by domain.
    fn upsert<'a>(&'a self, records: &'a [SourceRecord]) -> BoxFuture<'a, Result<(), StoreError>>;
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    domain: String,
    name: String,
    bias: String,
    credibility: String,
    country: String,
}

impl From<SourceRow> for SourceRecord {
    fn from(row: SourceRow) -> Self {
        Self {
            domain: row.domain,
            name: row.name,
            bias: row.bias,
            credibility: row.credibility,
            country: row.country,
        }
    }
}

impl StoreClient {
    pub async fn lookup_sources(
        &self,
        domains: &[String],
    ) -> Result<HashMap<String, SourceRecord>, StoreError> {
        if domains.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT domain, name, bias, credibility, country
            FROM sources
            WHERE domain = ANY($1)
            "#,
        )
        .bind(domains)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| (row.domain.clone(), row.into()))
            .collect())
    }

    pub async fn upsert_sources(&self, records: &[SourceRecord]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO sources (domain, name, bias, credibility, country, updated_at)
                VALUES ($1, $2, $3, $4, $5, now())
                ON CONFLICT (domain) DO UPDATE
                SET name = EXCLUDED.name,
                    bias = EXCLUDED.bias,
                    credibility = EXCLUDED.credibility,
                    country = EXCLUDED.country,
                    updated_at = now()
                "#,
            )
            .bind(&record.domain)
            .bind(&record.name)
            .bind(&record.bias)
            .bind(&record.credibility)
            .bind(&record.country)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Import a media-bias dataset export. Returns the number of records written.
    pub async fn seed_sources(&self, export_json: &str) -> Result<usize, StoreError> {
        let records = parse_media_bias_export(export_json)?;
        self.upsert_sources(&records).await?;
        tracing::info!(records = records.len(), "Seeded source trust records");
        Ok(records.len())
    }
}

impl TrustStore for StoreClient {
    fn lookup<'a>(
        &'a self,
        domains: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, SourceRecord>, StoreError>> {
        Box::pin(self.lookup_sources(domains))
    }

    fn upsert<'a>(&'a self, records: &'a [SourceRecord]) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.upsert_sources(records))
    }
}

/// One entry of a media-bias dataset export.
#[derive(Clone, Debug, Deserialize)]
pub struct MediaBiasRecord {
    #[serde(default)]
    pub domain: Option<String>,
    /// Source home page; used when `domain` is absent.
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bias_rating: Option<String>,
    #[serde(default)]
    pub factual_reporting: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl MediaBiasRecord {
    /// Normalise into a store record. Entries without a usable domain are skipped.
    pub fn into_source_record(self) -> Option<SourceRecord> {
        let raw = self.domain.or(self.page)?;
        let domain = normalize_domain(&raw)?;
        Some(SourceRecord {
            domain,
            name: self.name.unwrap_or_default(),
            bias: self.bias_rating.unwrap_or_default(),
            credibility: self
                .factual_reporting
                .map(|f| f.trim().to_uppercase())
                .unwrap_or_default(),
            country: self.country.unwrap_or_default(),
        })
    }
}

/// Parse a JSON array export into normalised source records.
pub fn parse_media_bias_export(json: &str) -> Result<Vec<SourceRecord>, StoreError> {
    let entries: Vec<MediaBiasRecord> =
        serde_json::from_str(json).map_err(|e| StoreError::Seed(e.to_string()))?;
    Ok(entries
        .into_iter()
        .filter_map(MediaBiasRecord::into_source_record)
        .collect())
}

/// Host of a URL or bare domain, lowercased, without a leading "www.".
fn normalize_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let host = url::Url::parse(&with_scheme).ok()?.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    host.contains('.').then_some(host)
}

/// In-memory trust store used by tests and when Postgres is not configured.
#[derive(Default)]
pub struct MemoryTrustStore {
    records: RwLock<HashMap<String, SourceRecord>>,
}

impl MemoryTrustStore {
    pub fn new(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.domain.clone(), r))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrustStore for MemoryTrustStore {
    fn lookup<'a>(
        &'a self,
        domains: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, SourceRecord>, StoreError>> {
        let result = self
            .records
            .read()
            .map_err(|_| StoreError::Query("trust store lock poisoned".into()))
            .map(|records| {
                domains
                    .iter()
                    .filter_map(|d| records.get(d).map(|r| (d.clone(), r.clone())))
                    .collect()
            });
        Box::pin(async move { result })
    }

    fn upsert<'a>(&'a self, records: &'a [SourceRecord]) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = self
            .records
            .write()
            .map_err(|_| StoreError::Query("trust store lock poisoned".into()))
            .map(|mut map| {
                for record in records {
                    map.insert(record.domain.clone(), record.clone());
                }
            });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_normalises_domains() {
        let json = r#"[
            {"page": "https://www.reuters.com/", "name": "Reuters", "bias_rating": "center",
             "factual_reporting": "very high", "country": "UK"},
            {"domain": "InfoWars.com", "factual_reporting": "Very Low"},
            {"name": "no domain"}
        ]"#;

        let records = parse_media_bias_export(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].domain, "reuters.com");
        assert_eq!(records[0].credibility, "VERY HIGH");
        assert_eq!(records[1].domain, "infowars.com");
        assert_eq!(records[1].credibility, "VERY LOW");
    }

    #[test]
    fn test_invalid_export_is_seed_error() {
        assert!(matches!(
            parse_media_bias_export("{\"not\": \"an array\"}"),
            Err(StoreError::Seed(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_lookup_and_upsert() {
        let store = MemoryTrustStore::default();
        store
            .upsert(&[SourceRecord {
                domain: "apnews.com".into(),
                name: "AP".into(),
                bias: "center".into(),
                credibility: "HIGH".into(),
                country: "USA".into(),
            }])
            .await
            .unwrap();

        let found = store
            .lookup(&["apnews.com".into(), "unknown.org".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["apnews.com"].name, "AP");
        assert_eq!(store.len(), 1);
    }
}
