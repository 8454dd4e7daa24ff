use std::collections::HashMap;
use std::sync::RwLock;

use futures::future::BoxFuture;
use pgvector::Vector;
use uuid::Uuid;

use claimcheck_common::ids::VectorEntryId;

use super::{StoreClient, StoreError};
use crate::embeddings::cosine_distance;

/// Entry to append to a semantic collection.
#[derive(Clone, Debug)]
pub struct NewVectorEntry {
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// Nearest-neighbour result. `distance` is cosine distance (0 = identical).
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub distance: f64,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// Distance-indexed semantic store, partitioned into named collections.
pub trait VectorIndex: Send + Sync {
    fn add<'a>(
        &'a self,
        collection: &'a str,
        entries: Vec<NewVectorEntry>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// The `k` nearest entries, closest first.
    fn query<'a>(
        &'a self,
        collection: &'a str,
        embedding: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, StoreError>>;
}

#[derive(sqlx::FromRow)]
struct VectorHitRow {
    document: String,
    metadata: serde_json::Value,
    distance: f64,
}

impl StoreClient {
    pub async fn add_vectors(
        &self,
        collection: &str,
        entries: Vec<NewVectorEntry>,
    ) -> Result<(), StoreError> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO vector_entries (id, collection, document, metadata, embedding)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(VectorEntryId::new().0)
            .bind(collection)
            .bind(&entry.document)
            .bind(&entry.metadata)
            .bind(Vector::from(entry.embedding))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn query_vectors(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let query_vec = Vector::from(embedding.to_vec());

        let rows = sqlx::query_as::<_, VectorHitRow>(
            r#"
            SELECT document, metadata, (embedding <=> $2::vector) AS distance
            FROM vector_entries
            WHERE collection = $1
            ORDER BY embedding <=> $2::vector
            LIMIT $3
            "#,
        )
        .bind(collection)
        .bind(query_vec)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| VectorHit {
                distance: row.distance,
                document: row.document,
                metadata: row.metadata,
            })
            .collect())
    }

    /// Drop every entry of a collection. Returns the number of rows removed.
    pub async fn clear_collection(&self, collection: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM vector_entries WHERE collection = $1")
            .bind(collection)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

impl VectorIndex for StoreClient {
    fn add<'a>(
        &'a self,
        collection: &'a str,
        entries: Vec<NewVectorEntry>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.add_vectors(collection, entries))
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        embedding: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, StoreError>> {
        Box::pin(self.query_vectors(collection, embedding, k))
    }
}

/// In-memory vector index (brute-force cosine distance).
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Vec<(Uuid, NewVectorEntry)>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl VectorIndex for MemoryVectorIndex {
    fn add<'a>(
        &'a self,
        collection: &'a str,
        entries: Vec<NewVectorEntry>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = self
            .collections
            .write()
            .map_err(|_| StoreError::Query("vector index lock poisoned".into()))
            .map(|mut collections| {
                collections
                    .entry(collection.to_string())
                    .or_default()
                    .extend(entries.into_iter().map(|e| (VectorEntryId::new().0, e)));
            });
        Box::pin(async move { result })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        embedding: &'a [f32],
        k: usize,
    ) -> BoxFuture<'a, Result<Vec<VectorHit>, StoreError>> {
        let result = self
            .collections
            .read()
            .map_err(|_| StoreError::Query("vector index lock poisoned".into()))
            .map(|collections| {
                let mut hits: Vec<VectorHit> = collections
                    .get(collection)
                    .map(|entries| {
                        entries
                            .iter()
                            .map(|(_, e)| VectorHit {
                                distance: cosine_distance(embedding, &e.embedding),
                                document: e.document.clone(),
                                metadata: e.metadata.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                hits.truncate(k);
                hits
            });
        Box::pin(async move { result })
    }
}
