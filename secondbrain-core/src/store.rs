//! Knowledge store: persistence for resources and their chunk embeddings
//!
//! `PgKnowledgeStore` delegates similarity to pgvector's cosine distance
//! operator. `MemoryKnowledgeStore` computes the same contract in process and
//! backs the test suites.
//!
//! Contract of `find_similar`:
//! * score = 1 - cosine_distance(stored, query)
//! * only rows with score strictly greater than `threshold`
//! * ordered by score, highest first
//! * at most `limit` rows, distinct by chunk text

use std::collections::HashSet;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::embeddings::cosine_similarity;
use crate::models::{ChunkEmbedding, EmbeddingRow, Match, Resource};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Persist a resource and all of its chunks atomically.
    async fn insert_resource(
        &self,
        resource: &Resource,
        chunks: &[ChunkEmbedding],
    ) -> Result<(), StoreError>;

    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Match>, StoreError>;

    /// Backend-specific status for `/health`.
    async fn health_check(&self) -> Result<serde_json::Value, StoreError>;

    fn name(&self) -> &str;
}

/// Apply the threshold / order / distinct / limit rules to scored candidates.
pub fn select_matches(mut candidates: Vec<Match>, threshold: f64, limit: usize) -> Vec<Match> {
    candidates.retain(|m| m.similarity > threshold);
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|m| seen.insert(m.name.clone()))
        .take(limit)
        .collect()
}

// ============================================================================
// Postgres + pgvector
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgKnowledgeStore {
    pool: PgPool,
}

impl PgKnowledgeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn resource(&self, id: Uuid) -> Result<Option<Resource>, StoreError> {
        let resource = sqlx::query_as::<_, Resource>(
            "SELECT id, content, created_at, updated_at FROM resources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(resource)
    }

    /// Stored chunks of one resource, ordered by chunk text.
    pub async fn chunks_for(&self, resource_id: Uuid) -> Result<Vec<EmbeddingRow>, StoreError> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT id, resource_id, content, embedding
            FROM embeddings
            WHERE resource_id = $1
            ORDER BY content
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl KnowledgeStore for PgKnowledgeStore {
    async fn insert_resource(
        &self,
        resource: &Resource,
        chunks: &[ChunkEmbedding],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO resources (id, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(resource.id)
        .bind(&resource.content)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO embeddings (id, resource_id, content, embedding)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(resource.id)
            .bind(&chunk.content)
            .bind(Vector::from(chunk.embedding.clone()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            resource_id = %resource.id,
            chunks = chunks.len(),
            "Stored resource with embeddings"
        );
        Ok(())
    }

    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Match>, StoreError> {
        let vector = Vector::from(query.to_vec());

        let rows = sqlx::query_as::<_, (String, f64)>(
            r#"
            SELECT content, MAX(1 - (embedding <=> $1::vector)) AS similarity
            FROM embeddings
            WHERE 1 - (embedding <=> $1::vector) > $2
            GROUP BY content
            ORDER BY similarity DESC
            LIMIT $3
            "#,
        )
        .bind(&vector)
        .bind(threshold)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, similarity)| Match { name, similarity })
            .collect())
    }

    async fn health_check(&self) -> Result<serde_json::Value, StoreError> {
        let postgresql = crate::db::health_check(&self.pool).await?;
        let pgvector = match crate::db::check_pgvector(&self.pool).await {
            Ok(v) => v,
            Err(e) => format!("unavailable: {}", e),
        };
        Ok(serde_json::json!({
            "backend": self.name(),
            "postgresql": postgresql,
            "pgvector": pgvector,
        }))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Clone)]
struct StoredChunk {
    resource_id: Uuid,
    content: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct MemoryKnowledgeStore {
    resources: RwLock<Vec<Resource>>,
    chunks: RwLock<Vec<StoredChunk>>,
    dimensions: Option<usize>,
}

impl MemoryKnowledgeStore {
    /// `dimensions` pins the vector length every insert must match.
    pub fn new(dimensions: usize) -> Self {
        Self {
            resources: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            dimensions: Some(dimensions),
        }
    }

    pub async fn resource_count(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn chunks_for(&self, resource_id: Uuid) -> Vec<String> {
        self.chunks
            .read()
            .await
            .iter()
            .filter(|c| c.resource_id == resource_id)
            .map(|c| c.content.clone())
            .collect()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn insert_resource(
        &self,
        resource: &Resource,
        chunks: &[ChunkEmbedding],
    ) -> Result<(), StoreError> {
        if let Some(expected) = self.dimensions {
            if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: bad.embedding.len(),
                });
            }
        }

        let mut resources = self.resources.write().await;
        let mut stored = self.chunks.write().await;
        resources.push(resource.clone());
        stored.extend(chunks.iter().map(|c| StoredChunk {
            resource_id: resource.id,
            content: c.content.clone(),
            embedding: c.embedding.clone(),
        }));
        Ok(())
    }

    async fn find_similar(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<Match>, StoreError> {
        if let Some(expected) = self.dimensions {
            if query.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }

        let candidates = self
            .chunks
            .read()
            .await
            .iter()
            .map(|c| Match {
                name: c.content.clone(),
                similarity: cosine_similarity(&c.embedding, query),
            })
            .collect();
        Ok(select_matches(candidates, threshold, limit))
    }

    async fn health_check(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({
            "backend": self.name(),
            "resources": self.resources.read().await.len(),
            "embeddings": self.chunks.read().await.len(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
