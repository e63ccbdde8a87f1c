use pgvector::Vector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One chunk of a resource together with its vector.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmbeddingRow {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub content: String,
    pub embedding: Vector,
}

/// A chunk and its vector before it is attached to a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEmbedding {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Retrieval hit. `name` is the chunk text, kept under that key because the
/// model sees it verbatim in tool results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub name: String,
    pub similarity: f64,
}
