//! Resource ingestion: chunk, embed, persist.

use secondbrain_core::embeddings::{EmbeddingBackend, EmbeddingError};
use secondbrain_core::models::{ChunkEmbedding, Resource};
use secondbrain_core::{KnowledgeStore, SecondBrainError};

use crate::chunker::generate_chunks;

/// Tool result text after a successful ingestion.
pub const RESOURCE_CREATED: &str = "Resource successfully created and embedded.";

/// Chunk `value` and embed every chunk in one batched call.
///
/// Returns pairs in chunk order. No chunks means no provider call.
pub async fn generate_embeddings(
    backend: &dyn EmbeddingBackend,
    value: &str,
) -> Result<Vec<ChunkEmbedding>, EmbeddingError> {
    let chunks = generate_chunks(value);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = backend.embed_many(&chunks).await?;
    if vectors.len() != chunks.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: chunks.len(),
            actual: vectors.len(),
        });
    }

    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(content, embedding)| ChunkEmbedding { content, embedding })
        .collect())
}

/// Store `content` as a new resource with one embedding per chunk.
///
/// Content that yields no chunks is rejected: every resource owns at least one
/// embedding. Provider and store errors are returned unchanged.
pub async fn create_resource(
    store: &dyn KnowledgeStore,
    backend: &dyn EmbeddingBackend,
    content: &str,
) -> Result<Resource, SecondBrainError> {
    let embeddings = generate_embeddings(backend, content).await?;
    if embeddings.is_empty() {
        return Err(SecondBrainError::InvalidInput(
            "content has no text to remember".to_string(),
        ));
    }

    let resource = Resource::new(content);
    store.insert_resource(&resource, &embeddings).await?;

    tracing::info!(
        resource_id = %resource.id,
        chunks = embeddings.len(),
        backend = backend.name(),
        store = store.name(),
        "Resource ingested"
    );
    Ok(resource)
}
