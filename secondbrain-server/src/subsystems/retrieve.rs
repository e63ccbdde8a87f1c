//! Retrieval subsystem: semantic search over stored chunk embeddings
//!
//! - Embeds each question with the configured backend
//! - Asks the knowledge store for chunks scoring above the threshold
//! - Runs one search per question concurrently and merges the results

use std::collections::HashSet;

use futures::future::try_join_all;
use secondbrain_core::config::RetrievalConfig;
use secondbrain_core::embeddings::{generate_embedding, EmbeddingBackend};
use secondbrain_core::models::Match;
use secondbrain_core::{KnowledgeStore, SecondBrainError};

/// Top matches for one free-text query.
///
/// # Constraints
/// * Score = 1 - cosine_distance
/// * Only scores strictly above `config.similarity_threshold`
/// * At most `config.limit` rows, distinct by content, best first
pub async fn find_relevant_content(
    store: &dyn KnowledgeStore,
    backend: &dyn EmbeddingBackend,
    config: &RetrievalConfig,
    query: &str,
) -> Result<Vec<Match>, SecondBrainError> {
    let embedded = generate_embedding(backend, query).await?;
    let matches = store
        .find_similar(&embedded, config.similarity_threshold, config.limit as usize)
        .await?;

    tracing::debug!(query = %query, hits = matches.len(), "Similarity search complete");
    Ok(matches)
}

/// Flatten per-question results keeping the first entry for each content text.
pub fn merge_matches(results: Vec<Vec<Match>>) -> Vec<Match> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .flatten()
        .filter(|m| seen.insert(m.name.clone()))
        .collect()
}

/// Search every question concurrently and merge.
///
/// Blank questions and exact duplicates are skipped before embedding.
pub async fn search_questions(
    store: &dyn KnowledgeStore,
    backend: &dyn EmbeddingBackend,
    config: &RetrievalConfig,
    questions: &[String],
) -> Result<Vec<Match>, SecondBrainError> {
    let mut unique = HashSet::new();
    let questions: Vec<&str> = questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty() && unique.insert(*q))
        .collect();

    let results = try_join_all(
        questions
            .iter()
            .map(|q| find_relevant_content(store, backend, config, q)),
    )
    .await?;

    let merged = merge_matches(results);
    tracing::info!(
        questions = questions.len(),
        matches = merged.len(),
        "Knowledge base searched"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secondbrain_core::{HashingEmbeddingClient, MemoryKnowledgeStore, OPENAI_ADA_DIMENSIONS};
    use secondbrain_ingest::create_resource;

    fn m(name: &str, similarity: f64) -> Match {
        Match {
            name: name.to_string(),
            similarity,
        }
    }

    #[test]
    fn test_merge_dedups_by_content() {
        let merged = merge_matches(vec![
            vec![m("The user's favorite color is blue", 0.8), m("I own a bike", 0.4)],
            vec![m("The user's favorite color is blue", 0.7)],
            vec![],
        ]);
        assert_eq!(
            merged,
            vec![m("The user's favorite color is blue", 0.8), m("I own a bike", 0.4)]
        );
    }

    #[tokio::test]
    async fn test_own_text_round_trips_above_threshold() {
        let backend = HashingEmbeddingClient::new(OPENAI_ADA_DIMENSIONS);
        let store = MemoryKnowledgeStore::new(OPENAI_ADA_DIMENSIONS);
        let config = RetrievalConfig::default();

        create_resource(&store, &backend, "My sister lives in Porto")
            .await
            .unwrap();

        let out = find_relevant_content(&store, &backend, &config, "My sister lives in Porto")
            .await
            .unwrap();
        assert_eq!(out[0].name, "My sister lives in Porto");
        assert!(out[0].similarity > 0.3);
    }

    #[tokio::test]
    async fn test_favorite_color_is_retrieved() {
        let backend = HashingEmbeddingClient::new(OPENAI_ADA_DIMENSIONS);
        let store = MemoryKnowledgeStore::new(OPENAI_ADA_DIMENSIONS);
        let config = RetrievalConfig::default();

        create_resource(&store, &backend, "The user's favorite color is blue.")
            .await
            .unwrap();
        create_resource(&store, &backend, "Rust compiles to native code.")
            .await
            .unwrap();

        let out = search_questions(
            &store,
            &backend,
            &config,
            &[
                "what is the user's favorite color?".to_string(),
                "which color does the user like?".to_string(),
                "".to_string(),
            ],
        )
        .await
        .unwrap();

        assert_eq!(out.len(), 1, "unexpected matches: {:?}", out);
        assert_eq!(out[0].name, "The user's favorite color is blue");
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let backend = HashingEmbeddingClient::new(OPENAI_ADA_DIMENSIONS);
        let store = MemoryKnowledgeStore::new(OPENAI_ADA_DIMENSIONS);
        let config = RetrievalConfig::default();

        let out = search_questions(&store, &backend, &config, &["anything?".to_string()])
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_limit_is_respected() {
        let backend = HashingEmbeddingClient::new(OPENAI_ADA_DIMENSIONS);
        let store = MemoryKnowledgeStore::new(OPENAI_ADA_DIMENSIONS);
        let config = RetrievalConfig::default();

        create_resource(
            &store,
            &backend,
            "Tea is green. Tea is black. Tea is white. Tea is oolong. Tea is yellow.",
        )
        .await
        .unwrap();

        let out = find_relevant_content(&store, &backend, &config, "Tea is")
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
    }
}
