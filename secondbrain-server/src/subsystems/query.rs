//! Query understanding: widens retrieval recall with model-written rephrasings.

use secondbrain_core::llm::{LanguageModel, LlmError};

use crate::prompt::{similar_questions_schema, understand_query_prompt, UNDERSTAND_QUERY_SYSTEM};

/// Ask the model for up to `max` questions similar to `query`.
pub async fn similar_questions(
    model: &dyn LanguageModel,
    query: &str,
    max: usize,
) -> Result<Vec<String>, LlmError> {
    let object = model
        .generate_object(
            UNDERSTAND_QUERY_SYSTEM,
            &understand_query_prompt(query, max),
            "similar_questions",
            &similar_questions_schema(),
        )
        .await?;

    let questions = object["questions"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("missing `questions` array".into()))?
        .iter()
        .filter_map(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .take(max)
        .map(str::to_string)
        .collect::<Vec<_>>();

    tracing::debug!(query = %query, count = questions.len(), "Generated similar questions");
    Ok(questions)
}
