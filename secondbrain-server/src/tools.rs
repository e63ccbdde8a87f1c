//! Tool execution for model-requested calls.

use secondbrain_core::llm::{LlmError, ToolCall};
use secondbrain_core::SecondBrainError;
use secondbrain_ingest::{create_resource, RESOURCE_CREATED};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::prompt::{ADD_RESOURCE, GET_INFORMATION, GET_WEATHER, UNDERSTAND_QUERY};
use crate::state::AppState;
use crate::subsystems::query::similar_questions;
use crate::subsystems::retrieve::search_questions;
use crate::subsystems::weather::{TemperatureUnit, WeatherError};

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] SecondBrainError),

    #[error("Weather error: {0}")]
    Weather(#[from] WeatherError),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Deserialize)]
struct AddResourceArgs {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetInformationArgs {
    question: String,
    #[serde(default)]
    similar_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UnderstandQueryArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct GetWeatherArgs {
    location: String,
    #[serde(default)]
    unit: TemperatureUnit,
}

fn parse_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_str(&call.arguments).map_err(|e| ToolError::InvalidArguments {
        tool: call.name.clone(),
        reason: e.to_string(),
    })
}

/// Run one tool call and return its JSON result.
///
/// Results are what the model sees on the next step and what the UI
/// receives in the tool-result part.
pub async fn execute_tool(state: &AppState, call: &ToolCall) -> Result<Value, ToolError> {
    tracing::info!(tool = %call.name, id = %call.id, "Executing tool");

    match call.name.as_str() {
        ADD_RESOURCE => {
            let args: AddResourceArgs = parse_args(call)?;
            create_resource(state.store.as_ref(), state.embedder.as_ref(), &args.content).await?;
            Ok(json!(RESOURCE_CREATED))
        }
        GET_INFORMATION => {
            let args: GetInformationArgs = parse_args(call)?;
            let mut questions = Vec::with_capacity(args.similar_questions.len() + 1);
            questions.push(args.question);
            questions.extend(args.similar_questions);

            let matches = search_questions(
                state.store.as_ref(),
                state.embedder.as_ref(),
                &state.config.retrieval,
                &questions,
            )
            .await?;
            Ok(json!(matches))
        }
        UNDERSTAND_QUERY => {
            let args: UnderstandQueryArgs = parse_args(call)?;
            let questions = similar_questions(
                state.model.as_ref(),
                &args.query,
                state.config.retrieval.max_similar_questions,
            )
            .await?;
            Ok(json!(questions))
        }
        GET_WEATHER => {
            let client = state
                .weather
                .as_ref()
                .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
            let args: GetWeatherArgs = parse_args(call)?;
            let report = client.current_weather(&args.location, args.unit).await?;
            Ok(json!(report))
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    #[test]
    fn test_get_information_args_default_similar_questions() {
        let args: GetInformationArgs =
            parse_args(&call(GET_INFORMATION, r#"{"question":"what is my name?"}"#)).unwrap();
        assert_eq!(args.question, "what is my name?");
        assert!(args.similar_questions.is_empty());

        let args: GetInformationArgs = parse_args(&call(
            GET_INFORMATION,
            r#"{"question":"q","similarQuestions":["a","b"]}"#,
        ))
        .unwrap();
        assert_eq!(args.similar_questions, vec!["a", "b"]);
    }

    #[test]
    fn test_weather_args_default_unit() {
        let args: GetWeatherArgs = parse_args(&call(GET_WEATHER, r#"{"location":"Oslo"}"#)).unwrap();
        assert_eq!(args.location, "Oslo");
        assert_eq!(args.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn test_malformed_arguments_name_the_tool() {
        let err = parse_args::<AddResourceArgs>(&call(ADD_RESOURCE, "{not json")).unwrap_err();
        match err {
            ToolError::InvalidArguments { tool, .. } => assert_eq!(tool, ADD_RESOURCE),
            other => panic!("Expected InvalidArguments, got {:?}", other),
        }
    }
}
