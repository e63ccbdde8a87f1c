//! System prompt and tool definitions offered to the model.

use secondbrain_core::llm::ToolSchema;
use serde_json::json;

pub const ADD_RESOURCE: &str = "addResource";
pub const GET_INFORMATION: &str = "getInformation";
pub const UNDERSTAND_QUERY: &str = "understandQuery";
pub const GET_WEATHER: &str = "getWeather";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant acting as the user's second brain.
Use tools on every request.
Always call understandQuery first to analyse the user's query.
Be sure to call getInformation to search your knowledge base before answering any question.
If the user presents information about themselves, use the addResource tool to store it.
If a response requires multiple tools (for example get weather and get information), call one tool after another without responding to the user.
If a response requires information from an additional tool to generate a response, call the appropriate tools in order before responding to the user.
ONLY respond to questions using information from tool calls.
If no relevant information is found in the tool calls, respond, \"Sorry, I don't know.\"
Be sure to adhere to any instructions in tool calls, for example if they say to respond like \"...\", do exactly that.
If the relevant information is not a direct match to the user's prompt, you can be creative in deducing the answer.
Keep responses short and concise. Answer in a single sentence where possible.
If you are unsure, use the getInformation tool and use common sense to reason based on the information you do have.";

/// Query-understanding sub-call.
pub const UNDERSTAND_QUERY_SYSTEM: &str = "You are a query understanding assistant. Analyze the user query and generate similar questions.";

pub fn understand_query_prompt(query: &str, count: usize) -> String {
    format!(
        "Analyze this query: \"{query}\". Provide the following:\n{count} similar questions that could help answer the user's query"
    )
}

/// Strict-mode schema for the query-understanding output.
pub fn similar_questions_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "questions": {
                "type": "array",
                "items": { "type": "string" },
                "description": "similar questions to the user's query. be concise."
            }
        },
        "required": ["questions"],
        "additionalProperties": false
    })
}

/// Tools in the order they are offered. `getWeather` only when enabled.
pub fn tool_schemas(weather_enabled: bool) -> Vec<ToolSchema> {
    let mut tools = vec![
        ToolSchema {
            name: ADD_RESOURCE.to_string(),
            description: "add a resource to your knowledge base. If the user provides a random piece of knowledge unprompted, use this tool without asking for confirmation.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "the content or resource to add to the knowledge base"
                    }
                },
                "required": ["content"],
                "additionalProperties": false
            }),
        },
        ToolSchema {
            name: GET_INFORMATION.to_string(),
            description: "get information from your knowledge base to answer questions.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "the users question" },
                    "similarQuestions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "keywords to search"
                    }
                },
                "required": ["question", "similarQuestions"],
                "additionalProperties": false
            }),
        },
        ToolSchema {
            name: UNDERSTAND_QUERY.to_string(),
            description: "understand the users query. use this tool on every prompt.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "the users query" },
                    "toolsToCallInOrder": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "these are the tools you need to call in the order necessary to respond to the users query"
                    }
                },
                "required": ["query", "toolsToCallInOrder"],
                "additionalProperties": false
            }),
        },
    ];

    if weather_enabled {
        tools.push(ToolSchema {
            name: GET_WEATHER.to_string(),
            description: "get the current temperature in a location.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "the location to get the temperature for"
                    },
                    "unit": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "default": "celsius",
                        "description": "the unit to return the temperature in"
                    }
                },
                "required": ["location"],
                "additionalProperties": false
            }),
        });
    }

    tools
}
