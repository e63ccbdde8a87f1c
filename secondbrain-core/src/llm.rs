//! Chat-completions client for OpenAI-compatible APIs
//!
//! Two calls are needed by the orchestrator:
//! - `stream_chat`: streamed completion with tool calling. Text deltas are
//!   forwarded as they arrive, tool-call fragments are assembled and emitted
//!   once the provider finishes the step.
//! - `generate_object`: one non-streamed completion constrained to a JSON schema.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::LlmSettings;
use crate::models::Role;

// ============================================================================
// Types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing API key")]
    MissingApiKey,
}

/// A message in the provider's prompt format.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Option<String>,
    /// Only set on assistant messages that requested tools.
    pub tool_calls: Vec<ToolCall>,
    /// Only set on tool-result messages.
    pub tool_call_id: Option<String>,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    fn to_openai(&self) -> Value {
        let role = match self.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let mut msg = json!({ "role": role, "content": self.content });
        if !self.tool_calls.is_empty() {
            msg["tool_calls"] = self
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments },
                    })
                })
                .collect();
        }
        if let Some(ref id) = self.tool_call_id {
            msg["tool_call_id"] = json!(id);
        }
        msg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    Unknown,
}

impl FinishReason {
    fn from_openai(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            Some("tool_calls") | Some("function_call") => Self::ToolCalls,
            Some(_) => Self::Other,
            None => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    ContentDelta(String),
    ToolCallComplete(ToolCall),
    Finish { reason: FinishReason, usage: Usage },
}

pub type ChatStream = mpsc::Receiver<Result<ChatStreamEvent, LlmError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a streamed completion. The receiver yields events until `Finish`
    /// or the first error.
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatStream, LlmError>;

    /// Single completion whose output must satisfy `schema`.
    async fn generate_object(
        &self,
        system: &str,
        prompt: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, LlmError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Streaming decode
// ============================================================================

/// Splits an SSE byte stream into `data:` payloads. Handles events that are
/// split across network chunks, including splits inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        // Only complete lines are decoded
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping non UTF-8 stream line");
                    continue;
                }
            };
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds OpenAI `chat.completion.chunk` payloads into `ChatStreamEvent`s.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    tool_calls: BTreeMap<u64, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamAccumulator {
    /// Feed one chunk; returns any text deltas it carried.
    pub fn push(&mut self, chunk: &Value) -> Vec<ChatStreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Usage {
                prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            };
        }

        let choice = &chunk["choices"][0];
        if choice.is_null() {
            return events;
        }

        let delta = &choice["delta"];
        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                events.push(ChatStreamEvent::ContentDelta(content.to_string()));
            }
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    entry.id.push_str(id);
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    entry.name.push_str(name);
                }
                if let Some(args) = fragment["function"]["arguments"].as_str() {
                    entry.arguments.push_str(args);
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        events
    }

    /// Completed tool calls in index order, then the `Finish` event.
    pub fn finish(self) -> Vec<ChatStreamEvent> {
        let mut events: Vec<ChatStreamEvent> = self
            .tool_calls
            .into_values()
            .filter(|tc| !tc.name.is_empty())
            .map(|tc| {
                ChatStreamEvent::ToolCallComplete(ToolCall {
                    id: tc.id,
                    name: tc.name,
                    arguments: if tc.arguments.trim().is_empty() {
                        "{}".to_string()
                    } else {
                        tc.arguments
                    },
                })
            })
            .collect();
        events.push(ChatStreamEvent::Finish {
            reason: FinishReason::from_openai(self.finish_reason.as_deref()),
            usage: self.usage,
        });
        events
    }
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
}

impl LlmConfig {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        Self { api_key, model }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        Self::with_base_url(
            LlmConfig::new(None, settings.model.clone()),
            settings.base_url.clone(),
        )
    }

    pub fn with_base_url(config: LlmConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        // No overall timeout: streamed responses stay open for the whole step.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            tracing::error!(code = status.as_u16(), message = %message, "Chat API error");
            return Err(LlmError::Api {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

fn format_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatStream, LlmError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages.iter().map(PromptMessage::to_openai).collect::<Vec<_>>(),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(format_tools(tools));
            body["tool_choice"] = json!("auto");
        }

        let response = self.post(&body).await?;
        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            let mut acc = StreamAccumulator::default();

            'read: while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Http(e))).await;
                        return;
                    }
                };
                for data in decoder.push(&bytes) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    let chunk: Value = match serde_json::from_str(&data) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed stream chunk");
                            continue;
                        }
                    };
                    for event in acc.push(&chunk) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            for event in acc.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn generate_object(
        &self,
        system: &str,
        prompt: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": schema_name, "strict": true, "schema": schema },
            },
        });

        let payload: Value = self.post(&body).await?.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("missing message content".into()))?;

        Ok(serde_json::from_str(content)?)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiChatClient {
        OpenAiChatClient::with_base_url(
            LlmConfig {
                api_key: "sk-test".to_string(),
                model: "gpt-4o".to_string(),
            },
            server.uri(),
        )
        .expect("client")
    }

    fn sse(chunks: &[Value]) -> String {
        let mut body = String::new();
        for c in chunks {
            body.push_str(&format!("data: {}\n\n", c));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn collect(mut rx: ChatStream) -> Vec<ChatStreamEvent> {
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev.expect("stream event"));
        }
        out
    }

    #[test]
    fn test_sse_decoder_joins_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let out = decoder.push(b"1}\n\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_chars_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&line[..split]).is_empty());
        let out = decoder.push(&line[split..]);
        assert_eq!(out.len(), 1);

        let chunk: Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"], "café");
    }

    #[test]
    fn test_accumulator_assembles_fragmented_tool_calls() {
        let mut acc = StreamAccumulator::default();
        acc.push(&json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"call_1","function":{"name":"getInformation","arguments":"{\"quest"}}
        ]}}]}));
        acc.push(&json!({"choices":[{"delta":{"tool_calls":[
            {"index":0,"function":{"arguments":"ion\":\"x\"}"}},
            {"index":1,"id":"call_2","function":{"name":"understandQuery","arguments":""}}
        ]}}]}));
        acc.push(&json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}));
        acc.push(&json!({"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}));

        let events = acc.finish();
        assert_eq!(
            events,
            vec![
                ChatStreamEvent::ToolCallComplete(ToolCall {
                    id: "call_1".into(),
                    name: "getInformation".into(),
                    arguments: "{\"question\":\"x\"}".into(),
                }),
                ChatStreamEvent::ToolCallComplete(ToolCall {
                    id: "call_2".into(),
                    name: "understandQuery".into(),
                    arguments: "{}".into(),
                }),
                ChatStreamEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: Usage {
                        prompt_tokens: 12,
                        completion_tokens: 3
                    },
                },
            ]
        );
    }

    #[test]
    fn test_prompt_message_serialisation() {
        let msg = PromptMessage::assistant_tool_calls(
            None,
            vec![ToolCall {
                id: "call_1".into(),
                name: "getWeather".into(),
                arguments: "{}".into(),
            }],
        );
        let v = msg.to_openai();
        assert_eq!(v["role"], "assistant");
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "getWeather");

        let v = PromptMessage::tool_result("call_1", "[]").to_openai();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn test_stream_chat_yields_text_then_finish() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices":[{"delta":{"role":"assistant","content":""}}]}),
            json!({"choices":[{"delta":{"content":"Your favorite "}}]}),
            json!({"choices":[{"delta":{"content":"color is blue."}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"stop"}]}),
        ]);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let rx = client(&server)
            .stream_chat(&[PromptMessage::user("hi")], &[])
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(
            events,
            vec![
                ChatStreamEvent::ContentDelta("Your favorite ".into()),
                ChatStreamEvent::ContentDelta("color is blue.".into()),
                ChatStreamEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: Usage::default()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_chat_sends_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "addResource"}}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse(&[]), "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tools = vec![ToolSchema {
            name: "addResource".into(),
            description: "add".into(),
            parameters: json!({"type": "object"}),
        }];
        let rx = client(&server)
            .stream_chat(&[PromptMessage::user("hi")], &tools)
            .await
            .unwrap();
        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(ChatStreamEvent::Finish { .. })));
    }

    #[tokio::test]
    async fn test_stream_chat_surfaces_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached for gpt-4o"}
            })))
            .mount(&server)
            .await;

        match client(&server).stream_chat(&[PromptMessage::user("hi")], &[]).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert!(message.contains("Rate limit"));
            }
            other => panic!("Expected Api error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_generate_object_parses_structured_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "response_format": {"type": "json_schema", "json_schema": {"name": "similar_questions"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "{\"questions\":[\"a?\",\"b?\"]}"
                }}]
            })))
            .mount(&server)
            .await;

        let out = client(&server)
            .generate_object("sys", "prompt", "similar_questions", &json!({"type": "object"}))
            .await
            .unwrap();
        assert_eq!(out["questions"][1], "b?");
    }

    #[test]
    fn test_missing_api_key() {
        let result = OpenAiChatClient::with_base_url(
            LlmConfig {
                api_key: String::new(),
                model: "gpt-4o".into(),
            },
            "http://localhost".into(),
        );
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }
}
