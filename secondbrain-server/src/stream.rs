//! Line-oriented data stream the chat UI consumes.
//!
//! Every part is one line: `<code>:<json>\n`.
//!
//! | code | part |
//! |------|------|
//! | `0` | text delta |
//! | `3` | error |
//! | `9` | tool call |
//! | `a` | tool result |
//! | `d` | finish message |
//! | `e` | finish step |

use secondbrain_core::llm::{FinishReason, Usage};
use serde_json::{json, Value};

/// Response header announcing the protocol version.
pub const STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    Text(String),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
    },
    Error(String),
    FinishStep {
        finish_reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
    FinishMessage {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

impl StreamPart {
    pub fn code(&self) -> char {
        match self {
            StreamPart::Text(_) => '0',
            StreamPart::Error(_) => '3',
            StreamPart::ToolCall { .. } => '9',
            StreamPart::ToolResult { .. } => 'a',
            StreamPart::FinishMessage { .. } => 'd',
            StreamPart::FinishStep { .. } => 'e',
        }
    }

    fn payload(&self) -> Value {
        match self {
            StreamPart::Text(text) | StreamPart::Error(text) => json!(text),
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => json!({
                "toolCallId": tool_call_id,
                "toolName": tool_name,
                "args": args,
            }),
            StreamPart::ToolResult {
                tool_call_id,
                result,
            } => json!({
                "toolCallId": tool_call_id,
                "result": result,
            }),
            StreamPart::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => json!({
                "finishReason": finish_reason,
                "usage": usage,
                "isContinued": is_continued,
            }),
            StreamPart::FinishMessage {
                finish_reason,
                usage,
            } => json!({
                "finishReason": finish_reason,
                "usage": usage,
            }),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.code(), self.payload())
    }

    /// Inverse of [`encode`](Self::encode) for a single line.
    pub fn decode(line: &str) -> Option<(char, Value)> {
        let (code, payload) = line.trim_end_matches('\n').split_once(':')?;
        let mut chars = code.chars();
        let code = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        serde_json::from_str(payload).ok().map(|v| (code, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_part_escapes_json() {
        let part = StreamPart::Text("say \"hi\"\n".to_string());
        assert_eq!(part.encode(), "0:\"say \\\"hi\\\"\\n\"\n");
    }

    #[test]
    fn test_tool_parts() {
        let call = StreamPart::ToolCall {
            tool_call_id: "call_1".into(),
            tool_name: "getWeather".into(),
            args: json!({"location": "Paris", "unit": "celsius"}),
        };
        let (code, v) = StreamPart::decode(&call.encode()).unwrap();
        assert_eq!(code, '9');
        assert_eq!(v["toolName"], "getWeather");
        assert_eq!(v["args"]["location"], "Paris");

        let result = StreamPart::ToolResult {
            tool_call_id: "call_1".into(),
            result: json!([]),
        };
        let encoded = result.encode();
        assert!(encoded.starts_with("a:{") && encoded.ends_with("}\n"));
        let (_, v) = StreamPart::decode(&encoded).unwrap();
        assert_eq!(v, json!({"toolCallId": "call_1", "result": []}));
    }

    #[test]
    fn test_finish_parts_use_kebab_reason_and_camel_usage() {
        let part = StreamPart::FinishMessage {
            finish_reason: FinishReason::ToolCalls,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 2,
            },
        };
        let (code, v) = StreamPart::decode(&part.encode()).unwrap();
        assert_eq!(code, 'd');
        assert_eq!(v["finishReason"], "tool-calls");
        assert_eq!(v["usage"]["promptTokens"], 10);
        assert_eq!(v["usage"]["completionTokens"], 2);

        let step = StreamPart::FinishStep {
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            is_continued: false,
        };
        let (code, v) = StreamPart::decode(&step.encode()).unwrap();
        assert_eq!(code, 'e');
        assert_eq!(v["isContinued"], false);
    }

    #[test]
    fn test_error_part() {
        assert_eq!(
            StreamPart::Error("An error occurred.".into()).encode(),
            "3:\"An error occurred.\"\n"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(StreamPart::decode("no colon").is_none());
        assert!(StreamPart::decode("ab:\"x\"").is_none());
        assert!(StreamPart::decode("0:not json").is_none());
    }
}
