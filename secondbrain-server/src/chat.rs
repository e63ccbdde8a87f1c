//! Chat orchestration
//!
//! One request drives the model through an explicit step machine:
//!
//! ```text
//! AwaitingModel -> ToolCallsPending -> ToolResults -> AwaitingModel
//!       |                                   |
//!       +--------------> Finished <---------+
//! ```
//!
//! Every observable event is pushed into the response channel as a
//! [`StreamPart`]. A failed send means the client went away and the loop stops.

use std::time::Duration;

use futures::future::try_join_all;
use secondbrain_core::llm::{
    ChatStreamEvent, FinishReason, LlmError, PromptMessage, ToolCall, ToolSchema, Usage,
};
use secondbrain_core::models::{ChatMessage, Role};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::prompt::{tool_schemas, SYSTEM_PROMPT};
use crate::state::AppState;
use crate::stream::StreamPart;
use crate::tools::{execute_tool, ToolError};

/// The only error text clients ever see.
pub const GENERIC_ERROR: &str = "An error occurred.";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Request exceeded {0}s")]
    Timeout(u64),

    #[error("Client disconnected")]
    Disconnected,
}

#[derive(Debug)]
enum Step {
    AwaitingModel,
    ToolCallsPending {
        text: String,
        calls: Vec<ToolCall>,
        reason: FinishReason,
        usage: Usage,
    },
    ToolResults {
        text: String,
        calls: Vec<ToolCall>,
        results: Vec<Value>,
        reason: FinishReason,
        usage: Usage,
    },
    Finished {
        reason: FinishReason,
    },
}

/// What one streamed model call produced.
#[derive(Debug)]
struct ModelTurn {
    text: String,
    calls: Vec<ToolCall>,
    reason: FinishReason,
    usage: Usage,
}

/// Convert the UI conversation into provider messages behind `system`.
///
/// Assistant turns with completed tool invocations become an assistant
/// tool-call message followed by one tool message per result. Invocations
/// still waiting for a result are dropped, as are bare tool-role messages.
pub fn to_prompt_messages(system: &str, messages: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(PromptMessage::system(system));

    for msg in messages {
        match msg.role {
            Role::System => out.push(PromptMessage::system(msg.content.clone())),
            Role::User => out.push(PromptMessage::user(msg.content.clone())),
            Role::Assistant => {
                let completed: Vec<_> = msg
                    .tool_invocations
                    .iter()
                    .filter_map(|inv| inv.result.as_ref().map(|r| (inv, r)))
                    .collect();

                if completed.is_empty() {
                    if !msg.content.is_empty() {
                        out.push(PromptMessage::assistant(msg.content.clone()));
                    }
                    continue;
                }

                let calls = completed
                    .iter()
                    .map(|(inv, _)| ToolCall {
                        id: inv.tool_call_id.clone(),
                        name: inv.tool_name.clone(),
                        arguments: inv.args.to_string(),
                    })
                    .collect();
                let content = (!msg.content.is_empty()).then(|| msg.content.clone());
                out.push(PromptMessage::assistant_tool_calls(content, calls));
                for (inv, result) in completed {
                    out.push(PromptMessage::tool_result(
                        inv.tool_call_id.clone(),
                        result.to_string(),
                    ));
                }
            }
            Role::Tool => {
                tracing::debug!("Dropping tool-role message without a call id");
            }
        }
    }
    out
}

fn add_usage(total: Usage, step: Usage) -> Usage {
    Usage {
        prompt_tokens: total.prompt_tokens.saturating_add(step.prompt_tokens),
        completion_tokens: total.completion_tokens.saturating_add(step.completion_tokens),
    }
}

async fn send(tx: &mpsc::Sender<StreamPart>, part: StreamPart) -> Result<(), ChatError> {
    tx.send(part).await.map_err(|_| ChatError::Disconnected)
}

/// Stream one model call, forwarding text and tool calls as they complete.
async fn model_turn(
    state: &AppState,
    prompt: &[PromptMessage],
    tools: &[ToolSchema],
    tx: &mpsc::Sender<StreamPart>,
) -> Result<ModelTurn, ChatError> {
    let mut rx = state.model.stream_chat(prompt, tools).await?;

    let mut turn = ModelTurn {
        text: String::new(),
        calls: Vec::new(),
        reason: FinishReason::Unknown,
        usage: Usage::default(),
    };

    while let Some(event) = rx.recv().await {
        match event? {
            ChatStreamEvent::ContentDelta(delta) => {
                turn.text.push_str(&delta);
                send(tx, StreamPart::Text(delta)).await?;
            }
            ChatStreamEvent::ToolCallComplete(call) => {
                let args: Value = serde_json::from_str(&call.arguments).map_err(|e| {
                    ToolError::InvalidArguments {
                        tool: call.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                send(
                    tx,
                    StreamPart::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args,
                    },
                )
                .await?;
                turn.calls.push(call);
            }
            ChatStreamEvent::Finish { reason, usage } => {
                turn.reason = reason;
                turn.usage = usage;
            }
        }
    }

    Ok(turn)
}

async fn drive(
    state: &AppState,
    messages: &[ChatMessage],
    tx: &mpsc::Sender<StreamPart>,
) -> Result<(), ChatError> {
    let tools = tool_schemas(state.weather.is_some());
    let max_roundtrips = state.config.chat.max_tool_roundtrips;
    let mut prompt = to_prompt_messages(SYSTEM_PROMPT, messages);
    let mut total = Usage::default();
    let mut roundtrips = 0usize;
    let mut step = Step::AwaitingModel;

    loop {
        step = match step {
            Step::AwaitingModel => {
                let turn = model_turn(state, &prompt, &tools, tx).await?;
                total = add_usage(total, turn.usage);
                tracing::debug!(
                    roundtrip = roundtrips,
                    calls = turn.calls.len(),
                    reason = ?turn.reason,
                    "Model step complete"
                );

                if turn.calls.is_empty() {
                    send(
                        tx,
                        StreamPart::FinishStep {
                            finish_reason: turn.reason,
                            usage: turn.usage,
                            is_continued: false,
                        },
                    )
                    .await?;
                    Step::Finished {
                        reason: turn.reason,
                    }
                } else {
                    Step::ToolCallsPending {
                        text: turn.text,
                        calls: turn.calls,
                        reason: turn.reason,
                        usage: turn.usage,
                    }
                }
            }

            Step::ToolCallsPending {
                text,
                calls,
                reason,
                usage,
            } => {
                let results = try_join_all(calls.iter().map(|c| execute_tool(state, c))).await?;
                Step::ToolResults {
                    text,
                    calls,
                    results,
                    reason,
                    usage,
                }
            }

            Step::ToolResults {
                text,
                calls,
                results,
                reason,
                usage,
            } => {
                for (call, result) in calls.iter().zip(&results) {
                    send(
                        tx,
                        StreamPart::ToolResult {
                            tool_call_id: call.id.clone(),
                            result: result.clone(),
                        },
                    )
                    .await?;
                }
                send(
                    tx,
                    StreamPart::FinishStep {
                        finish_reason: reason,
                        usage,
                        is_continued: false,
                    },
                )
                .await?;

                let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
                let content = (!text.is_empty()).then_some(text);
                prompt.push(PromptMessage::assistant_tool_calls(content, calls));
                for (id, result) in ids.into_iter().zip(results) {
                    prompt.push(PromptMessage::tool_result(id, result.to_string()));
                }

                if roundtrips < max_roundtrips {
                    roundtrips += 1;
                    Step::AwaitingModel
                } else {
                    tracing::info!(max_roundtrips, "Tool roundtrip limit reached");
                    Step::Finished {
                        reason: FinishReason::ToolCalls,
                    }
                }
            }

            Step::Finished { reason } => {
                send(
                    tx,
                    StreamPart::FinishMessage {
                        finish_reason: reason,
                        usage: total,
                    },
                )
                .await?;
                return Ok(());
            }
        };
    }
}

/// Answer one conversation, writing stream parts into `tx` until done.
///
/// Failures are logged with their cause and reported to the client as a
/// single [`GENERIC_ERROR`] part. The whole run is bounded by
/// `chat.max_duration_seconds`.
pub async fn run_chat(state: AppState, messages: Vec<ChatMessage>, tx: mpsc::Sender<StreamPart>) {
    let secs = state.config.chat.max_duration_seconds;
    let outcome = tokio::time::timeout(Duration::from_secs(secs), drive(&state, &messages, &tx)).await;

    let err = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(ChatError::Disconnected)) => {
            tracing::debug!("Client disconnected, chat stopped");
            return;
        }
        Ok(Err(e)) => e,
        Err(_) => ChatError::Timeout(secs),
    };

    tracing::error!(error = %err, "Chat request failed");
    let _ = tx.send(StreamPart::Error(GENERIC_ERROR.to_string())).await;
}
