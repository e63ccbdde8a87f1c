//! Shared fixtures: a scripted language model and in-memory app state.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secondbrain_core::llm::{
    ChatStream, ChatStreamEvent, FinishReason, LanguageModel, LlmError, PromptMessage, ToolCall,
    ToolSchema, Usage,
};
use secondbrain_core::models::ChatMessage;
use secondbrain_core::{
    HashingEmbeddingClient, MemoryKnowledgeStore, SecondBrainConfig, OPENAI_ADA_DIMENSIONS,
};
use secondbrain_server::chat::run_chat;
use secondbrain_server::stream::StreamPart;
use secondbrain_server::subsystems::weather::WeatherClient;
use secondbrain_server::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const STEP_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 5,
};

pub enum Script {
    Events(Vec<Result<ChatStreamEvent, LlmError>>),
    /// A stream that never yields.
    Hang,
}

/// Replays one script per `stream_chat` call and records what it was sent.
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    questions: Value,
    pub prompts: Mutex<Vec<Vec<PromptMessage>>>,
    pub tools: Mutex<Vec<Vec<String>>>,
    open: Mutex<Vec<mpsc::Sender<Result<ChatStreamEvent, LlmError>>>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            questions: json!({ "questions": [] }),
            prompts: Mutex::new(Vec::new()),
            tools: Mutex::new(Vec::new()),
            open: Mutex::new(Vec::new()),
        }
    }

    /// Fixed output for query understanding.
    pub fn with_questions(mut self, questions: &[&str]) -> Self {
        self.questions = json!({ "questions": questions });
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, call: usize) -> Vec<PromptMessage> {
        self.prompts.lock().unwrap()[call].clone()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream_chat(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatStream, LlmError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".into()))?;

        match script {
            Script::Events(events) => {
                let (tx, rx) = mpsc::channel(events.len().max(1));
                for event in events {
                    tx.try_send(event).unwrap();
                }
                Ok(rx)
            }
            Script::Hang => {
                let (tx, rx) = mpsc::channel(1);
                self.open.lock().unwrap().push(tx);
                Ok(rx)
            }
        }
    }

    async fn generate_object(
        &self,
        _system: &str,
        _prompt: &str,
        _schema_name: &str,
        _schema: &Value,
    ) -> Result<Value, LlmError> {
        Ok(self.questions.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn text_step(text: &str) -> Script {
    Script::Events(vec![
        Ok(ChatStreamEvent::ContentDelta(text.to_string())),
        Ok(ChatStreamEvent::Finish {
            reason: FinishReason::Stop,
            usage: STEP_USAGE,
        }),
    ])
}

pub fn tool_step(calls: &[(&str, &str, Value)]) -> Script {
    let mut events: Vec<_> = calls
        .iter()
        .map(|(id, name, args)| {
            Ok(ChatStreamEvent::ToolCallComplete(ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: args.to_string(),
            }))
        })
        .collect();
    events.push(Ok(ChatStreamEvent::Finish {
        reason: FinishReason::ToolCalls,
        usage: STEP_USAGE,
    }));
    Script::Events(events)
}

pub struct Harness {
    pub state: AppState,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<MemoryKnowledgeStore>,
    pub embedder: Arc<HashingEmbeddingClient>,
}

pub fn harness(model: ScriptedModel) -> Harness {
    harness_with(model, SecondBrainConfig::default(), None)
}

pub fn harness_with(
    model: ScriptedModel,
    config: SecondBrainConfig,
    weather: Option<WeatherClient>,
) -> Harness {
    let model = Arc::new(model);
    let store = Arc::new(MemoryKnowledgeStore::new(OPENAI_ADA_DIMENSIONS));
    let embedder = Arc::new(HashingEmbeddingClient::new(OPENAI_ADA_DIMENSIONS));
    let state = AppState {
        config,
        model: model.clone(),
        embedder: embedder.clone(),
        store: store.clone(),
        weather,
    };
    Harness {
        state,
        model,
        store,
        embedder,
    }
}

/// Run a conversation to completion and return the decoded stream lines.
pub async fn run(state: &AppState, messages: Vec<ChatMessage>) -> Vec<(char, Value)> {
    let (tx, mut rx) = mpsc::channel(16);
    let task = tokio::spawn(run_chat(state.clone(), messages, tx));

    let mut parts = Vec::new();
    while let Some(part) = rx.recv().await {
        parts.push(StreamPart::decode(&part.encode()).expect("encoded part decodes"));
    }
    task.await.unwrap();
    parts
}

pub fn codes(parts: &[(char, Value)]) -> String {
    parts.iter().map(|(c, _)| *c).collect()
}

pub fn payloads(parts: &[(char, Value)], code: char) -> Vec<Value> {
    parts
        .iter()
        .filter(|(c, _)| *c == code)
        .map(|(_, v)| v.clone())
        .collect()
}
