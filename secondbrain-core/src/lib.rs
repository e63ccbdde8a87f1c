pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod models;
pub mod store;

pub use config::{Environment, SecondBrainConfig};
pub use embeddings::{
    create_backend, generate_embedding, EmbeddingBackend, EmbeddingConfig, EmbeddingError,
    HashingEmbeddingClient, OpenAiEmbeddingClient, OPENAI_ADA_DIMENSIONS,
};
pub use error::SecondBrainError;
pub use llm::{LanguageModel, LlmError, OpenAiChatClient};
pub use store::{KnowledgeStore, MemoryKnowledgeStore, PgKnowledgeStore, StoreError};
