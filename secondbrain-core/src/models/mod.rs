pub mod embedding;
pub mod message;
pub mod resource;

pub use embedding::{ChunkEmbedding, EmbeddingRow, Match};
pub use message::{ChatMessage, Role, ToolInvocation};
pub use resource::Resource;
