use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecondBrainError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embeddings::EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
