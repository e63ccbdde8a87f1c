//! Knowledge ingestion: chunking and resource creation.

pub mod chunker;
pub mod resources;

pub use chunker::generate_chunks;
pub use resources::{create_resource, generate_embeddings, RESOURCE_CREATED};
