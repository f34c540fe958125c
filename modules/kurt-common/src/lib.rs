pub mod config;
pub mod embedding;
pub mod error;
pub mod text;
pub mod types;

pub use config::KurtConfig;
pub use embedding::{
    bytes_to_embedding, cosine_similarity, embedding_to_bytes, NoOpEmbedder, TextEmbedder,
};
pub use error::KurtError;
pub use text::{claim_hash, content_hash, normalize_statement, truncate_chars};
pub use types::{
    Claim, ClaimType, DisplayStatus, Document, DocumentEntity, Entity, EntityType, FetchStatus,
    SourceType, WorkflowStatus,
};
