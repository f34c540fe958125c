//! Indexing pipeline: section extraction, entity resolution, and the claim
//! clustering / resolution subsystem.

pub mod claim_clustering;
pub mod claim_resolution;
pub mod entity_resolution;
pub mod error;
pub mod sections;

pub use claim_clustering::{
    ClaimClusteringTool, ClusteringStats, CollectedClaim, Decision, DEFAULT_SIMILARITY_THRESHOLD,
};
pub use claim_resolution::{ClaimResolutionTool, ResolutionStats};
pub use entity_resolution::EntityResolutionTool;
pub use error::IndexError;
pub use sections::{SectionExtraction, SectionExtractionTool, SectionedDocument};
