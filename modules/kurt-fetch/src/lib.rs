//! Fetch pipeline: engine-polymorphic document fetching with content
//! deduplication, file-based content storage, and discovery (map).

pub mod cms;
pub mod content_store;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod extract;
pub mod research;
pub mod steps;
pub mod workflow;

pub use cms::{CmsClient, CmsDocument, CmsRegistry};
pub use content_store::ContentStore;
pub use engine::{build_engine, EngineCredentials, EngineKind, FetchEngine, FetchedContent};
pub use error::FetchError;
pub use steps::{FetchConfig, FetchOutcome, FetchPipeline};
pub use workflow::{FetchTool, MapTool};
