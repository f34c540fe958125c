use serde::{Deserialize, Serialize};

/// A successfully extracted page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub url: String,
    pub markdown: String,
    pub metadata: serde_json::Value,
}

/// Per-URL extract outcome. The API reports failures inline rather than
/// failing the whole batch.
#[derive(Debug, Clone)]
pub enum ExtractOutcome {
    Page(ExtractedPage),
    Failed(String),
}

/// A web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
}
