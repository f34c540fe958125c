//! Engine abstraction over content-extraction backends.
//!
//! Four engines with disparate batch characteristics: `trafilatura` and
//! `httpx` fetch one URL at a time (local extraction), `firecrawl` batches
//! without limit, `tavily` batches up to 20 URLs per call. All expose the
//! same per-URL result map so the pipeline stays uniform.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::extract::extract_html;

/// Extracted content plus engine metadata for one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedContent {
    pub markdown: String,
    pub metadata: serde_json::Value,
}

/// Per-URL outcome map: success or an isolated error. One URL's failure
/// never fails the batch.
pub type EngineResults = HashMap<String, std::result::Result<FetchedContent, String>>;

#[async_trait]
pub trait FetchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Largest URL batch one call may carry. None = unlimited.
    fn batch_limit(&self) -> Option<usize> {
        None
    }

    /// Whether the engine has a native batch API. Engines without one are
    /// scheduled one task per URL on the parallel queue instead.
    fn supports_batch(&self) -> bool {
        self.batch_limit().is_none() || self.batch_limit() > Some(1)
    }

    async fn fetch(&self, urls: &[String]) -> Result<EngineResults>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Trafilatura,
    Httpx,
    Firecrawl,
    Tavily,
}

impl EngineKind {
    pub fn is_batch(&self) -> bool {
        matches!(self, EngineKind::Firecrawl | EngineKind::Tavily)
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Trafilatura => write!(f, "trafilatura"),
            EngineKind::Httpx => write!(f, "httpx"),
            EngineKind::Firecrawl => write!(f, "firecrawl"),
            EngineKind::Tavily => write!(f, "tavily"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trafilatura" => Ok(Self::Trafilatura),
            "httpx" => Ok(Self::Httpx),
            "firecrawl" => Ok(Self::Firecrawl),
            "tavily" => Ok(Self::Tavily),
            other => Err(format!("unknown fetch engine: {other}")),
        }
    }
}

/// Credentials for the remote engines.
#[derive(Debug, Clone, Default)]
pub struct EngineCredentials {
    pub firecrawl_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
}

/// Engine factory. Remote engines require their credential.
pub fn build_engine(
    kind: EngineKind,
    credentials: &EngineCredentials,
) -> Result<Box<dyn FetchEngine>> {
    match kind {
        EngineKind::Trafilatura => Ok(Box::new(TrafilaturaEngine::new())),
        EngineKind::Httpx => Ok(Box::new(HttpxEngine::new())),
        EngineKind::Firecrawl => {
            let api_key = credentials.firecrawl_api_key.as_deref().ok_or_else(|| {
                FetchError::Config("FIRECRAWL_API_KEY is not configured".to_string())
            })?;
            Ok(Box::new(FirecrawlEngine::new(api_key)))
        }
        EngineKind::Tavily => {
            let api_key = credentials.tavily_api_key.as_deref().ok_or_else(|| {
                FetchError::Config("TAVILY_API_KEY is not configured".to_string())
            })?;
            Ok(Box::new(TavilyEngine::new(api_key)))
        }
    }
}

// --- trafilatura: plain GET + readability extraction ---

pub struct TrafilaturaEngine {
    client: reqwest::Client,
}

impl TrafilaturaEngine {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("kurt/0.1")
                .build()
                .expect("client builds"),
        }
    }
}

impl Default for TrafilaturaEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_and_extract(
    client: &reqwest::Client,
    url: &str,
    label: &str,
) -> std::result::Result<FetchedContent, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("[{label}] Download error: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("[{label}] HTTP {} from: {url}", response.status()));
    }

    let html = response
        .text()
        .await
        .map_err(|e| format!("[{label}] Download error: {e}"))?;
    if html.is_empty() {
        return Err(format!("[{label}] Failed to download (no content returned): {url}"));
    }

    let (markdown, metadata) =
        extract_html(&html, url).map_err(|e| format!("[{label}] {e}"))?;
    debug!(url, chars = markdown.len(), "extracted content");

    Ok(FetchedContent {
        markdown,
        metadata: metadata.to_json(),
    })
}

#[async_trait]
impl FetchEngine for TrafilaturaEngine {
    fn name(&self) -> &str {
        "trafilatura"
    }

    fn batch_limit(&self) -> Option<usize> {
        Some(1)
    }

    async fn fetch(&self, urls: &[String]) -> Result<EngineResults> {
        let mut results = EngineResults::new();
        for url in urls {
            let outcome = fetch_and_extract(&self.client, url, "Trafilatura").await;
            results.insert(url.clone(), outcome);
        }
        Ok(results)
    }
}

// --- httpx: redirect-following GET + readability extraction ---

pub struct HttpxEngine {
    client: reqwest::Client,
}

impl HttpxEngine {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()
                .expect("client builds"),
        }
    }
}

impl Default for HttpxEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchEngine for HttpxEngine {
    fn name(&self) -> &str {
        "httpx"
    }

    fn batch_limit(&self) -> Option<usize> {
        Some(1)
    }

    async fn fetch(&self, urls: &[String]) -> Result<EngineResults> {
        let mut results = EngineResults::new();
        for url in urls {
            let outcome = fetch_and_extract(&self.client, url, "httpx").await;
            results.insert(url.clone(), outcome);
        }
        Ok(results)
    }
}

// --- firecrawl: remote batch API ---

pub struct FirecrawlEngine {
    client: firecrawl_client::FirecrawlClient,
}

impl FirecrawlEngine {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: firecrawl_client::FirecrawlClient::new(api_key),
        }
    }
}

#[async_trait]
impl FetchEngine for FirecrawlEngine {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn fetch(&self, urls: &[String]) -> Result<EngineResults> {
        let outcomes = self
            .client
            .batch_scrape(urls)
            .await
            .map_err(|e| FetchError::Engine(format!("[Firecrawl] {e}")))?;

        Ok(outcomes
            .into_iter()
            .map(|(url, outcome)| {
                let mapped = match outcome {
                    firecrawl_client::ScrapeOutcome::Doc(doc) => Ok(FetchedContent {
                        markdown: doc.markdown,
                        metadata: doc.metadata,
                    }),
                    firecrawl_client::ScrapeOutcome::Failed(message) => {
                        Err(format!("[Firecrawl] {message}"))
                    }
                };
                (url, mapped)
            })
            .collect())
    }
}

// --- tavily: remote batch API, hard cap 20 URLs ---

pub struct TavilyEngine {
    client: tavily_client::TavilyClient,
}

impl TavilyEngine {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: tavily_client::TavilyClient::new(api_key),
        }
    }
}

#[async_trait]
impl FetchEngine for TavilyEngine {
    fn name(&self) -> &str {
        "tavily"
    }

    fn batch_limit(&self) -> Option<usize> {
        Some(tavily_client::MAX_EXTRACT_BATCH)
    }

    async fn fetch(&self, urls: &[String]) -> Result<EngineResults> {
        let outcomes = self
            .client
            .extract(urls)
            .await
            .map_err(|e| FetchError::Engine(format!("[Tavily] {e}")))?;

        Ok(outcomes
            .into_iter()
            .map(|(url, outcome)| {
                let mapped = match outcome {
                    tavily_client::ExtractOutcome::Page(page) => Ok(FetchedContent {
                        markdown: page.markdown,
                        metadata: page.metadata,
                    }),
                    tavily_client::ExtractOutcome::Failed(message) => {
                        Err(format!("[Tavily] {message}"))
                    }
                };
                (url, mapped)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parse_and_display() {
        assert_eq!("tavily".parse::<EngineKind>().unwrap(), EngineKind::Tavily);
        assert_eq!(EngineKind::Firecrawl.to_string(), "firecrawl");
        assert!("chrome".parse::<EngineKind>().is_err());
    }

    #[test]
    fn batch_engines_flagged() {
        assert!(EngineKind::Tavily.is_batch());
        assert!(EngineKind::Firecrawl.is_batch());
        assert!(!EngineKind::Trafilatura.is_batch());
        assert!(!EngineKind::Httpx.is_batch());
    }

    #[test]
    fn remote_engines_require_credentials() {
        let none = EngineCredentials::default();
        assert!(build_engine(EngineKind::Tavily, &none).is_err());
        assert!(build_engine(EngineKind::Firecrawl, &none).is_err());
        assert!(build_engine(EngineKind::Trafilatura, &none).is_ok());

        let with_keys = EngineCredentials {
            firecrawl_api_key: Some("fc-key".to_string()),
            tavily_api_key: Some("tvly-key".to_string()),
        };
        let tavily = build_engine(EngineKind::Tavily, &with_keys).unwrap();
        assert_eq!(tavily.batch_limit(), Some(20));
        let firecrawl = build_engine(EngineKind::Firecrawl, &with_keys).unwrap();
        assert_eq!(firecrawl.batch_limit(), None);
    }
}
