//! Tavily API client: Extract (batch content extraction, max 20 URLs per
//! call) and Search.

pub mod error;
mod types;

pub use error::{Result, TavilyError};
pub use types::{ExtractOutcome, ExtractedPage, SearchResult};

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tracing::info;

/// Hard API limit on URLs per extract call.
pub const MAX_EXTRACT_BATCH: usize = 20;

const API_BASE: &str = "https://api.tavily.com";

pub struct TavilyClient {
    api_key: String,
    client: reqwest::Client,
}

impl TavilyClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Extract markdown content for up to 20 URLs in one call.
    ///
    /// Every requested URL gets an entry in the result map: a page on
    /// success, an error outcome otherwise. Timeout scales with batch size
    /// (60s base + 5s per additional URL).
    pub async fn extract(&self, urls: &[String]) -> Result<HashMap<String, ExtractOutcome>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }
        if urls.len() > MAX_EXTRACT_BATCH {
            return Err(TavilyError::BatchTooLarge(urls.len()));
        }

        let timeout = Duration::from_secs_f64(60.0 + (urls.len() as f64 - 1.0) * 5.0);
        let body = json!({
            "urls": if urls.len() == 1 { json!(urls[0]) } else { json!(urls) },
            "format": "markdown",
            "extract_depth": "advanced",
            "include_images": false,
        });

        let resp = self
            .client
            .post(format!("{API_BASE}/extract"))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TavilyError::from_status(status.as_u16(), message));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TavilyError::Parse(e.to_string()))?;

        let mut results: HashMap<String, ExtractOutcome> = HashMap::new();

        for item in data["results"].as_array().into_iter().flatten() {
            let Some(url) = item["url"].as_str() else { continue };
            let content = item["raw_content"].as_str().unwrap_or_default();
            if content.trim().is_empty() {
                results.insert(
                    url.to_string(),
                    ExtractOutcome::Failed(format!("Empty content from: {url}")),
                );
                continue;
            }

            let mut metadata = serde_json::Map::new();
            metadata.insert("source_url".to_string(), json!(url));
            if let Some(favicon) = item["favicon"].as_str() {
                metadata.insert("favicon".to_string(), json!(favicon));
            }
            if let Some(response_time) = data["response_time"].as_f64() {
                metadata.insert("response_time".to_string(), json!(response_time));
            }

            results.insert(
                url.to_string(),
                ExtractOutcome::Page(ExtractedPage {
                    url: url.to_string(),
                    markdown: content.to_string(),
                    metadata: serde_json::Value::Object(metadata),
                }),
            );
        }

        for failed in data["failed_results"].as_array().into_iter().flatten() {
            match failed {
                serde_json::Value::Object(map) => {
                    if let Some(url) = map.get("url").and_then(|v| v.as_str()) {
                        let error = map
                            .get("error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown error");
                        results
                            .insert(url.to_string(), ExtractOutcome::Failed(error.to_string()));
                    }
                }
                serde_json::Value::String(url) => {
                    results.insert(url.clone(), ExtractOutcome::Failed("Failed".to_string()));
                }
                _ => {}
            }
        }

        // Any requested URL the API didn't mention still gets an outcome.
        for url in urls {
            results
                .entry(url.clone())
                .or_insert_with(|| ExtractOutcome::Failed(format!("No result for: {url}")));
        }

        info!(requested = urls.len(), returned = results.len(), "Tavily extract complete");
        Ok(results)
    }

    /// Web search.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        recency_days: Option<u32>,
    ) -> Result<Vec<SearchResult>> {
        info!(query, max_results, "Tavily search");

        let mut body = json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "advanced",
            "include_answer": false,
        });
        if let Some(days) = recency_days {
            body["days"] = json!(days);
        }

        let resp = self
            .client
            .post(format!("{API_BASE}/search"))
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(TavilyError::from_status(status.as_u16(), message));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TavilyError::Parse(e.to_string()))?;

        let results = data["results"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        let url = r["url"].as_str()?.to_string();
                        let title = r["title"].as_str().unwrap_or("").to_string();
                        let snippet = r["content"].as_str().unwrap_or("").to_string();
                        Some(SearchResult { url, title, snippet })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        info!(query, count = results.len(), "Tavily search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extract_rejects_oversized_batch() {
        let client = TavilyClient::new("tvly-test");
        let urls: Vec<String> = (0..21).map(|i| format!("https://example.com/{i}")).collect();
        let err = client.extract(&urls).await.unwrap_err();
        assert!(matches!(err, TavilyError::BatchTooLarge(21)));
    }

    #[tokio::test]
    async fn extract_empty_batch_is_empty() {
        let client = TavilyClient::new("tvly-test");
        let results = client.extract(&[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn status_code_mapping() {
        assert!(matches!(
            TavilyError::from_status(401, String::new()),
            TavilyError::InvalidApiKey
        ));
        assert!(matches!(
            TavilyError::from_status(403, String::new()),
            TavilyError::UrlNotSupported
        ));
        assert!(matches!(
            TavilyError::from_status(429, String::new()),
            TavilyError::RateLimited
        ));
        assert!(matches!(TavilyError::from_status(432, String::new()), TavilyError::PlanLimit));
        assert!(matches!(
            TavilyError::from_status(500, String::new()),
            TavilyError::Api { status: 500, .. }
        ));
    }
}
