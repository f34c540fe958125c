//! Firecrawl batch-scrape client.
//!
//! Batch scraping is asynchronous on the Firecrawl side: submit the URL list,
//! then poll the job until it completes. No batch size limit.

pub mod error;

pub use error::{FirecrawlError, Result};

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

const API_BASE: &str = "https://api.firecrawl.dev/v1";

/// Poll interval while a batch job is running.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A scraped document from a batch job.
#[derive(Debug, Clone)]
pub struct ScrapedDoc {
    pub url: String,
    pub markdown: String,
    pub metadata: serde_json::Value,
}

/// Per-URL batch outcome.
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Doc(ScrapedDoc),
    Failed(String),
}

pub struct FirecrawlClient {
    api_key: String,
    client: reqwest::Client,
    /// Overall deadline for one batch job, scaled by batch size at call time.
    base_timeout_secs: u64,
}

impl FirecrawlClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            base_timeout_secs: 60,
        }
    }

    /// Scrape a batch of URLs, blocking until the job finishes.
    ///
    /// Every requested URL gets an entry in the result map. Deadline is
    /// 60s + 5s per URL; an expired deadline is a job-level timeout error.
    pub async fn batch_scrape(&self, urls: &[String]) -> Result<HashMap<String, ScrapeOutcome>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let body = json!({
            "urls": urls,
            "formats": ["markdown", "html"],
        });

        let resp = self
            .client
            .post(format!("{API_BASE}/batch/scrape"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(FirecrawlError::InvalidApiKey);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FirecrawlError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let submitted: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FirecrawlError::Parse(e.to_string()))?;
        let job_id = submitted["id"]
            .as_str()
            .ok_or_else(|| FirecrawlError::Parse("missing batch job id".to_string()))?
            .to_string();

        info!(job_id = %job_id, urls = urls.len(), "Firecrawl batch submitted");

        let deadline_secs = self.base_timeout_secs + 5 * urls.len() as u64;
        let data = self.poll_job(&job_id, deadline_secs).await?;
        Ok(collect_outcomes(urls, &data))
    }

    async fn poll_job(&self, job_id: &str, deadline_secs: u64) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        loop {
            if started.elapsed().as_secs() > deadline_secs {
                return Err(FirecrawlError::Timeout(job_id.to_string(), deadline_secs));
            }

            let resp = self
                .client
                .get(format!("{API_BASE}/batch/scrape/{job_id}"))
                .bearer_auth(&self.api_key)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(FirecrawlError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let data: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| FirecrawlError::Parse(e.to_string()))?;

            match data["status"].as_str() {
                Some("completed") => return Ok(data),
                Some("failed") => {
                    return Err(FirecrawlError::Api {
                        status: 200,
                        message: format!("batch job {job_id} failed"),
                    })
                }
                other => {
                    debug!(job_id, status = ?other, "Firecrawl batch still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }
}

fn collect_outcomes(urls: &[String], data: &serde_json::Value) -> HashMap<String, ScrapeOutcome> {
    let mut results: HashMap<String, ScrapeOutcome> = HashMap::new();

    for doc in data["data"].as_array().into_iter().flatten() {
        let metadata = doc.get("metadata").cloned().unwrap_or(json!({}));
        let doc_url = metadata["sourceURL"]
            .as_str()
            .or_else(|| metadata["url"].as_str())
            .or_else(|| doc["url"].as_str());
        let Some(doc_url) = doc_url else { continue };

        match doc["markdown"].as_str() {
            Some(markdown) if !markdown.is_empty() => {
                results.insert(
                    doc_url.to_string(),
                    ScrapeOutcome::Doc(ScrapedDoc {
                        url: doc_url.to_string(),
                        markdown: markdown.to_string(),
                        metadata: normalize_metadata(metadata),
                    }),
                );
            }
            _ => {
                results.insert(
                    doc_url.to_string(),
                    ScrapeOutcome::Failed(format!("No content from: {doc_url}")),
                );
            }
        }
    }

    for url in urls {
        results
            .entry(url.clone())
            .or_insert_with(|| ScrapeOutcome::Failed(format!("No result for: {url}")));
    }

    results
}

/// Promote the first available title-ish key to `title`.
fn normalize_metadata(mut metadata: serde_json::Value) -> serde_json::Value {
    if let Some(map) = metadata.as_object_mut() {
        if !map.contains_key("title") {
            for key in ["ogTitle", "og:title", "twitter:title", "pageTitle"] {
                if let Some(value) = map.get(key).cloned() {
                    if !value.is_null() {
                        map.insert("title".to_string(), value);
                        break;
                    }
                }
            }
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_fills_missing_urls_as_failed() {
        let urls = vec!["https://a.com".to_string(), "https://b.com".to_string()];
        let data = json!({
            "status": "completed",
            "data": [
                {"markdown": "# A", "metadata": {"sourceURL": "https://a.com"}},
            ]
        });
        let outcomes = collect_outcomes(&urls, &data);
        assert!(matches!(outcomes["https://a.com"], ScrapeOutcome::Doc(_)));
        assert!(matches!(outcomes["https://b.com"], ScrapeOutcome::Failed(_)));
    }

    #[test]
    fn empty_markdown_is_failure() {
        let urls = vec!["https://a.com".to_string()];
        let data = json!({
            "status": "completed",
            "data": [
                {"markdown": "", "metadata": {"sourceURL": "https://a.com"}},
            ]
        });
        let outcomes = collect_outcomes(&urls, &data);
        assert!(matches!(outcomes["https://a.com"], ScrapeOutcome::Failed(_)));
    }

    #[test]
    fn metadata_title_promotion() {
        let normalized = normalize_metadata(json!({"ogTitle": "My Page"}));
        assert_eq!(normalized["title"], "My Page");
        let untouched = normalize_metadata(json!({"title": "Kept"}));
        assert_eq!(untouched["title"], "Kept");
    }
}
