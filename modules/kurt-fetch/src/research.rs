//! Research: web search through the research provider, with optional
//! capture of results as documents.

use serde::Serialize;
use tracing::info;

use kurt_store::{DocumentStore, StagingStore};
use tavily_client::TavilyClient;

use crate::error::{FetchError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ResearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub query: String,
    pub hits: Vec<ResearchHit>,
    pub saved_documents: usize,
}

pub struct Research {
    client: TavilyClient,
    documents: DocumentStore,
    staging: StagingStore,
}

impl Research {
    pub fn new(api_key: &str, documents: DocumentStore, staging: StagingStore) -> Self {
        Self {
            client: TavilyClient::new(api_key),
            documents,
            staging,
        }
    }

    /// Search the web. With `save`, each hit becomes a discovered document
    /// ready for the fetch pipeline.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        recency_days: Option<u32>,
        save: bool,
        workflow_id: &str,
    ) -> Result<ResearchOutcome> {
        let results = self
            .client
            .search(query, max_results, recency_days)
            .await
            .map_err(|e| FetchError::Engine(format!("[Tavily] {e}")))?;

        let hits: Vec<ResearchHit> = results
            .into_iter()
            .map(|r| ResearchHit {
                url: r.url,
                title: r.title,
                snippet: r.snippet,
            })
            .collect();

        let mut saved = 0;
        if save {
            for hit in &hits {
                let (row, created) = self
                    .documents
                    .create_or_get(&hit.url, "url", Some(&hit.title))
                    .await?;
                self.staging
                    .record_discovery(workflow_id, &row.id, "research")
                    .await?;
                if created {
                    saved += 1;
                }
            }
        }

        info!(query, hits = hits.len(), saved, "research search complete");
        Ok(ResearchOutcome {
            query: query.to_string(),
            hits,
            saved_documents: saved,
        })
    }
}
