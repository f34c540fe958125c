//! CMS adapter contract. Providers plug in behind a narrow trait and a
//! registry keyed by `platform:instance`; provider-specific fields never
//! reach the core data model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FetchError, Result};

/// A document listed by a CMS.
#[derive(Debug, Clone)]
pub struct CmsDocument {
    pub cms_id: String,
    pub title: Option<String>,
    pub public_url: Option<String>,
}

#[async_trait]
pub trait CmsClient: Send + Sync {
    fn platform(&self) -> &str;

    /// List documents available in this CMS instance.
    async fn list_documents(&self) -> Result<Vec<CmsDocument>>;

    /// Fetch one document's content. Returns (markdown, metadata, public_url).
    async fn fetch_document(
        &self,
        cms_id: &str,
    ) -> Result<(String, serde_json::Value, Option<String>)>;
}

/// Registry of configured CMS clients keyed by `platform:instance`.
#[derive(Default, Clone)]
pub struct CmsRegistry {
    clients: HashMap<String, Arc<dyn CmsClient>>,
}

impl CmsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: &str, instance: &str, client: Arc<dyn CmsClient>) {
        self.clients.insert(format!("{platform}:{instance}"), client);
    }

    pub fn get(&self, platform: &str, instance: &str) -> Result<Arc<dyn CmsClient>> {
        self.clients
            .get(&format!("{platform}:{instance}"))
            .cloned()
            .ok_or_else(|| {
                FetchError::Cms(format!("no CMS client configured for {platform}:{instance}"))
            })
    }
}
