//! Application context: config, database pool, stores, event sink, tool
//! registry, and the workflow runner. Built once at startup and passed
//! down — nothing reads ambient globals.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use kurt_common::embedding::{NoOpEmbedder, TextEmbedder};
use kurt_common::KurtConfig;
use kurt_events::PgEventSink;
use kurt_fetch::engine::{EngineCredentials, EngineKind};
use kurt_fetch::{CmsRegistry, ContentStore, FetchTool, MapTool};
use kurt_index::{
    ClaimClusteringTool, ClaimResolutionTool, EntityResolutionTool, SectionExtractionTool,
};
use kurt_runtime::{ToolRegistry, WorkflowRunner};
use kurt_store::Stores;
use llm_client::OpenAiCompatClient;

pub struct App {
    pub config: KurtConfig,
    pub stores: Stores,
    pub sink: Arc<PgEventSink>,
    pub runner: Arc<WorkflowRunner>,
    pub content_store: ContentStore,
    pub credentials: EngineCredentials,
    pub default_engine: EngineKind,
}

impl App {
    pub async fn init(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => KurtConfig::load(path)?,
            None => {
                let default = PathBuf::from("kurt.toml");
                if default.exists() {
                    KurtConfig::load(&default)?
                } else {
                    KurtConfig::default()
                }
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| config.get_str("DATABASE.URL").map(|s| s.to_string()))
            .context("DATABASE_URL is not set")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("database connection failed")?;

        Stores::migrate(&pool).await?;
        let sink = Arc::new(PgEventSink::new(pool.clone()));
        let stores = Stores::new(pool);
        let content_store = ContentStore::new(config.sources_path());

        let credentials = EngineCredentials {
            firecrawl_api_key: credential(&config, "FETCH.FIRECRAWL_API_KEY", "FIRECRAWL_API_KEY"),
            tavily_api_key: credential(&config, "RESEARCH.TAVILY_API_KEY", "TAVILY_API_KEY"),
        };
        let default_engine: EngineKind = config
            .fetch
            .default_engine
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let embedder = build_embedder(&config);
        let extract_agent = build_extract_agent(&config);

        let mut registry = ToolRegistry::new();
        let cms = CmsRegistry::new();
        registry.register(Arc::new(MapTool::new(
            stores.documents.clone(),
            stores.staging.clone(),
            content_store.clone(),
            cms.clone(),
        )));
        registry.register(Arc::new(FetchTool::new(
            stores.documents.clone(),
            stores.staging.clone(),
            content_store.clone(),
            cms.clone(),
            embedder.clone(),
            credentials.clone(),
            default_engine,
        )));
        registry.register(Arc::new(SectionExtractionTool::new(
            stores.documents.clone(),
            stores.staging.clone(),
            stores.claims.clone(),
            extract_agent,
            embedder.clone(),
            config.sources_path(),
        )));
        registry.register(Arc::new(EntityResolutionTool::new(
            stores.staging.clone(),
            stores.entities.clone(),
            embedder.clone(),
        )));
        registry.register(Arc::new(ClaimClusteringTool::new(
            stores.staging.clone(),
            stores.claims.clone(),
            embedder.clone(),
        )));
        registry.register(Arc::new(ClaimResolutionTool::new(
            stores.staging.clone(),
            stores.claims.clone(),
            stores.documents.clone(),
        )));

        let runner = Arc::new(WorkflowRunner::new(
            Arc::new(registry),
            Arc::new(stores.runs.clone()),
            sink.clone(),
        ));

        Ok(Self {
            config,
            stores,
            sink,
            runner,
            content_store,
            credentials,
            default_engine,
        })
    }
}

fn credential(config: &KurtConfig, config_key: &str, env_key: &str) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| config.credential(config_key).ok())
}

/// Embedding provider from the first configured key; silently a no-op
/// without one.
fn build_embedder(config: &KurtConfig) -> Arc<dyn TextEmbedder> {
    if let Ok(api_key) = std::env::var("VOYAGE_API_KEY") {
        if !api_key.is_empty() {
            let model = config.resolve_model_setting("indexing", None, "embedding_model", "voyage-3-large");
            let client = OpenAiCompatClient::new(&api_key, &model)
                .with_base_url("https://api.voyageai.com/v1")
                .with_embedding_model(&model);
            return Arc::new(ClientEmbedder { client });
        }
    }
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        if !api_key.is_empty() {
            let model = config.resolve_model_setting(
                "indexing",
                None,
                "embedding_model",
                "text-embedding-3-small",
            );
            let client = OpenAiCompatClient::new(&api_key, &model).with_embedding_model(&model);
            return Arc::new(ClientEmbedder { client });
        }
    }
    Arc::new(NoOpEmbedder)
}

fn build_extract_agent(config: &KurtConfig) -> Arc<dyn llm_client::ExtractAgent> {
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let model = config.resolve_model_setting(
        "indexing",
        Some("section_extractions"),
        "llm_model",
        "gpt-4o-mini",
    );
    Arc::new(OpenAiCompatClient::new(&api_key, &model))
}

/// Adapter from the OpenAI-compatible client onto the shared embedder trait.
struct ClientEmbedder {
    client: OpenAiCompatClient,
}

#[async_trait::async_trait]
impl TextEmbedder for ClientEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.client.embed(text.to_string()).await?)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(self.client.embed_batch(texts).await?)
    }
}
