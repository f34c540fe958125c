//! Runtime tools for the map and fetch steps.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use kurt_common::embedding::TextEmbedder;
use kurt_runtime::{ItemError, RuntimeError, StepContext, Tool, ToolResult};
use kurt_store::{DocumentStore, StagingStore};

use crate::cms::CmsRegistry;
use crate::content_store::ContentStore;
use crate::discovery::Discovery;
use crate::engine::{build_engine, EngineCredentials, EngineKind};
use crate::steps::{FetchConfig, FetchPipeline};

/// Discovery tool: `map` step. Config selects the source kind.
pub struct MapTool {
    documents: DocumentStore,
    staging: StagingStore,
    content_store: ContentStore,
    cms: CmsRegistry,
}

impl MapTool {
    pub fn new(
        documents: DocumentStore,
        staging: StagingStore,
        content_store: ContentStore,
        cms: CmsRegistry,
    ) -> Self {
        Self {
            documents,
            staging,
            content_store,
            cms,
        }
    }
}

fn string_list(config: &serde_json::Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Tool for MapTool {
    fn name(&self) -> &str {
        "map"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError> {
        let discovery = Discovery::new(
            self.documents.clone(),
            self.staging.clone(),
            self.content_store.clone(),
            self.cms.clone(),
        );

        let include = string_list(config, "include");
        let exclude = string_list(config, "exclude");
        let limit = config
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);

        ctx.set_event("stage", json!("mapping")).await;

        let outcome = if let Some(url) = config.get("url").and_then(|v| v.as_str()) {
            discovery
                .map_url(url, &include, &exclude, limit, &ctx.run_id)
                .await
        } else if let Some(folder) = config.get("folder").and_then(|v| v.as_str()) {
            discovery
                .map_folder(&PathBuf::from(folder), &include, &exclude, &ctx.run_id)
                .await
        } else if let Some(cms_ref) = config.get("cms").and_then(|v| v.as_str()) {
            let (platform, instance) = cms_ref.split_once(':').ok_or_else(|| {
                RuntimeError::Validation(format!("cms must be platform:instance, got {cms_ref}"))
            })?;
            discovery
                .map_cms(platform, instance, limit, &ctx.run_id)
                .await
        } else {
            return Err(RuntimeError::Validation(
                "map step needs one of: url, folder, cms".to_string(),
            ));
        };

        let outcome = outcome
            .map_err(|e| RuntimeError::StepFailed {
                step: ctx.step_id.clone(),
                message: e.to_string(),
            })?;

        ctx.log(&format!(
            "Discovered {} document(s) ({} new)",
            outcome.discovered, outcome.created
        ))
        .await;

        Ok(ToolResult {
            output_data: vec![json!({
                "discovered": outcome.discovered,
                "created": outcome.created,
                "existing": outcome.existing,
            })],
            errors: outcome
                .errors
                .iter()
                .map(|message| ItemError::new("discovery", "permanent", message))
                .collect(),
            metadata: json!({ "discovered": outcome.discovered }),
        })
    }
}

/// Fetch tool: `fetch` step. Engine selection is per-step config with the
/// instance default as fallback.
pub struct FetchTool {
    documents: DocumentStore,
    staging: StagingStore,
    content_store: ContentStore,
    cms: CmsRegistry,
    embedder: Arc<dyn TextEmbedder>,
    credentials: EngineCredentials,
    default_engine: EngineKind,
}

impl FetchTool {
    pub fn new(
        documents: DocumentStore,
        staging: StagingStore,
        content_store: ContentStore,
        cms: CmsRegistry,
        embedder: Arc<dyn TextEmbedder>,
        credentials: EngineCredentials,
        default_engine: EngineKind,
    ) -> Self {
        Self {
            documents,
            staging,
            content_store,
            cms,
            embedder,
            credentials,
            default_engine,
        }
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    async fn run(
        &self,
        _input_data: Vec<serde_json::Value>,
        config: &serde_json::Value,
        ctx: &StepContext,
    ) -> Result<ToolResult, RuntimeError> {
        let engine_kind = match config.get("engine").and_then(|v| v.as_str()) {
            Some(name) => name
                .parse::<EngineKind>()
                .map_err(RuntimeError::Validation)?,
            None => self.default_engine,
        };
        let engine = build_engine(engine_kind, &self.credentials).map_err(|e| {
            RuntimeError::Validation(e.to_string())
        })?;

        let fetch_config = FetchConfig {
            batch_size: config
                .get("batch_size")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize),
            concurrency: config
                .get("concurrency")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(5),
            embedding_max_chars: config
                .get("embedding_max_chars")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(1000),
            embedding_batch_size: config
                .get("embedding_batch_size")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(100),
            dry_run: config.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(false),
            delta: config.get("delta").and_then(|v| v.as_bool()).unwrap_or(false),
            reprocess_unchanged: config
                .get("reprocess_unchanged")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        // Document selection: explicit ids > source-type filters.
        let docs = if let Some(ids) = config.get("document_ids").and_then(|v| v.as_array()) {
            let ids: Vec<String> = ids
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            self.documents
                .get_many(&ids)
                .await
                .map_err(|e| RuntimeError::State(e.to_string()))?
        } else {
            let mut source_types = vec![];
            if config.get("urls").and_then(|v| v.as_bool()).unwrap_or(false) {
                source_types.push("url".to_string());
            }
            if config.get("files").and_then(|v| v.as_bool()).unwrap_or(false) {
                source_types.push("file".to_string());
            }
            let refetch = config
                .get("refetch")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let limit = config.get("limit").and_then(|v| v.as_i64());
            self.documents
                .list_for_fetch(&source_types, refetch, limit)
                .await
                .map_err(|e| RuntimeError::State(e.to_string()))?
        };

        let pipeline = FetchPipeline::new(
            self.documents.clone(),
            self.staging.clone(),
            self.content_store.clone(),
            Arc::from(engine),
            self.cms.clone(),
            self.embedder.clone(),
            fetch_config,
        );

        let outcome = pipeline.run(docs, ctx).await.map_err(|e| {
            RuntimeError::StepFailed {
                step: ctx.step_id.clone(),
                message: e.to_string(),
            }
        })?;

        // Per-URL failures are surfaced as item errors; the step itself
        // succeeds as long as the pipeline ran.
        let errors = if outcome.documents_failed > 0 {
            vec![ItemError::new(
                "fetch",
                "permanent",
                format!("{} document(s) failed", outcome.documents_failed),
            )]
        } else {
            vec![]
        };

        Ok(ToolResult {
            output_data: vec![serde_json::to_value(&outcome).unwrap_or(json!({}))],
            errors,
            metadata: json!({
                "fetched": outcome.documents_fetched,
                "failed": outcome.documents_failed,
                "skipped": outcome.documents_skipped,
            }),
        })
    }
}
