//! The fetch pipeline: batch-aware scheduling across engines, content
//! storage with deduplication, embedding generation, and a single durable
//! persistence pass at the end.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use kurt_common::embedding::{embedding_to_bytes, TextEmbedder};
use kurt_common::text::content_hash;
use kurt_common::types::FetchStatus;
use kurt_store::rows::DocumentRow;
use kurt_store::staging::UpsertFetchDocument;
use kurt_store::{DocumentStore, StagingStore};
use kurt_runtime::{StepContext, SubTask};

use crate::cms::CmsRegistry;
use crate::content_store::ContentStore;
use crate::engine::FetchEngine;
use crate::error::{FetchError, Result};

/// Default parallelism for engines without a native batch API.
const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub batch_size: Option<usize>,
    pub concurrency: usize,
    pub embedding_max_chars: usize,
    pub embedding_batch_size: usize,
    pub dry_run: bool,
    /// Delta mode: skip documents whose content hash already matches the
    /// hash indexing last processed.
    pub delta: bool,
    /// Overrides the delta-mode hash match: process anyway.
    pub reprocess_unchanged: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            concurrency: DEFAULT_CONCURRENCY,
            embedding_max_chars: 1000,
            embedding_batch_size: 100,
            dry_run: false,
            delta: false,
            reprocess_unchanged: false,
        }
    }
}

/// Summary of one fetch run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FetchOutcome {
    pub total: usize,
    pub documents_fetched: usize,
    pub documents_failed: usize,
    pub documents_skipped: usize,
    pub rows_written: u64,
    pub rows_updated: u64,
    pub dry_run: bool,
}

/// In-flight fetch row, carried through save → embed → persist.
#[derive(Debug, Clone)]
struct FetchRow {
    document_id: String,
    source_url: Option<String>,
    status: FetchStatus,
    content: Option<String>,
    content_length: i64,
    content_hash: Option<String>,
    content_path: Option<String>,
    metadata: Option<serde_json::Value>,
    embedding: Option<Vec<u8>>,
    skip_reason: Option<String>,
    /// Content identical to the previous fetch; file not rewritten and the
    /// stored embedding is reused.
    unchanged: bool,
    error: Option<String>,
}

impl FetchRow {
    fn error_row(document_id: &str, source_url: Option<&str>, message: String) -> Self {
        Self {
            document_id: document_id.to_string(),
            source_url: source_url.map(|s| s.to_string()),
            status: FetchStatus::Error,
            content: None,
            content_length: 0,
            content_hash: None,
            content_path: None,
            metadata: None,
            embedding: None,
            skip_reason: None,
            unchanged: false,
            error: Some(message),
        }
    }

    fn success_row(
        document_id: &str,
        source_url: Option<&str>,
        content: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            document_id: document_id.to_string(),
            source_url: source_url.map(|s| s.to_string()),
            status: FetchStatus::Success,
            content_length: content.chars().count() as i64,
            content: Some(content),
            content_hash: None,
            content_path: None,
            metadata: Some(metadata),
            embedding: None,
            skip_reason: None,
            unchanged: false,
            error: None,
        }
    }
}

pub struct FetchPipeline {
    documents: DocumentStore,
    staging: StagingStore,
    content_store: ContentStore,
    engine: Arc<dyn FetchEngine>,
    cms: CmsRegistry,
    embedder: Arc<dyn TextEmbedder>,
    config: FetchConfig,
}

impl FetchPipeline {
    pub fn new(
        documents: DocumentStore,
        staging: StagingStore,
        content_store: ContentStore,
        engine: Arc<dyn FetchEngine>,
        cms: CmsRegistry,
        embedder: Arc<dyn TextEmbedder>,
        config: FetchConfig,
    ) -> Self {
        Self {
            documents,
            staging,
            content_store,
            engine,
            cms,
            embedder,
            config,
        }
    }

    /// Fetch content for the given documents and persist the results.
    pub async fn run(&self, docs: Vec<DocumentRow>, ctx: &StepContext) -> Result<FetchOutcome> {
        let total = docs.len();
        if total == 0 {
            ctx.log("No documents to fetch").await;
            return Ok(FetchOutcome {
                dry_run: self.config.dry_run,
                ..FetchOutcome::default()
            });
        }

        ctx.set_event("stage", json!("fetching")).await;
        ctx.set_event("fetch_engine", json!(self.engine.name())).await;
        ctx.set_event("stage_total", json!(total)).await;
        ctx.log(&format!(
            "Fetching {total} document(s) using {}",
            self.engine.name()
        ))
        .await;

        // Delta mode: unchanged documents are marked skip and excluded from
        // everything downstream, unless the reprocess flag overrides.
        let mut rows: Vec<FetchRow> = vec![];
        let mut to_fetch: Vec<DocumentRow> = vec![];
        for doc in docs {
            if self.config.delta && !self.config.reprocess_unchanged && doc.is_unchanged() {
                rows.push(FetchRow {
                    document_id: doc.id.clone(),
                    source_url: Some(doc.source_url.clone()),
                    status: FetchStatus::Skip,
                    content: None,
                    content_length: 0,
                    content_hash: doc.content_hash.clone(),
                    content_path: doc.content_path.clone(),
                    metadata: None,
                    embedding: None,
                    skip_reason: Some("content_unchanged".to_string()),
                    unchanged: true,
                    error: None,
                });
            } else {
                to_fetch.push(doc);
            }
        }

        let (web_docs, non_web_docs): (Vec<DocumentRow>, Vec<DocumentRow>) = to_fetch
            .into_iter()
            .partition(|doc| doc.source_type == "url");

        ctx.set_event("web_docs_count", json!(web_docs.len())).await;
        ctx.set_event("non_web_docs_count", json!(non_web_docs.len())).await;

        let mut processed = rows.len();

        // Web documents go through the engine, scheduled on the sub-task
        // queue so the UI groups them under this step.
        if !web_docs.is_empty() {
            let web_rows = self.fetch_web_parallel(&web_docs, ctx).await?;
            for row in web_rows {
                processed += 1;
                ctx.set_event("stage_current", json!(processed)).await;
                self.emit_row_progress(&row, processed - 1, total, ctx).await;
                rows.push(row);
            }
        }

        // Non-web documents (file, cms) are processed sequentially.
        for doc in &non_web_docs {
            let row = self.fetch_single_non_web(doc).await;
            processed += 1;
            ctx.set_event("stage_current", json!(processed)).await;
            self.emit_row_progress(&row, processed - 1, total, ctx).await;
            rows.push(row);
        }

        // Save content files (atomic, deduplicated by content hash).
        ctx.set_event("stage", json!("saving")).await;
        self.save_content(&mut rows).await?;

        // Generate embeddings; skipped silently without a provider.
        if self.embedder.is_available() {
            ctx.set_event("stage", json!("embedding")).await;
            self.embed_rows(&mut rows).await?;
        }

        // One durable pass writes every row.
        ctx.set_event("stage", json!("persisting")).await;
        let (rows_written, rows_updated) = if self.config.dry_run {
            (0, 0)
        } else {
            self.persist_rows(&rows, &ctx.run_id).await?
        };

        let fetched = rows.iter().filter(|r| r.status == FetchStatus::Success).count();
        let failed = rows.iter().filter(|r| r.status == FetchStatus::Error).count();
        let skipped = rows.iter().filter(|r| r.status == FetchStatus::Skip).count();

        ctx.log(&format!("Fetch complete: {fetched} successful, {failed} failed")).await;
        info!(fetched, failed, skipped, "fetch complete");

        Ok(FetchOutcome {
            total,
            documents_fetched: fetched,
            documents_failed: failed,
            documents_skipped: skipped,
            rows_written,
            rows_updated,
            dry_run: self.config.dry_run,
        })
    }

    async fn emit_row_progress(
        &self,
        row: &FetchRow,
        idx: usize,
        total: usize,
        ctx: &StepContext,
    ) {
        let status = match row.status {
            FetchStatus::Success => "success",
            FetchStatus::Error => "error",
            FetchStatus::Skip => "skip",
        };
        ctx.progress(idx, total, status, &row.document_id, row.error.as_deref())
            .await;
    }

    /// Schedule web fetches on the sub-task queue.
    ///
    /// Engines with a native batch API get one sub-task per batch (tavily's
    /// hard 20-URL cap is enforced here); single-URL engines get one
    /// sub-task per URL at the configured concurrency.
    async fn fetch_web_parallel(
        &self,
        docs: &[DocumentRow],
        ctx: &StepContext,
    ) -> Result<Vec<FetchRow>> {
        let mut url_to_doc: HashMap<String, &DocumentRow> = HashMap::new();
        for doc in docs {
            url_to_doc.insert(doc.source_url.clone(), doc);
        }
        let urls: Vec<String> = docs.iter().map(|d| d.source_url.clone()).collect();

        let batches = plan_batches(&urls, self.engine.batch_limit(), self.config.batch_size);

        let tasks: Vec<SubTask> = batches
            .iter()
            .enumerate()
            .map(|(i, batch)| {
                let engine = self.engine.clone();
                let batch = batch.clone();
                SubTask::new(
                    format!("fetch_batch_{i}"),
                    Box::pin(async move {
                        match engine.fetch(&batch).await {
                            Ok(results) => {
                                let mut map = serde_json::Map::new();
                                for (url, outcome) in results {
                                    let value = match outcome {
                                        Ok(content) => json!({
                                            "markdown": content.markdown,
                                            "metadata": content.metadata,
                                        }),
                                        Err(message) => json!({ "error": message }),
                                    };
                                    map.insert(url, value);
                                }
                                Ok(json!({ "results": map }))
                            }
                            // Engine-level failure propagates as a per-URL
                            // error for every URL in the batch.
                            Err(e) => {
                                let message = e.to_string();
                                let mut map = serde_json::Map::new();
                                for url in &batch {
                                    map.insert(url.clone(), json!({ "error": message }));
                                }
                                Ok(json!({ "results": map }))
                            }
                        }
                    }),
                )
            })
            .collect();

        let outcomes = ctx
            .run_subtasks("fetch_url_queue", self.config.concurrency, tasks)
            .await
            .map_err(|e| FetchError::Engine(e.to_string()))?;

        // Flatten batch results back into per-document rows, preserving the
        // original batch order.
        let mut rows = vec![];
        for ((_, outcome), batch) in outcomes.iter().zip(batches.iter()) {
            match outcome {
                kurt_runtime::queue::SubTaskOutcome::Completed(value) => {
                    let results = value.get("results").and_then(|v| v.as_object());
                    for url in batch {
                        let Some(doc) = url_to_doc.get(url) else { continue };
                        let row = match results.and_then(|map| map.get(url)) {
                            Some(entry) => match entry.get("error") {
                                Some(error) => FetchRow::error_row(
                                    &doc.id,
                                    Some(url),
                                    error.as_str().unwrap_or("Unknown error").to_string(),
                                ),
                                None => {
                                    let markdown = entry
                                        .get("markdown")
                                        .and_then(|v| v.as_str())
                                        .unwrap_or_default()
                                        .to_string();
                                    let metadata = entry
                                        .get("metadata")
                                        .cloned()
                                        .unwrap_or(json!({}));
                                    FetchRow::success_row(&doc.id, Some(url), markdown, metadata)
                                }
                            },
                            None => FetchRow::error_row(
                                &doc.id,
                                Some(url),
                                format!("No result for: {url}"),
                            ),
                        };
                        rows.push(row);
                    }
                }
                kurt_runtime::queue::SubTaskOutcome::Failed(message) => {
                    for url in batch {
                        if let Some(doc) = url_to_doc.get(url) {
                            rows.push(FetchRow::error_row(&doc.id, Some(url), message.clone()));
                        }
                    }
                }
                kurt_runtime::queue::SubTaskOutcome::Drained => {
                    for url in batch {
                        if let Some(doc) = url_to_doc.get(url) {
                            rows.push(FetchRow::error_row(
                                &doc.id,
                                Some(url),
                                "drained: canceled".to_string(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Fetch one file or CMS document. Produces the same row shape as web
    /// fetches so the rest of the pipeline is uniform.
    async fn fetch_single_non_web(&self, doc: &DocumentRow) -> FetchRow {
        let result = match doc.source_type.as_str() {
            "file" => self.fetch_from_file(&doc.source_url),
            "cms" => self.fetch_from_cms(&doc.source_url).await,
            other => Err(FetchError::Engine(format!(
                "unsupported source type: {other}"
            ))),
        };

        match result {
            Ok((content, metadata)) => {
                info!(document_id = %doc.id, chars = content.len(), "fetched");
                FetchRow::success_row(&doc.id, Some(&doc.source_url), content, metadata)
            }
            Err(e) => {
                warn!(document_id = %doc.id, error = %e, "fetch failed");
                FetchRow::error_row(&doc.id, Some(&doc.source_url), e.to_string())
            }
        }
    }

    fn fetch_from_file(&self, source_url: &str) -> Result<(String, serde_json::Value)> {
        let path = source_url.strip_prefix("file://").unwrap_or(source_url);
        let path = std::path::Path::new(path);
        if !path.exists() {
            return Err(FetchError::FileNotFound(path.display().to_string()));
        }
        if !path.is_file() {
            return Err(FetchError::Download(format!("Not a file: {}", path.display())));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Download(format!("read {}: {e}", path.display())))?;
        let metadata = json!({
            "file_path": path.display().to_string(),
            "file_name": path.file_name().and_then(|n| n.to_str()),
            "file_extension": path.extension().and_then(|e| e.to_str()),
            "file_size": content.len(),
        });
        Ok((content, metadata))
    }

    /// CMS source URLs use the form `cms://<platform>/<instance>/<cms_id>`.
    async fn fetch_from_cms(&self, source_url: &str) -> Result<(String, serde_json::Value)> {
        let rest = source_url
            .strip_prefix("cms://")
            .ok_or_else(|| FetchError::Cms(format!("not a CMS url: {source_url}")))?;
        let parts: Vec<&str> = rest.splitn(3, '/').collect();
        let [platform, instance, cms_id] = parts.as_slice() else {
            return Err(FetchError::Cms(format!(
                "CMS document missing platform/instance/cms_id: {source_url}"
            )));
        };

        let client = self.cms.get(platform, instance)?;
        let (content, mut metadata, public_url) = client.fetch_document(cms_id).await?;
        if let Some(map) = metadata.as_object_mut() {
            map.insert("cms_platform".to_string(), json!(platform));
            map.insert("cms_instance".to_string(), json!(instance));
            map.insert("cms_id".to_string(), json!(cms_id));
            if let Some(public_url) = public_url {
                map.insert("public_url".to_string(), json!(public_url));
            }
        }
        Ok((content, metadata))
    }

    /// Write content files and stamp hashes. A document whose new content
    /// hash equals its previous one keeps its file untouched.
    async fn save_content(&self, rows: &mut [FetchRow]) -> Result<()> {
        for row in rows.iter_mut() {
            if row.status != FetchStatus::Success {
                row.content = None;
                continue;
            }
            let Some(content) = row.content.take() else { continue };

            let hash = content_hash(&content);
            let previous = self.documents.get(&row.document_id).await.ok();
            let unchanged = previous
                .as_ref()
                .and_then(|d| d.content_hash.as_deref())
                .map(|prev| prev == hash)
                .unwrap_or(false);

            row.content_hash = Some(hash.clone());

            if self.config.dry_run {
                continue;
            }

            if unchanged {
                // Same bytes as last time: no rewrite, no re-embedding.
                row.unchanged = true;
                row.content_path = previous.as_ref().and_then(|d| d.content_path.clone());
                if row.content_path.is_none() {
                    row.content_path = Some(
                        self.content_store
                            .save(&row.document_id, &content, row.source_url.as_deref())?,
                    );
                }
            } else {
                let path = self.content_store.save(
                    &row.document_id,
                    &content,
                    row.source_url.as_deref(),
                )?;
                row.content_path = Some(path);
            }
        }
        Ok(())
    }

    /// Embed saved content, batched. Unchanged documents reuse the stored
    /// embedding instead of a new provider call.
    async fn embed_rows(&self, rows: &mut [FetchRow]) -> Result<()> {
        let mut texts = vec![];
        let mut indices = vec![];

        for (idx, row) in rows.iter_mut().enumerate() {
            if row.status != FetchStatus::Success {
                continue;
            }
            if row.unchanged {
                if let Ok(Some(previous)) =
                    self.staging.fetch_document(&row.document_id).await
                {
                    row.embedding = previous.embedding;
                }
                continue;
            }
            let Some(path) = row.content_path.as_deref() else { continue };
            let Ok(Some(content)) = self.content_store.load(path) else { continue };
            let truncated: String = content.chars().take(self.config.embedding_max_chars).collect();
            texts.push(truncated);
            indices.push(idx);
        }

        if texts.is_empty() {
            return Ok(());
        }

        let mut embeddings: Vec<Vec<f32>> = vec![];
        for chunk in texts.chunks(self.config.embedding_batch_size) {
            match self.embedder.embed_batch(chunk.to_vec()).await {
                Ok(batch) => embeddings.extend(batch),
                Err(e) => {
                    // Embedding failures degrade to rows without vectors.
                    warn!(error = %e, "embedding batch failed");
                    embeddings.extend(std::iter::repeat_with(Vec::new).take(chunk.len()));
                }
            }
        }

        for (idx, embedding) in indices.into_iter().zip(embeddings) {
            if !embedding.is_empty() {
                rows[idx].embedding = Some(embedding_to_bytes(&embedding));
            }
        }
        Ok(())
    }

    /// One transaction for the staging rows, plus per-document updates on
    /// the documents table for successful fetches.
    async fn persist_rows(&self, rows: &[FetchRow], workflow_id: &str) -> Result<(u64, u64)> {
        let upserts: Vec<UpsertFetchDocument> = rows
            .iter()
            .map(|row| UpsertFetchDocument {
                document_id: row.document_id.clone(),
                workflow_id: workflow_id.to_string(),
                status: row.status.to_string(),
                content_length: row.content_length,
                content_hash: row.content_hash.clone(),
                content_path: row.content_path.clone(),
                fetch_engine: Some(self.engine.name().to_string()),
                skip_reason: row.skip_reason.clone(),
                metadata: row.metadata.clone(),
                embedding: row.embedding.clone(),
                error: row.error.clone(),
            })
            .collect();

        let (written, updated) = self.staging.persist_fetch_documents(&upserts).await?;

        for row in rows {
            if row.status == FetchStatus::Success {
                if let (Some(path), Some(hash)) = (&row.content_path, &row.content_hash) {
                    self.documents
                        .update_fetch_result(&row.document_id, path, hash)
                        .await?;
                }
                if let Some(metadata) = &row.metadata {
                    let title = metadata.get("title").and_then(|v| v.as_str());
                    let description = metadata.get("description").and_then(|v| v.as_str());
                    if title.is_some() || description.is_some() {
                        self.documents
                            .update_title_description(&row.document_id, title, description)
                            .await?;
                    }
                }
            }
        }

        Ok((written, updated))
    }
}

/// Split URLs into engine-shaped batches without running anything — used by
/// tests and the dry-run planner.
pub fn plan_batches(
    urls: &[String],
    engine_batch_limit: Option<usize>,
    configured_batch_size: Option<usize>,
) -> Vec<Vec<String>> {
    match engine_batch_limit {
        Some(1) => urls.iter().map(|u| vec![u.clone()]).collect(),
        limit => {
            let mut batch_size = configured_batch_size.unwrap_or(urls.len().max(1));
            if let Some(cap) = limit {
                batch_size = batch_size.min(cap);
            }
            urls.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://example.com/{i}")).collect()
    }

    #[test]
    fn tavily_21_urls_split_20_and_1() {
        let batches = plan_batches(&urls(21), Some(20), None);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 20);
        assert_eq!(batches[1].len(), 1);
        let flattened: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(flattened, 21);
    }

    #[test]
    fn tavily_caps_user_batch_size() {
        let batches = plan_batches(&urls(40), Some(20), Some(50));
        assert!(batches.iter().all(|b| b.len() <= 20));
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn firecrawl_unbounded_defaults_to_one_batch() {
        let batches = plan_batches(&urls(40), None, None);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 40);
    }

    #[test]
    fn firecrawl_respects_configured_batch_size() {
        let batches = plan_batches(&urls(45), None, Some(20));
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 5);
    }

    #[test]
    fn single_url_engines_get_one_task_per_url() {
        let batches = plan_batches(&urls(7), Some(1), Some(20));
        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn empty_url_list_is_empty_plan() {
        let batches = plan_batches(&[], Some(20), None);
        assert!(batches.is_empty());
    }
}
