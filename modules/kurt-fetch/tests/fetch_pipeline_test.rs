//! Fetch pipeline integration tests with a stub engine.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;

use kurt_common::embedding::NoOpEmbedder;
use kurt_events::MemoryEventSink;
use kurt_fetch::{CmsRegistry, ContentStore, FetchConfig, FetchPipeline};
use kurt_fetch::engine::{EngineResults, FetchEngine, FetchedContent};
use kurt_runtime::{MemoryRunState, StepContext};
use kurt_store::Stores;

async fn test_stores() -> Option<Stores> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    Stores::migrate(&pool).await.ok()?;
    sqlx::query(
        "TRUNCATE documents, entities, document_entities, claims, claim_entities, \
         workflow_runs, step_logs, landing_discovery, landing_fetch, \
         section_extractions, entity_resolution, claim_groups, claim_resolution CASCADE",
    )
    .execute(&pool)
    .await
    .ok()?;
    Some(Stores::new(pool))
}

fn ctx(run_id: &str) -> StepContext {
    StepContext {
        run_id: run_id.to_string(),
        step_id: "fetch_documents".to_string(),
        workflow_name: "fetch".to_string(),
        inputs: json!({}),
        sink: Arc::new(MemoryEventSink::new()),
        state: Arc::new(MemoryRunState::new()),
    }
}

/// Engine that serves canned markdown, with one URL that always fails.
struct StubEngine {
    pages: HashMap<String, String>,
}

#[async_trait]
impl FetchEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn batch_limit(&self) -> Option<usize> {
        Some(1)
    }

    async fn fetch(&self, urls: &[String]) -> kurt_fetch::error::Result<EngineResults> {
        let mut results = EngineResults::new();
        for url in urls {
            match self.pages.get(url) {
                Some(markdown) => {
                    results.insert(
                        url.clone(),
                        Ok(FetchedContent {
                            markdown: markdown.clone(),
                            metadata: json!({"title": "Stub Page"}),
                        }),
                    );
                }
                None => {
                    results.insert(url.clone(), Err(format!("[stub] No result for: {url}")));
                }
            }
        }
        Ok(results)
    }
}

fn pipeline(
    stores: &Stores,
    root: &std::path::Path,
    pages: HashMap<String, String>,
    config: FetchConfig,
) -> FetchPipeline {
    FetchPipeline::new(
        stores.documents.clone(),
        stores.staging.clone(),
        ContentStore::new(root),
        Arc::new(StubEngine { pages }),
        CmsRegistry::new(),
        Arc::new(NoOpEmbedder),
        config,
    )
}

/// Fetch → file at the URL-derived path → re-fetch updates the row in place
/// without rewriting the file.
#[tokio::test]
async fn fetch_then_refetch_deduplicates() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/a", "url", None)
        .await
        .unwrap();

    let pages = HashMap::from([(
        "https://example.com/a".to_string(),
        "# Page A\n\nStable content.\n".to_string(),
    )]);

    let outcome = pipeline(&stores, dir.path(), pages.clone(), FetchConfig::default())
        .run(vec![doc.clone()], &ctx("wf-fetch-1"))
        .await
        .unwrap();
    assert_eq!(outcome.documents_fetched, 1);
    assert_eq!(outcome.documents_failed, 0);
    assert_eq!(outcome.rows_written, 1);
    assert_eq!(outcome.rows_updated, 0);

    // Exactly one file at the URL-consistent path.
    let content_file = dir.path().join("example.com/a.md");
    assert!(content_file.exists());
    let first_mtime = content_file.metadata().unwrap().modified().unwrap();

    let stored = stores.documents.get(&doc.id).await.unwrap();
    assert_eq!(stored.content_path.as_deref(), Some("example.com/a.md"));
    let first_hash = stored.content_hash.clone().unwrap();

    // Second fetch: same bytes, row updated in place, file untouched.
    let refetched = stores.documents.get(&doc.id).await.unwrap();
    let outcome = pipeline(&stores, dir.path(), pages, FetchConfig::default())
        .run(vec![refetched], &ctx("wf-fetch-2"))
        .await
        .unwrap();
    assert_eq!(outcome.documents_fetched, 1);
    assert_eq!(outcome.rows_written, 0);
    assert_eq!(outcome.rows_updated, 1);

    let second_mtime = content_file.metadata().unwrap().modified().unwrap();
    assert_eq!(first_mtime, second_mtime, "unchanged content is not rewritten");

    let row = stores.staging.fetch_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(row.workflow_id, "wf-fetch-2");
    assert_eq!(row.content_hash.as_deref(), Some(first_hash.as_str()));
    assert_eq!(row.status, "SUCCESS");
}

/// Per-URL failures stay isolated: one bad URL never fails the batch.
#[tokio::test]
async fn per_url_failures_are_isolated() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (good, _) = stores
        .documents
        .create_or_get("https://example.com/good", "url", None)
        .await
        .unwrap();
    let (bad, _) = stores
        .documents
        .create_or_get("https://example.com/bad", "url", None)
        .await
        .unwrap();

    let pages = HashMap::from([(
        "https://example.com/good".to_string(),
        "# Good\n\nContent.\n".to_string(),
    )]);

    let outcome = pipeline(&stores, dir.path(), pages, FetchConfig::default())
        .run(vec![good.clone(), bad.clone()], &ctx("wf-isolated"))
        .await
        .unwrap();

    assert_eq!(outcome.documents_fetched, 1);
    assert_eq!(outcome.documents_failed, 1);

    let good_row = stores.staging.fetch_document(&good.id).await.unwrap().unwrap();
    assert_eq!(good_row.status, "SUCCESS");
    let bad_row = stores.staging.fetch_document(&bad.id).await.unwrap().unwrap();
    assert_eq!(bad_row.status, "ERROR");
    assert!(bad_row.error.unwrap().contains("No result"));
}

/// Delta mode skips unchanged documents unless reprocess_unchanged is set.
#[tokio::test]
async fn delta_mode_skip_and_override() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/delta", "url", None)
        .await
        .unwrap();
    stores
        .documents
        .update_fetch_result(&doc.id, "example.com/delta.md", "same-hash")
        .await
        .unwrap();
    stores
        .documents
        .set_indexed_with_hash(&doc.id, "same-hash")
        .await
        .unwrap();
    let doc = stores.documents.get(&doc.id).await.unwrap();

    let pages = HashMap::from([(
        "https://example.com/delta".to_string(),
        "# Delta\n\nContent.\n".to_string(),
    )]);

    // Delta mode: unchanged document is skipped with a reason.
    let config = FetchConfig {
        delta: true,
        ..FetchConfig::default()
    };
    let outcome = pipeline(&stores, dir.path(), pages.clone(), config)
        .run(vec![doc.clone()], &ctx("wf-delta"))
        .await
        .unwrap();
    assert_eq!(outcome.documents_skipped, 1);
    assert_eq!(outcome.documents_fetched, 0);

    let row = stores.staging.fetch_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(row.status, "SKIP");
    assert_eq!(row.skip_reason.as_deref(), Some("content_unchanged"));

    // The override flag wins over the hash match.
    let config = FetchConfig {
        delta: true,
        reprocess_unchanged: true,
        ..FetchConfig::default()
    };
    let outcome = pipeline(&stores, dir.path(), pages, config)
        .run(vec![doc], &ctx("wf-delta-2"))
        .await
        .unwrap();
    assert_eq!(outcome.documents_skipped, 0);
    assert_eq!(outcome.documents_fetched, 1);
}

/// Dry run: nothing persisted, no files written.
#[tokio::test]
async fn dry_run_writes_nothing() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/dry", "url", None)
        .await
        .unwrap();

    let pages = HashMap::from([(
        "https://example.com/dry".to_string(),
        "# Dry\n\nContent.\n".to_string(),
    )]);
    let config = FetchConfig {
        dry_run: true,
        ..FetchConfig::default()
    };
    let outcome = pipeline(&stores, dir.path(), pages, config)
        .run(vec![doc.clone()], &ctx("wf-dry"))
        .await
        .unwrap();

    assert_eq!(outcome.documents_fetched, 1);
    assert_eq!(outcome.rows_written, 0);
    assert!(!dir.path().join("example.com/dry.md").exists());
    assert!(stores.staging.fetch_document(&doc.id).await.unwrap().is_none());
}
