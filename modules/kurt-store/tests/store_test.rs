//! Integration tests for the Postgres stores.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use serde_json::json;
use sqlx::PgPool;

use kurt_store::rows::InsertClaim;
use kurt_store::staging::UpsertFetchDocument;
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

#[tokio::test]
async fn document_discovery_is_idempotent() {
    let Some(stores) = test_stores().await else {
        return;
    };

    let (first, created) = stores
        .documents
        .create_or_get("https://example.com/a", "url", Some("A"))
        .await
        .unwrap();
    assert!(created);

    let (second, created_again) = stores
        .documents
        .create_or_get("https://example.com/a", "url", None)
        .await
        .unwrap();
    assert!(!created_again);
    assert_eq!(first.id, second.id);

    // The same URL under a different source type is a distinct document.
    let (third, created_file) = stores
        .documents
        .create_or_get("https://example.com/a", "file", None)
        .await
        .unwrap();
    assert!(created_file);
    assert_ne!(first.id, third.id);
}

#[tokio::test]
async fn fetch_rows_upsert_in_place() {
    let Some(stores) = test_stores().await else {
        return;
    };

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/b", "url", None)
        .await
        .unwrap();

    let row = UpsertFetchDocument {
        document_id: doc.id.clone(),
        workflow_id: "wf-1".to_string(),
        status: "SUCCESS".to_string(),
        content_length: 120,
        content_hash: Some("hash-1".to_string()),
        content_path: Some("example.com/b.md".to_string()),
        fetch_engine: Some("trafilatura".to_string()),
        skip_reason: None,
        metadata: Some(json!({"title": "B"})),
        embedding: None,
        error: None,
    };
    let (written, updated) = stores.staging.persist_fetch_documents(&[row.clone()]).await.unwrap();
    assert_eq!((written, updated), (1, 0));

    // Re-fetch updates the same row, not a new one.
    let updated_row = UpsertFetchDocument {
        workflow_id: "wf-2".to_string(),
        content_hash: Some("hash-2".to_string()),
        ..row
    };
    let (written, updated) = stores
        .staging
        .persist_fetch_documents(&[updated_row])
        .await
        .unwrap();
    assert_eq!((written, updated), (0, 1));

    let stored = stores.staging.fetch_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.workflow_id, "wf-2");
    assert_eq!(stored.content_hash.as_deref(), Some("hash-2"));
}

#[tokio::test]
async fn claims_insert_link_and_stale_cleanup() {
    let Some(stores) = test_stores().await else {
        return;
    };

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/c", "url", None)
        .await
        .unwrap();
    let entity = stores
        .entities
        .insert("Python", "Technology", None, &[], None)
        .await
        .unwrap();

    let claim = stores
        .claims
        .insert(InsertClaim {
            claim_hash: "hash-old".to_string(),
            statement: "Python is interpreted".to_string(),
            claim_type: "definition".to_string(),
            confidence: 0.9,
            subject_entity_id: entity.id.clone(),
            source_quote: None,
            document_id: doc.id.clone(),
            section_id: "sec1".to_string(),
            workflow_id: "wf-old".to_string(),
            embedding: None,
        })
        .await
        .unwrap();

    stores
        .claims
        .link_entities(&claim.id, &[entity.id.clone()])
        .await
        .unwrap();
    // Duplicate links are absorbed.
    let linked = stores
        .claims
        .link_entities(&claim.id, &[entity.id.clone()])
        .await
        .unwrap();
    assert_eq!(linked, 0);
    assert_eq!(stores.claims.linked_entity_ids(&claim.id).await.unwrap().len(), 1);

    // Re-indexing under a new workflow removes the old workflow's claims
    // for this document; entities stay.
    let deleted = stores
        .claims
        .delete_stale_for_document(&doc.id, "wf-new")
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(stores.claims.get_by_hash("hash-old").await.unwrap().is_none());
    assert!(stores.entities.get(&entity.id).await.is_ok());
}

#[tokio::test]
async fn entity_uniqueness_and_alias_merge() {
    let Some(stores) = test_stores().await else {
        return;
    };

    let first = stores
        .entities
        .insert("PostgreSQL", "Technology", Some("database"), &[], None)
        .await
        .unwrap();

    // A concurrent insert of the same concept resolves to the winner.
    let second = stores
        .entities
        .insert("PostgreSQL", "Technology", None, &[], None)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    // Alias merge bumps the version and deduplicates case-insensitively.
    let merged = stores
        .entities
        .merge_aliases(&first.id, &["Postgres".to_string(), "postgres".to_string()], None)
        .await
        .unwrap();
    assert_eq!(merged.version, first.version + 1);
    assert_eq!(merged.alias_list(), vec!["Postgres".to_string()]);

    // Alias lookup resolves to the same entity.
    let by_alias = stores
        .entities
        .find_by_name_or_alias("Postgres", "Technology")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_alias.id, first.id);
}

#[tokio::test]
async fn run_listing_filters_by_status_and_search() {
    let Some(stores) = test_stores().await else {
        return;
    };

    stores
        .runs
        .create("wf-a", "ingest-docs", &json!({}), &json!({"workflow_type": "fetch"}))
        .await
        .unwrap();
    stores
        .runs
        .create("wf-b", "research-run", &json!({}), &json!({"workflow_type": "research"}))
        .await
        .unwrap();
    stores.runs.update_status("wf-a", "completed", None).await.unwrap();

    let completed = stores
        .runs
        .list(&kurt_store::runs::RunFilter {
            statuses: vec!["completed".to_string()],
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].workflow_id, "wf-a");

    let searched = stores
        .runs
        .list(&kurt_store::runs::RunFilter {
            search: Some("research".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(searched.len(), 1);
    assert_eq!(searched[0].workflow_id, "wf-b");

    let by_type = stores
        .runs
        .list(&kurt_store::runs::RunFilter {
            workflow_type: Some("fetch".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);
}

#[tokio::test]
async fn step_log_checkpoints_round_trip() {
    let Some(stores) = test_stores().await else {
        return;
    };

    stores
        .runs
        .create("wf-steps", "ingest", &json!({"limit": 5}), &json!({}))
        .await
        .unwrap();
    stores
        .runs
        .start_step("wf-steps", "fetch", "fetch", 5, Some("abc123"))
        .await
        .unwrap();

    let unfinished = stores.runs.unfinished_steps("wf-steps").await.unwrap();
    assert_eq!(unfinished.len(), 1);

    stores
        .runs
        .finish_step(
            "wf-steps",
            "fetch",
            "completed",
            &json!([{"fetched": 4}]),
            1,
            &json!([{"item_id": "doc-9", "kind": "permanent", "message": "paywall"}]),
            &json!({}),
        )
        .await
        .unwrap();

    assert!(stores.runs.unfinished_steps("wf-steps").await.unwrap().is_empty());
    let logs = stores.runs.step_logs("wf-steps").await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "completed");
    assert_eq!(logs[0].output_count, 1);
    assert_eq!(logs[0].error_count, 1);
    assert!(logs[0].completed_at.is_some());

    // Inputs are stored verbatim for retry.
    let run = stores.runs.get("wf-steps").await.unwrap();
    assert_eq!(run.inputs, json!({"limit": 5}));
}
