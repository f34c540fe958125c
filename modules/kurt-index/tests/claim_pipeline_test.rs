//! Claim clustering + resolution against a real database.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use kurt_common::embedding::NoOpEmbedder;
use kurt_events::MemoryEventSink;
use kurt_runtime::{MemoryRunState, StepContext, Tool};
use kurt_store::rows::InsertClaim;
use kurt_store::staging::{InsertClaimGroup, InsertSectionExtraction};
use kurt_store::Stores;
use kurt_index::{ClaimClusteringTool, ClaimResolutionTool};

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

fn ctx(run_id: &str, step_id: &str) -> StepContext {
    StepContext {
        run_id: run_id.to_string(),
        step_id: step_id.to_string(),
        workflow_name: "index".to_string(),
        inputs: json!({}),
        sink: Arc::new(MemoryEventSink::new()),
        state: Arc::new(MemoryRunState::new()),
    }
}

fn section_row(
    workflow_id: &str,
    document_id: &str,
    section_id: &str,
    entities: serde_json::Value,
    claims: serde_json::Value,
) -> InsertSectionExtraction {
    InsertSectionExtraction {
        workflow_id: workflow_id.to_string(),
        document_id: document_id.to_string(),
        section_id: section_id.to_string(),
        section_index: 0,
        header: None,
        content: "section content".to_string(),
        content_type: None,
        embedding: None,
        entities,
        relationships: json!([]),
        claims,
    }
}

/// Claim merge across documents: the higher-confidence occurrence creates
/// the claim, the other deduplicates against it, and exactly one claims row
/// lands with its entity link.
#[tokio::test]
async fn cross_document_merge_end_to_end() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let workflow_id = "wf-merge";

    let (d1, _) = stores
        .documents
        .create_or_get("https://example.com/d1", "url", None)
        .await
        .unwrap();
    let (d2, _) = stores
        .documents
        .create_or_get("https://example.com/d2", "url", None)
        .await
        .unwrap();
    let python = stores
        .entities
        .insert("Python", "Technology", None, &[], None)
        .await
        .unwrap();

    let entities_json = json!([{"name": "Python", "entity_type": "Technology"}]);
    stores
        .staging
        .insert_section_extractions(&[
            section_row(
                workflow_id,
                &d1.id,
                "sec-d1",
                entities_json.clone(),
                json!([{
                    "statement": "Python is interpreted",
                    "claim_type": "definition",
                    "confidence": 0.7,
                    "entity_indices": [0],
                }]),
            ),
            section_row(
                workflow_id,
                &d2.id,
                "sec-d2",
                entities_json,
                json!([{
                    "statement": "Python is interpreted",
                    "claim_type": "definition",
                    "confidence": 0.9,
                    "entity_indices": [0],
                }]),
            ),
        ])
        .await
        .unwrap();
    stores
        .staging
        .record_entity_resolution(workflow_id, "Python", &python.id, "matched")
        .await
        .unwrap();

    // No embedding key: clustering uses the normalized-prefix fallback,
    // which still groups the identical statements.
    let clustering = ClaimClusteringTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        Arc::new(NoOpEmbedder),
    );
    let result = clustering
        .run(vec![], &json!({}), &ctx(workflow_id, "clustering"))
        .await
        .unwrap();
    assert_eq!(result.output_data[0]["claims_processed"], json!(2));
    assert_eq!(result.output_data[0]["clusters_created"], json!(1));

    let groups = stores
        .staging
        .claim_groups_for_workflow(workflow_id)
        .await
        .unwrap();
    assert_eq!(groups.len(), 2);
    let create_new: Vec<_> = groups.iter().filter(|g| g.decision == "CREATE_NEW").collect();
    assert_eq!(create_new.len(), 1);
    assert_eq!(create_new[0].document_id, d2.id);
    assert_eq!(
        create_new[0].canonical_statement.as_deref(),
        Some("Python is interpreted")
    );
    let duplicates: Vec<_> = groups
        .iter()
        .filter(|g| g.decision.starts_with("DUPLICATE_OF:"))
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].document_id, d1.id);
    assert_eq!(
        duplicates[0].decision,
        format!("DUPLICATE_OF:{}", create_new[0].claim_hash)
    );

    // Resolution: one insert, one dedup, entity linked.
    let resolution = ClaimResolutionTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        stores.documents.clone(),
    );
    let result = resolution
        .run(vec![], &json!({}), &ctx(workflow_id, "resolution"))
        .await
        .unwrap();

    assert_eq!(result.output_data[0]["created"], json!(1));
    assert_eq!(result.output_data[0]["deduplicated"], json!(1));
    assert_eq!(result.output_data[0]["merged"], json!(0));
    assert_eq!(result.output_data[0]["skipped"], json!(0));

    // The created counter equals actual inserts.
    assert_eq!(stores.claims.count_for_workflow(workflow_id).await.unwrap(), 1);
    let claim = stores
        .claims
        .get_by_hash(&create_new[0].claim_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.subject_entity_id, python.id);
    assert_eq!(stores.claims.linked_entity_ids(&claim.id).await.unwrap(), vec![python.id.clone()]);

    // The dedup row points at the created claim.
    let resolutions = stores
        .staging
        .claim_resolutions_for_workflow(workflow_id)
        .await
        .unwrap();
    let dedup_row = resolutions
        .iter()
        .find(|r| r.resolution_action == "deduplicated")
        .unwrap();
    assert_eq!(dedup_row.resolved_claim_id.as_deref(), Some(claim.id.as_str()));
}

/// A CREATE_NEW without entity linkage is skipped, not created.
#[tokio::test]
async fn claim_without_entities_is_skipped() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let workflow_id = "wf-skip";

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/orphan", "url", None)
        .await
        .unwrap();
    stores
        .staging
        .insert_section_extractions(&[section_row(
            workflow_id,
            &doc.id,
            "sec-orphan",
            json!([]),
            json!([{
                "statement": "Something is true somewhere",
                "claim_type": "fact",
                "confidence": 0.8,
            }]),
        )])
        .await
        .unwrap();

    let clustering = ClaimClusteringTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        Arc::new(NoOpEmbedder),
    );
    clustering
        .run(vec![], &json!({}), &ctx(workflow_id, "clustering"))
        .await
        .unwrap();

    let resolution = ClaimResolutionTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        stores.documents.clone(),
    );
    let result = resolution
        .run(vec![], &json!({}), &ctx(workflow_id, "resolution"))
        .await
        .unwrap();

    assert_eq!(result.output_data[0]["skipped"], json!(1));
    assert_eq!(result.output_data[0]["created"], json!(0));
    assert_eq!(stores.claims.count_for_workflow(workflow_id).await.unwrap(), 0);

    let resolutions = stores
        .staging
        .claim_resolutions_for_workflow(workflow_id)
        .await
        .unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].resolution_action, "skipped");
    assert!(resolutions[0].resolved_claim_id.is_none());
}

/// MERGE_WITH links new entities into the existing claim; a vanished merge
/// target degrades to CREATE_NEW with the degradation recorded.
#[tokio::test]
async fn merge_with_existing_and_degrade() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let workflow_id = "wf-existing";

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/merge", "url", None)
        .await
        .unwrap();
    let python = stores
        .entities
        .insert("Python", "Technology", None, &[], None)
        .await
        .unwrap();
    let existing = stores
        .claims
        .insert(InsertClaim {
            claim_hash: "existing-hash".to_string(),
            statement: "Python is a widely-used language".to_string(),
            claim_type: "definition".to_string(),
            confidence: 0.95,
            subject_entity_id: python.id.clone(),
            source_quote: None,
            document_id: doc.id.clone(),
            section_id: "sec-prior".to_string(),
            workflow_id: "wf-prior".to_string(),
            embedding: None,
        })
        .await
        .unwrap();

    stores
        .staging
        .insert_section_extractions(&[section_row(
            workflow_id,
            &doc.id,
            "sec-merge",
            json!([{"name": "Python", "entity_type": "Technology"}]),
            json!([]),
        )])
        .await
        .unwrap();
    stores
        .staging
        .record_entity_resolution(workflow_id, "Python", &python.id, "matched")
        .await
        .unwrap();

    // Seed the clustering output directly: one merge into the existing
    // claim, one merge whose target has vanished.
    stores
        .staging
        .insert_claim_groups(&[
            InsertClaimGroup {
                workflow_id: workflow_id.to_string(),
                claim_hash: "new-hash-1".to_string(),
                document_id: doc.id.clone(),
                section_id: "sec-merge".to_string(),
                statement: "Python is a popular language".to_string(),
                claim_type: "definition".to_string(),
                confidence: 0.8,
                source_quote: None,
                entity_indices: json!([0]),
                cluster_id: 0,
                cluster_size: 1,
                decision: "MERGE_WITH:existing-hash".to_string(),
                canonical_statement: Some("Python is a widely-used language".to_string()),
                similar_existing: json!([{"claim_hash": "existing-hash"}]),
                embedding: None,
            },
            InsertClaimGroup {
                workflow_id: workflow_id.to_string(),
                claim_hash: "new-hash-2".to_string(),
                document_id: doc.id.clone(),
                section_id: "sec-merge".to_string(),
                statement: "Python powers many services".to_string(),
                claim_type: "fact".to_string(),
                confidence: 0.7,
                source_quote: None,
                entity_indices: json!([0]),
                cluster_id: 1,
                cluster_size: 1,
                decision: "MERGE_WITH:vanished-hash".to_string(),
                canonical_statement: Some("gone".to_string()),
                similar_existing: json!([]),
                embedding: None,
            },
        ])
        .await
        .unwrap();

    let resolution = ClaimResolutionTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        stores.documents.clone(),
    );
    let result = resolution
        .run(vec![], &json!({}), &ctx(workflow_id, "resolution"))
        .await
        .unwrap();

    assert_eq!(result.output_data[0]["merged"], json!(1));
    assert_eq!(result.output_data[0]["created"], json!(1));

    let resolutions = stores
        .staging
        .claim_resolutions_for_workflow(workflow_id)
        .await
        .unwrap();
    let merged_row = resolutions
        .iter()
        .find(|r| r.resolution_action == "merged")
        .unwrap();
    assert_eq!(merged_row.resolved_claim_id.as_deref(), Some(existing.id.as_str()));

    // The degraded row carries the audit marker.
    let degraded_row = resolutions
        .iter()
        .find(|r| r.resolution_action == "created")
        .unwrap();
    assert_eq!(
        degraded_row.metadata["degraded_from"],
        json!("MERGE_WITH:vanished-hash")
    );
    assert!(stores
        .claims
        .get_by_hash("new-hash-2")
        .await
        .unwrap()
        .is_some());
}

/// Indexing stamps indexed_with_hash once resolution commits.
#[tokio::test]
async fn resolution_marks_documents_indexed() {
    let Some(stores) = test_stores().await else {
        return;
    };
    let workflow_id = "wf-stamp";

    let (doc, _) = stores
        .documents
        .create_or_get("https://example.com/stamp", "url", None)
        .await
        .unwrap();
    stores
        .documents
        .update_fetch_result(&doc.id, "example.com/stamp.md", "hash-stamp")
        .await
        .unwrap();
    let entity = stores
        .entities
        .insert("Kurt", "Product", None, &[], None)
        .await
        .unwrap();

    stores
        .staging
        .insert_section_extractions(&[section_row(
            workflow_id,
            &doc.id,
            "sec-stamp",
            json!([{"name": "Kurt", "entity_type": "Product"}]),
            json!([{
                "statement": "Kurt ingests documents",
                "claim_type": "capability",
                "confidence": 0.9,
                "entity_indices": [0],
            }]),
        )])
        .await
        .unwrap();
    stores
        .staging
        .record_entity_resolution(workflow_id, "Kurt", &entity.id, "created")
        .await
        .unwrap();

    let clustering = ClaimClusteringTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        Arc::new(NoOpEmbedder),
    );
    clustering
        .run(vec![], &json!({}), &ctx(workflow_id, "clustering"))
        .await
        .unwrap();
    let resolution = ClaimResolutionTool::new(
        stores.staging.clone(),
        stores.claims.clone(),
        stores.documents.clone(),
    );
    resolution
        .run(vec![], &json!({}), &ctx(workflow_id, "resolution"))
        .await
        .unwrap();

    let updated = stores.documents.get(&doc.id).await.unwrap();
    assert_eq!(updated.indexed_with_hash.as_deref(), Some("hash-stamp"));
    assert!(updated.is_unchanged());
}
