use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::rows::{
    ClaimGroupRow, ClaimResolutionRow, EntityResolutionRow, FetchDocumentRow,
    SectionExtractionRow,
};

/// Parameters for upserting a landing_fetch row.
#[derive(Debug, Clone)]
pub struct UpsertFetchDocument {
    pub document_id: String,
    pub workflow_id: String,
    pub status: String,
    pub content_length: i64,
    pub content_hash: Option<String>,
    pub content_path: Option<String>,
    pub fetch_engine: Option<String>,
    pub skip_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub embedding: Option<Vec<u8>>,
    pub error: Option<String>,
}

/// Parameters for inserting a section extraction.
#[derive(Debug, Clone)]
pub struct InsertSectionExtraction {
    pub workflow_id: String,
    pub document_id: String,
    pub section_id: String,
    pub section_index: i32,
    pub header: Option<String>,
    pub content: String,
    pub content_type: Option<String>,
    pub embedding: Option<Vec<u8>>,
    pub entities: serde_json::Value,
    pub relationships: serde_json::Value,
    pub claims: serde_json::Value,
}

/// Parameters for inserting a claim_groups row.
#[derive(Debug, Clone)]
pub struct InsertClaimGroup {
    pub workflow_id: String,
    pub claim_hash: String,
    pub document_id: String,
    pub section_id: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub source_quote: Option<String>,
    pub entity_indices: serde_json::Value,
    pub cluster_id: i64,
    pub cluster_size: i64,
    pub decision: String,
    pub canonical_statement: Option<String>,
    pub similar_existing: serde_json::Value,
    pub embedding: Option<Vec<u8>>,
}

/// Parameters for inserting a claim_resolution row.
#[derive(Debug, Clone)]
pub struct InsertClaimResolution {
    pub workflow_id: String,
    pub claim_hash: String,
    pub document_id: String,
    pub section_id: String,
    pub statement: String,
    pub claim_type: String,
    pub confidence: f32,
    pub decision: String,
    pub canonical_statement: Option<String>,
    pub resolved_claim_id: Option<String>,
    pub resolution_action: String,
    pub linked_entity_ids: serde_json::Value,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct StagingStore {
    pool: PgPool,
}

impl StagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // --- landing_discovery ---

    pub async fn record_discovery(
        &self,
        workflow_id: &str,
        document_id: &str,
        method: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO landing_discovery (id, workflow_id, document_id, method)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(document_id)
        .bind(method)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- landing_fetch ---

    /// Persist all fetch rows in one transaction. Rows are upserted by
    /// document_id so a re-fetch updates in place. Returns
    /// (inserted, updated).
    pub async fn persist_fetch_documents(
        &self,
        rows: &[UpsertFetchDocument],
    ) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        let mut updated = 0;

        for row in rows {
            let existed = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM landing_fetch WHERE document_id = $1)",
            )
            .bind(&row.document_id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO landing_fetch
                    (document_id, workflow_id, status, content_length, content_hash,
                     content_path, fetch_engine, skip_reason, metadata, embedding, error)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (document_id) DO UPDATE SET
                    workflow_id = EXCLUDED.workflow_id,
                    status = EXCLUDED.status,
                    content_length = EXCLUDED.content_length,
                    content_hash = EXCLUDED.content_hash,
                    content_path = EXCLUDED.content_path,
                    fetch_engine = EXCLUDED.fetch_engine,
                    skip_reason = EXCLUDED.skip_reason,
                    metadata = EXCLUDED.metadata,
                    embedding = EXCLUDED.embedding,
                    error = EXCLUDED.error,
                    updated_at = now()
                "#,
            )
            .bind(&row.document_id)
            .bind(&row.workflow_id)
            .bind(&row.status)
            .bind(row.content_length)
            .bind(&row.content_hash)
            .bind(&row.content_path)
            .bind(&row.fetch_engine)
            .bind(&row.skip_reason)
            .bind(&row.metadata)
            .bind(&row.embedding)
            .bind(&row.error)
            .execute(&mut *tx)
            .await?;

            if existed {
                updated += 1;
            } else {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok((inserted, updated))
    }

    pub async fn fetch_documents_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<FetchDocumentRow>> {
        let rows = sqlx::query_as::<_, FetchDocumentRow>(
            "SELECT * FROM landing_fetch WHERE workflow_id = $1 ORDER BY created_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn fetch_document(&self, document_id: &str) -> Result<Option<FetchDocumentRow>> {
        let row = sqlx::query_as::<_, FetchDocumentRow>(
            "SELECT * FROM landing_fetch WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // --- section_extractions ---

    pub async fn insert_section_extractions(
        &self,
        rows: &[InsertSectionExtraction],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO section_extractions
                    (id, workflow_id, document_id, section_id, section_index, header,
                     content, content_type, embedding, entities, relationships, claims)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (workflow_id, section_id) DO UPDATE SET
                    content = EXCLUDED.content,
                    content_type = EXCLUDED.content_type,
                    embedding = EXCLUDED.embedding,
                    entities = EXCLUDED.entities,
                    relationships = EXCLUDED.relationships,
                    claims = EXCLUDED.claims,
                    updated_at = now()
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&row.workflow_id)
            .bind(&row.document_id)
            .bind(&row.section_id)
            .bind(row.section_index)
            .bind(&row.header)
            .bind(&row.content)
            .bind(&row.content_type)
            .bind(&row.embedding)
            .bind(&row.entities)
            .bind(&row.relationships)
            .bind(&row.claims)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn section_extractions_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<SectionExtractionRow>> {
        let rows = sqlx::query_as::<_, SectionExtractionRow>(
            r#"
            SELECT * FROM section_extractions
            WHERE workflow_id = $1
            ORDER BY document_id, section_index
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- entity_resolution ---

    pub async fn record_entity_resolution(
        &self,
        workflow_id: &str,
        entity_name: &str,
        resolved_entity_id: &str,
        action: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_resolution (id, workflow_id, entity_name, resolved_entity_id, action)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workflow_id, entity_name) DO UPDATE SET
                resolved_entity_id = EXCLUDED.resolved_entity_id,
                action = EXCLUDED.action,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(entity_name)
        .bind(resolved_entity_id)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn entity_resolutions_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<EntityResolutionRow>> {
        let rows = sqlx::query_as::<_, EntityResolutionRow>(
            "SELECT * FROM entity_resolution WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- claim_groups ---

    pub async fn insert_claim_groups(&self, rows: &[InsertClaimGroup]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO claim_groups
                    (id, workflow_id, claim_hash, document_id, section_id, statement,
                     claim_type, confidence, source_quote, entity_indices, cluster_id,
                     cluster_size, decision, canonical_statement, similar_existing, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&row.workflow_id)
            .bind(&row.claim_hash)
            .bind(&row.document_id)
            .bind(&row.section_id)
            .bind(&row.statement)
            .bind(&row.claim_type)
            .bind(row.confidence)
            .bind(&row.source_quote)
            .bind(&row.entity_indices)
            .bind(row.cluster_id)
            .bind(row.cluster_size)
            .bind(&row.decision)
            .bind(&row.canonical_statement)
            .bind(&row.similar_existing)
            .bind(&row.embedding)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn claim_groups_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<ClaimGroupRow>> {
        let rows = sqlx::query_as::<_, ClaimGroupRow>(
            "SELECT * FROM claim_groups WHERE workflow_id = $1 ORDER BY cluster_id, confidence DESC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- claim_resolution ---

    pub async fn insert_claim_resolutions(
        &self,
        rows: &[InsertClaimResolution],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO claim_resolution
                    (id, workflow_id, claim_hash, document_id, section_id, statement,
                     claim_type, confidence, decision, canonical_statement,
                     resolved_claim_id, resolution_action, linked_entity_ids, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&row.workflow_id)
            .bind(&row.claim_hash)
            .bind(&row.document_id)
            .bind(&row.section_id)
            .bind(&row.statement)
            .bind(&row.claim_type)
            .bind(row.confidence)
            .bind(&row.decision)
            .bind(&row.canonical_statement)
            .bind(&row.resolved_claim_id)
            .bind(&row.resolution_action)
            .bind(&row.linked_entity_ids)
            .bind(&row.metadata)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn claim_resolutions_for_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<ClaimResolutionRow>> {
        let rows = sqlx::query_as::<_, ClaimResolutionRow>(
            "SELECT * FROM claim_resolution WHERE workflow_id = $1 ORDER BY created_at ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
