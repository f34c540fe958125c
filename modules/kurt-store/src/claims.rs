use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::rows::{ClaimRow, InsertClaim};

#[derive(Clone)]
pub struct ClaimStore {
    pool: PgPool,
}

impl ClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, claim: InsertClaim) -> Result<ClaimRow> {
        let id = Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            INSERT INTO claims
                (id, claim_hash, statement, claim_type, confidence, subject_entity_id,
                 source_quote, document_id, section_id, workflow_id, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&claim.claim_hash)
        .bind(&claim.statement)
        .bind(&claim.claim_type)
        .bind(claim.confidence)
        .bind(&claim.subject_entity_id)
        .bind(&claim.source_quote)
        .bind(&claim.document_id)
        .bind(&claim.section_id)
        .bind(&claim.workflow_id)
        .bind(&claim.embedding)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_by_hash(&self, claim_hash: &str) -> Result<Option<ClaimRow>> {
        let row = sqlx::query_as::<_, ClaimRow>("SELECT * FROM claims WHERE claim_hash = $1")
            .bind(claim_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// All claims with embeddings, for similarity against new clusters.
    pub async fn all_with_embeddings(&self) -> Result<Vec<ClaimRow>> {
        let rows =
            sqlx::query_as::<_, ClaimRow>("SELECT * FROM claims WHERE embedding IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Link a claim to entities, skipping pairs that already exist.
    pub async fn link_entities(&self, claim_id: &str, entity_ids: &[String]) -> Result<u64> {
        let mut linked = 0;
        for entity_id in entity_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO claim_entities (claim_id, entity_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(claim_id)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
            linked += result.rows_affected();
        }
        Ok(linked)
    }

    pub async fn linked_entity_ids(&self, claim_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT entity_id FROM claim_entities WHERE claim_id = $1",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Incremental re-indexing cleanup: remove this document's claims and
    /// entity links written by *other* workflows. Entities themselves stay —
    /// they are cross-document.
    pub async fn delete_stale_for_document(
        &self,
        document_id: &str,
        current_workflow_id: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let claims_deleted = sqlx::query(
            "DELETE FROM claims WHERE document_id = $1 AND workflow_id <> $2",
        )
        .bind(document_id)
        .bind(current_workflow_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "DELETE FROM document_entities WHERE document_id = $1 AND workflow_id <> $2",
        )
        .bind(document_id)
        .bind(current_workflow_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claims_deleted)
    }

    /// Count of claims for a workflow, for the resolution counting contract.
    pub async fn count_for_workflow(&self, workflow_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM claims WHERE workflow_id = $1")
                .bind(workflow_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
