use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::rows::DocumentRow;

#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a document if `(source_type, source_url)` is new; return the
    /// existing row otherwise. Discovery is idempotent because of this.
    pub async fn create_or_get(
        &self,
        source_url: &str,
        source_type: &str,
        title: Option<&str>,
    ) -> Result<(DocumentRow, bool)> {
        if let Some(existing) = self.find_by_source(source_url, source_type).await? {
            return Ok((existing, false));
        }

        let id = Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (id, source_url, source_type, title)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source_type, source_url) DO UPDATE SET updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(source_url)
        .bind(source_type)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        let created = row.id == id;
        Ok((row, created))
    }

    pub async fn get(&self, id: &str) -> Result<DocumentRow> {
        sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))
    }

    pub async fn find_by_source(
        &self,
        source_url: &str,
        source_type: &str,
    ) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE source_url = $1 AND source_type = $2",
        )
        .bind(source_url)
        .bind(source_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<DocumentRow>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE content_hash = $1 LIMIT 1",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Documents eligible for fetching, optionally filtered by source type
    /// and capped. Without `refetch`, already-fetched documents are excluded.
    pub async fn list_for_fetch(
        &self,
        source_types: &[String],
        refetch: bool,
        limit: Option<i64>,
    ) -> Result<Vec<DocumentRow>> {
        let types: Vec<String> = if source_types.is_empty() {
            vec!["url".into(), "file".into(), "cms".into(), "api".into()]
        } else {
            source_types.to_vec()
        };

        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE source_type = ANY($1)
              AND ($2 OR content_hash IS NULL)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(&types)
        .bind(refetch)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<DocumentRow>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Record a successful fetch.
    pub async fn update_fetch_result(
        &self,
        id: &str,
        content_path: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET content_path = $2, content_hash = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(content_path)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that indexing processed this content hash.
    pub async fn set_indexed_with_hash(&self, id: &str, hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET indexed_with_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_title_description(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
