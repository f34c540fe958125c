use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::rows::EntityRow;

/// Retries for optimistic-concurrency updates before failing the entity
/// (not the workflow).
const VERSION_RETRIES: usize = 3;

#[derive(Clone)]
pub struct EntityStore {
    pool: PgPool,
}

impl EntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<EntityRow> {
        sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("entity {id}")))
    }

    /// Exact match on canonical name or alias, scoped to a type.
    pub async fn find_by_name_or_alias(
        &self,
        name: &str,
        entity_type: &str,
    ) -> Result<Option<EntityRow>> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT * FROM entities
            WHERE entity_type = $2
              AND (lower(name) = lower($1) OR aliases @> to_jsonb(ARRAY[$1]))
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// All entities with embeddings, for similarity matching during
    /// resolution.
    pub async fn all_with_embeddings(&self) -> Result<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            "SELECT * FROM entities WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert a new entity. `(name, entity_type)` uniqueness means a
    /// concurrent insert of the same concept surfaces as a conflict; the
    /// caller falls back to the winner's row.
    pub async fn insert(
        &self,
        name: &str,
        entity_type: &str,
        description: Option<&str>,
        aliases: &[String],
        embedding: Option<&[u8]>,
    ) -> Result<EntityRow> {
        let id = Uuid::new_v4().to_string();
        let result = sqlx::query_as::<_, EntityRow>(
            r#"
            INSERT INTO entities (id, name, entity_type, description, aliases, embedding)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(entity_type)
        .bind(description)
        .bind(serde_json::json!(aliases))
        .bind(embedding)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Lost the race: another workflow created this entity.
                self.find_by_name_or_alias(name, entity_type)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("entity {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge aliases and description into an existing entity under optimistic
    /// concurrency: the update only applies if the version is unchanged, and
    /// conflicts retry from a fresh read.
    pub async fn merge_aliases(
        &self,
        id: &str,
        new_aliases: &[String],
        description: Option<&str>,
    ) -> Result<EntityRow> {
        for attempt in 0..VERSION_RETRIES {
            let current = self.get(id).await?;
            let mut aliases = current.alias_list();
            for alias in new_aliases {
                if !aliases.iter().any(|a| a.eq_ignore_ascii_case(alias))
                    && !current.name.eq_ignore_ascii_case(alias)
                {
                    aliases.push(alias.clone());
                }
            }

            let updated = sqlx::query_as::<_, EntityRow>(
                r#"
                UPDATE entities
                SET aliases = $2,
                    description = COALESCE($3, description),
                    version = version + 1,
                    updated_at = now()
                WHERE id = $1 AND version = $4
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(serde_json::json!(aliases))
            .bind(description)
            .bind(current.version)
            .fetch_optional(&self.pool)
            .await?;

            match updated {
                Some(row) => return Ok(row),
                None => {
                    warn!(entity_id = id, attempt, "entity version conflict, retrying");
                    continue;
                }
            }
        }
        Err(StoreError::VersionConflict(id.to_string()))
    }
}
