//! Postgres persistence for the pipeline.
//!
//! One store type per aggregate, all sharing a `PgPool`. Writes go through
//! short transactions; nothing here holds a transaction across an LLM or
//! HTTP call.

pub mod claims;
pub mod documents;
pub mod entities;
pub mod error;
pub mod rows;
pub mod runs;
pub mod staging;

pub use claims::ClaimStore;
pub use documents::DocumentStore;
pub use entities::EntityStore;
pub use error::{Result, StoreError};
pub use runs::RunStore;
pub use staging::StagingStore;

use sqlx::PgPool;

/// Bundle of all stores over one pool.
#[derive(Clone)]
pub struct Stores {
    pub documents: DocumentStore,
    pub entities: EntityStore,
    pub claims: ClaimStore,
    pub runs: RunStore,
    pub staging: StagingStore,
}

impl Stores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            documents: DocumentStore::new(pool.clone()),
            entities: EntityStore::new(pool.clone()),
            claims: ClaimStore::new(pool.clone()),
            runs: RunStore::new(pool.clone()),
            staging: StagingStore::new(pool),
        }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}
