use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {0}")]
    VersionConflict(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
