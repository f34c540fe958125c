use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<kurt_store::StoreError> for IndexError {
    fn from(e: kurt_store::StoreError) -> Self {
        match e {
            kurt_store::StoreError::NotFound(what) => IndexError::NotFound(what),
            other => IndexError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
