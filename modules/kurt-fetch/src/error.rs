use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Download error: {0}")]
    Download(String),

    #[error("No content extracted (page might be empty or paywall blocked): {0}")]
    EmptyContent(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Content store error: {0}")]
    ContentStore(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CMS error: {0}")]
    Cms(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<kurt_store::StoreError> for FetchError {
    fn from(e: kurt_store::StoreError) -> Self {
        FetchError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
