use thiserror::Error;

#[derive(Error, Debug)]
pub enum FirecrawlError {
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Batch job {0} did not complete within {1}s")]
    Timeout(String, u64),

    #[error("Response parsing failed: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, FirecrawlError>;
