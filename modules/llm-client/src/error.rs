use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("Rate limited")]
    RateLimited,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited => true,
            LlmError::Request(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Parse(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
