use thiserror::Error;

#[derive(Error, Debug)]
pub enum TavilyError {
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("URL not supported")]
    UrlNotSupported,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Credit or plan limit exceeded")]
    PlanLimit,

    #[error("Maximum 20 URLs per extract request, got {0}")]
    BatchTooLarge(usize),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Response parsing failed: {0}")]
    Parse(String),
}

impl TavilyError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => TavilyError::InvalidApiKey,
            403 => TavilyError::UrlNotSupported,
            429 => TavilyError::RateLimited,
            432 | 433 => TavilyError::PlanLimit,
            _ => TavilyError::Api { status, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, TavilyError>;
