use thiserror::Error;

/// Error taxonomy for the whole pipeline.
///
/// The split matters for control flow: `Validation` is raised before any step
/// runs and leaves no database state; `Transient` is retried with backoff;
/// `Permanent` is recorded as a per-item failure and the workflow proceeds;
/// `Fatal` fails the workflow and requires operator remediation.
#[derive(Error, Debug)]
pub enum KurtError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permanent error: {0}")]
    Permanent(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl KurtError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KurtError::Transient(_) | KurtError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, KurtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(KurtError::Transient("timeout".into()).is_retryable());
        assert!(!KurtError::Permanent("paywall".into()).is_retryable());
        assert!(!KurtError::Validation("cycle".into()).is_retryable());
    }
}
