use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftpageError {
    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Review error: {0}")]
    Review(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Invalid or expired token: {0}")]
    Token(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
