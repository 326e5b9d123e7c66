use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Candidate selection failed: {0}")]
    Selection(String),

    #[error("Marketplace temporarily unavailable: {0}")]
    RetryableFetch(String),

    #[error("Marketplace request rejected: {0}")]
    FatalFetch(String),

    #[error("Failed to persist snapshot: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
