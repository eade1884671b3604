//! Error types for quarry.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using quarry's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for quarry operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Embedding provider returned an HTTP-level failure.
    ///
    /// Carries the status code and optional `Retry-After` so the retry
    /// layer can decide whether and when to try again.
    #[error("Provider error ({status}): {message}")]
    Provider {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Crawl operation failed
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// Content extraction failed
    #[error("Extract error: {0}")]
    Extract(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Indexing job error
    #[error("Job error: {0}")]
    Job(String),

    /// Job deadline exceeded
    #[error("Deadline exceeded: {0}")]
    Deadline(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Session has not been linked to an identity
    #[error("Session not linked: {0}")]
    NotLinked(String),

    /// Caller lacks the required grant for an index
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for provider errors that are worth retrying (429 and 5xx).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider {
                status: 429 | 500..=599,
                ..
            }
        )
    }

    /// `Retry-After` hint carried by a provider error, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Provider { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
