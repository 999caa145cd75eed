use thiserror::Error;
use uuid::Uuid;

use crate::item::ItemStatus;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid configuration value, raised at construction time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The job queue was closed; no further enqueue/dequeue is possible.
    #[error("Job queue is closed")]
    QueueClosed,

    /// The operation observed the cancellation signal before completing.
    #[error("Operation cancelled")]
    Cancelled,

    /// The per-origin wait queue is full. Signals that the configured
    /// concurrency exceeds what the bucket can hold in line.
    #[error(
        "Rate limit could not be acquired for '{key}' (queue limit {queue_limit}); \
         increase the queue limit or reduce load"
    )]
    RateLimitRejected { key: String, queue_limit: usize },

    /// URL could not be parsed or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Article content could not be extracted.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same unique key (item URL, source name/URL) exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Status update that is not an edge of the item state machine.
    #[error("Invalid status transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// Feed could not be downloaded or parsed.
    #[error("Feed error: {0}")]
    FeedError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
