//! Error types for the store, the remote client and the repository boundary

use thiserror::Error;

/// Failures of the remote signal service client
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The service answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The body could not be decoded into the expected payload
    #[error("Invalid payload: {0}")]
    Payload(String),
}

/// Failures of the local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Signal {signal_id} is already being followed")]
    DuplicateFollow { signal_id: i64 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Every failure a repository caller has to branch on
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    /// No network or connection failure. Safe to retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service was reached but refused or failed the request
    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Signal {0} is already being followed")]
    DuplicateFollow(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl RepositoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Transport(_))
    }
}

impl From<ApiError> for RepositoryError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Transport(message) => RepositoryError::Transport(message),
            ApiError::Status { status, message } => {
                RepositoryError::Remote(format!("HTTP {}: {}", status, message))
            }
            ApiError::Payload(message) => RepositoryError::Remote(message),
        }
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateFollow { signal_id } => RepositoryError::DuplicateFollow(signal_id),
            StoreError::NotFound { entity, id } => {
                RepositoryError::NotFound(format!("{} {}", entity, id))
            }
            other => RepositoryError::Persistence(other.to_string()),
        }
    }
}

/// Failures delivering an alert
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,

    #[error("Notification channel full")]
    Full,

    #[error("Delivery timed out after {0} ms")]
    Timeout(u64),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Invalid or missing process configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
