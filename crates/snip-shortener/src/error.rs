use snip_core::{CoreError, StoreError};
use snip_deletion::DeletionError;
use thiserror::Error;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("short url not found: {0}")]
    NotFound(String),
    #[error("short url has been deleted: {0}")]
    Deleted(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Deletion(#[from] DeletionError),
}

impl From<CoreError> for ServiceError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}

impl ServiceError {
    /// Whether a retry might succeed once the backend recovers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_unavailable(),
            Self::Deletion(DeletionError::QueueFull(_)) => true,
            _ => false,
        }
    }
}
