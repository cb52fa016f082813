use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Errors surfaced by [`EntryStore`](crate::EntryStore) implementations.
///
/// Duplicates are not errors: a dedup hit is folded into
/// [`PostOutcome::duplicate`](crate::PostOutcome).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("short code already taken: {0}")]
    ShortCodeTaken(String),
    #[error("storage backend is closed")]
    Closed,
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("batch entry {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },
    #[error("storage operation failed: {0}")]
    Operation(String),
}

impl StoreError {
    /// Wraps an error raised while posting the `index`-th entry of a batch.
    pub fn batch(index: usize, source: StoreError) -> Self {
        Self::Batch {
            index,
            source: Box::new(source),
        }
    }

    /// Returns `true` when the backend itself is gone (closed, unreachable
    /// or timing out) rather than the operation being rejected.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Closed | Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Batch { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
