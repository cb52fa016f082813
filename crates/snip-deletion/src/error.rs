use snip_core::StoreError;
use thiserror::Error;

/// Result type for deletion pipeline operations.
pub type Result<T> = std::result::Result<T, DeletionError>;

#[derive(Debug, Clone, Error)]
pub enum DeletionError {
    #[error("deletion queue is full ({0} pending requests)")]
    QueueFull(usize),
    #[error("deletion pipeline is stopped")]
    Stopped,
    #[error("{} deletion chunk(s) failed: {}", .0.len(), join_errors(.0))]
    Failed(Vec<StoreError>),
}

fn join_errors(errors: &[StoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_lists_every_error() {
        let err = DeletionError::Failed(vec![
            StoreError::Timeout("pool".to_string()),
            StoreError::Closed,
        ]);
        assert_eq!(
            err.to_string(),
            "2 deletion chunk(s) failed: storage operation timed out: pool; storage backend is closed"
        );
    }
}
