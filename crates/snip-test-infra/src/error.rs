use thiserror::Error;

/// Result type for fixture setup.
pub type Result<T> = std::result::Result<T, TestInfraError>;

#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("container failed: {0}")]
    Container(#[from] testcontainers::TestcontainersError),
    /// The fixture was configured in a way the image refuses to start with.
    #[error("invalid fixture config: {0}")]
    InvalidConfig(String),
}
