use thiserror::Error;

/// Result type for deletion pipeline operations.
pub type Result<T> = std::result::Result<T, DeletionError>;

#[derive(Debug, Clone, Error)]
pub enum DeletionError {
    #[error("deletion pipeline is stopped")]
    Stopped,
    #[error("deletion worker failed: {0}")]
    Worker(String),
}
