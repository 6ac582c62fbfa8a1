use burrow_core::StorageError;
use burrow_deleter::DeletionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("deletion pipeline error: {0}")]
    Deletion(#[from] DeletionError),
    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimedOut(std::time::Duration),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(String),
}
