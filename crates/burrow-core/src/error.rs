use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The four kinds of failure every storage backend reports.
///
/// Callers branch on the kind rather than on the concrete variant, e.g. a
/// transport layer maps [`ErrorKind::Conflict`] to its own "already exists"
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No record exists for the requested short code.
    NotFound,
    /// The original URL is already mapped to a short code.
    Conflict,
    /// The caller supplied an empty or malformed record.
    Validation,
    /// The backend could not serve the request (I/O, database, cancelled context).
    Unavailable,
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("address already exists: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation cancelled")]
    Cancelled,
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Folds the concrete error into one of the contract's error kinds.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Conflict(_) => ErrorKind::Conflict,
            StorageError::Validation(_) => ErrorKind::Validation,
            StorageError::Unavailable(_)
            | StorageError::Cancelled
            | StorageError::Timeout(_)
            | StorageError::Query(_)
            | StorageError::InvalidData(_) => ErrorKind::Unavailable,
        }
    }

    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}
