use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// A stored mapping between a short code and the address it stands for.
///
/// The serde names are the on-disk names used by the append-only log of the
/// in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Correlation id, supplied by batch callers or generated by the backend.
    #[serde(rename = "uuid", default)]
    pub id: String,
    /// Opaque owner identifier. Never validated.
    #[serde(default)]
    pub user_id: String,
    /// Primary lookup key, unique across the whole store.
    #[serde(rename = "short_url")]
    pub short_code: String,
    /// The long address.
    pub original_url: String,
    /// Soft-delete flag. Once set it is never cleared.
    #[serde(rename = "is_deleted", default)]
    pub deleted: bool,
}

impl MappingRecord {
    /// Creates a live record with an empty id, leaving id assignment to the backend.
    pub fn new(
        user_id: impl Into<String>,
        short_code: impl Into<String>,
        original_url: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            user_id: user_id.into(),
            short_code: short_code.into(),
            original_url: original_url.into(),
            deleted: false,
        }
    }

    /// Sets the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Checks that both keys are present. Whitespace-only values count as empty.
    pub fn validate(&self) -> Result<()> {
        if self.short_code.trim().is_empty() {
            return Err(StorageError::Validation("short code is empty".to_string()));
        }
        if self.original_url.trim().is_empty() {
            return Err(StorageError::Validation(format!(
                "original URL is empty for short code '{}'",
                self.short_code
            )));
        }
        Ok(())
    }
}

/// Aggregate counts reported by [`Storage::stats`](crate::Storage::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Number of stored records, soft-deleted ones included.
    pub urls: usize,
    /// Number of distinct user ids owning at least one record.
    pub users: usize,
}
