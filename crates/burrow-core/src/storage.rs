use crate::context::Context;
use crate::error::Result;
use crate::record::{MappingRecord, Stats};
use async_trait::async_trait;

/// The contract every storage backend satisfies.
///
/// Implementations serialise concurrent callers themselves; callers share a
/// single instance (usually as `Arc<dyn Storage>`) without extra locking.
/// Every method checks `ctx` before doing any work and fails with the
/// context's error if it is already done.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Checks that the backend is reachable.
    async fn ping(&self, ctx: &Context) -> Result<()>;

    /// Retrieves the record for `short_code`.
    ///
    /// Soft-deleted records are returned with `deleted == true`, so callers
    /// can tell "gone" from "never existed". Returns
    /// [`StorageError::NotFound`](crate::StorageError::NotFound) for the latter.
    async fn get_addr(&self, ctx: &Context, short_code: &str) -> Result<MappingRecord>;

    /// Creates a single record.
    ///
    /// Returns `Err(Conflict)` if the original URL has been stored before,
    /// deleted or not, and `Err(Validation)` if either key is empty.
    async fn set(&self, ctx: &Context, record: MappingRecord) -> Result<()>;

    /// Inserts or overwrites records by short code, all or nothing.
    ///
    /// An empty batch is a no-op.
    async fn update(&self, ctx: &Context, records: Vec<MappingRecord>) -> Result<()>;

    /// Lists every record owned by `user_id`, soft-deleted ones included.
    async fn get_user_urls(&self, ctx: &Context, user_id: &str) -> Result<Vec<MappingRecord>>;

    /// Marks the given short codes as deleted. Unknown codes are ignored.
    async fn delete_short(&self, ctx: &Context, short_codes: &[String]) -> Result<()>;

    /// Returns aggregate record and user counts.
    async fn stats(&self, ctx: &Context) -> Result<Stats>;

    /// Releases file handles or connections. Calling it twice is harmless.
    async fn close(&self) -> Result<()>;
}
