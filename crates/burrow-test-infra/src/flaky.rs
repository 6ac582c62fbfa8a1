//! A [`Storage`] wrapper whose failures can be switched on per operation.

use async_trait::async_trait;
use burrow_core::{Context, MappingRecord, Result, Stats, Storage, StorageError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Wraps a backend and injects transient failures on demand.
///
/// Calls that are not failed are forwarded unchanged, so the wrapped store
/// reflects every successful write.
pub struct FlakyStorage {
    inner: Arc<dyn Storage>,
    fail_delete: AtomicBool,
    fail_fetch_for: Mutex<HashSet<String>>,
    delete_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    deleted_batches: Mutex<Vec<Vec<String>>>,
    fetch_gate: watch::Sender<bool>,
    held_fetches: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        let (fetch_gate, _) = watch::channel(false);
        Self {
            inner,
            fail_delete: AtomicBool::new(false),
            fail_fetch_for: Mutex::new(HashSet::new()),
            delete_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            deleted_batches: Mutex::new(Vec::new()),
            fetch_gate,
            held_fetches: AtomicUsize::new(0),
        }
    }

    /// Makes `delete_short` fail until switched off again.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Makes `get_user_urls` fail for `user_id` until [`heal_fetch`](Self::heal_fetch).
    pub fn fail_fetch(&self, user_id: &str) {
        self.fail_fetch_for.lock().insert(user_id.to_string());
    }

    pub fn heal_fetch(&self, user_id: &str) {
        self.fail_fetch_for.lock().remove(user_id);
    }

    /// Parks every `get_user_urls` call until [`release_fetches`](Self::release_fetches).
    pub fn hold_fetches(&self) {
        self.fetch_gate.send_replace(true);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.send_replace(false);
    }

    /// Number of `get_user_urls` calls currently parked.
    pub fn held_fetches(&self) -> usize {
        self.held_fetches.load(Ordering::SeqCst)
    }

    /// Number of `delete_short` calls, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_user_urls` calls, failed ones included.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Code lists passed to successful `delete_short` calls, in call order.
    pub fn deleted_batches(&self) -> Vec<Vec<String>> {
        self.deleted_batches.lock().clone()
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        self.inner.ping(ctx).await
    }

    async fn get_addr(&self, ctx: &Context, short_code: &str) -> Result<MappingRecord> {
        self.inner.get_addr(ctx, short_code).await
    }

    async fn set(&self, ctx: &Context, record: MappingRecord) -> Result<()> {
        self.inner.set(ctx, record).await
    }

    async fn update(&self, ctx: &Context, records: Vec<MappingRecord>) -> Result<()> {
        self.inner.update(ctx, records).await
    }

    async fn get_user_urls(&self, ctx: &Context, user_id: &str) -> Result<Vec<MappingRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.fetch_gate.subscribe();
        let held = *gate.borrow();
        if held {
            self.held_fetches.fetch_add(1, Ordering::SeqCst);
            let _ = gate.wait_for(|held| !*held).await;
            self.held_fetches.fetch_sub(1, Ordering::SeqCst);
        }

        if self.fail_fetch_for.lock().contains(user_id) {
            return Err(StorageError::Unavailable(format!(
                "injected fetch failure for {user_id}"
            )));
        }
        self.inner.get_user_urls(ctx, user_id).await
    }

    async fn delete_short(&self, ctx: &Context, short_codes: &[String]) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_short(ctx, short_codes).await?;
        self.deleted_batches.lock().push(short_codes.to_vec());
        Ok(())
    }

    async fn stats(&self, ctx: &Context) -> Result<Stats> {
        self.inner.stats(ctx).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
