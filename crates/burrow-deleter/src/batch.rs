use crate::config::FetchFailurePolicy;
use burrow_core::{Context, Storage, StorageError};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use tracing::{debug, error, warn};

/// A user's request to delete some of their short codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteIntent {
    pub user_id: String,
    pub short_codes: Vec<String>,
}

impl DeleteIntent {
    pub fn new(user_id: impl Into<String>, short_codes: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            short_codes,
        }
    }
}

/// What a single flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Codes passed to `delete_short`.
    pub deleted: usize,
    /// Codes dropped because the requesting user does not own them.
    pub rejected: usize,
    /// Users whose records could not be fetched.
    pub failed_users: usize,
    /// Codes left in the buffer for the next flush.
    pub retained: usize,
}

/// Intents accumulated between flushes, oldest first.
#[derive(Debug)]
pub(crate) struct PendingBatch {
    intents: VecDeque<DeleteIntent>,
    codes: usize,
    max_codes: Option<usize>,
}

impl PendingBatch {
    pub(crate) fn new(max_codes: Option<usize>) -> Self {
        Self {
            intents: VecDeque::new(),
            codes: 0,
            max_codes,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Number of buffered short codes, duplicates included.
    pub(crate) fn codes(&self) -> usize {
        self.codes
    }

    /// Buffers `intent`, evicting the oldest intents once the cap is exceeded.
    ///
    /// Returns the number of codes evicted.
    pub(crate) fn push(&mut self, intent: DeleteIntent) -> usize {
        self.codes += intent.short_codes.len();
        self.intents.push_back(intent);

        let Some(max) = self.max_codes else {
            return 0;
        };

        let mut evicted = 0;
        while self.codes > max {
            let Some(oldest) = self.intents.pop_front() else {
                break;
            };
            self.codes -= oldest.short_codes.len();
            evicted += oldest.short_codes.len();
            error!(
                user_id = %oldest.user_id,
                codes = oldest.short_codes.len(),
                max_pending = max,
                "pending deletions over capacity, dropping oldest intent"
            );
        }
        evicted
    }

    /// Resolves every buffered intent against current ownership and deletes
    /// the owned codes in one call.
    ///
    /// When `delete_short` fails the buffer is left untouched and the error
    /// returned. Otherwise the buffer is cleared, except for intents of users
    /// whose records could not be fetched under [`FetchFailurePolicy::Retry`].
    pub(crate) async fn flush(
        &mut self,
        storage: &dyn Storage,
        ctx: &Context,
        policy: FetchFailurePolicy,
    ) -> Result<FlushOutcome, StorageError> {
        let mut requested: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for intent in &self.intents {
            requested
                .entry(intent.user_id.as_str())
                .or_default()
                .extend(intent.short_codes.iter().map(String::as_str));
        }

        let mut outcome = FlushOutcome::default();
        let mut to_delete = Vec::new();
        let mut failed_users = HashSet::new();

        for (user_id, codes) in &requested {
            let records = match storage.get_user_urls(ctx, user_id).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(%user_id, error = %err, %policy, "failed to fetch user urls");
                    failed_users.insert(user_id.to_string());
                    continue;
                }
            };

            let owned: HashSet<&str> = records.iter().map(|r| r.short_code.as_str()).collect();
            for code in codes {
                if owned.contains(code) {
                    to_delete.push(code.to_string());
                } else {
                    debug!(%user_id, short_code = %code, "ignoring code not owned by user");
                    outcome.rejected += 1;
                }
            }
        }

        if !to_delete.is_empty() {
            storage.delete_short(ctx, &to_delete).await?;
        }

        outcome.deleted = to_delete.len();
        outcome.failed_users = failed_users.len();

        match policy {
            FetchFailurePolicy::Retry if !failed_users.is_empty() => {
                self.intents
                    .retain(|intent| failed_users.contains(&intent.user_id));
                self.codes = self.intents.iter().map(|i| i.short_codes.len()).sum();
            }
            _ => {
                self.intents.clear();
                self.codes = 0;
            }
        }
        outcome.retained = self.codes;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burrow_core::MappingRecord;
    use burrow_storage::MemoryStorage;
    use burrow_test_infra::FlakyStorage;

    fn codes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    async fn seeded() -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .update(
                &Context::background(),
                vec![
                    MappingRecord::new("alice", "a1", "http://a1.example"),
                    MappingRecord::new("alice", "a2", "http://a2.example"),
                    MappingRecord::new("bob", "b1", "http://b1.example"),
                ],
            )
            .await
            .unwrap();
        storage
    }

    #[test]
    fn push_without_cap_keeps_everything() {
        let mut batch = PendingBatch::new(None);
        for i in 0..100 {
            assert_eq!(batch.push(DeleteIntent::new("u", codes(&["a", "b"]))), 0);
            assert_eq!(batch.codes(), (i + 1) * 2);
        }
    }

    #[test]
    fn push_over_cap_evicts_oldest() {
        let mut batch = PendingBatch::new(Some(3));
        batch.push(DeleteIntent::new("old", codes(&["a", "b"])));
        let evicted = batch.push(DeleteIntent::new("new", codes(&["c", "d"])));

        assert_eq!(evicted, 2);
        assert_eq!(batch.codes(), 2);
        assert_eq!(batch.intents[0].user_id, "new");
    }

    #[test]
    fn oversized_intent_is_dropped_entirely() {
        let mut batch = PendingBatch::new(Some(1));
        let evicted = batch.push(DeleteIntent::new("u", codes(&["a", "b"])));

        assert_eq!(evicted, 2);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn flush_deletes_only_owned_codes() {
        let storage = seeded().await;
        let ctx = Context::background();
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("alice", codes(&["a1", "b1"])));
        batch.push(DeleteIntent::new("bob", codes(&["b1", "a2"])));

        let outcome = batch
            .flush(storage.as_ref(), &ctx, FetchFailurePolicy::Retry)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.rejected, 2);
        assert!(batch.is_empty());
        assert!(storage.get_addr(&ctx, "a1").await.unwrap().deleted);
        assert!(storage.get_addr(&ctx, "b1").await.unwrap().deleted);
        assert!(!storage.get_addr(&ctx, "a2").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn duplicate_codes_are_deleted_once() {
        let storage = Arc::new(FlakyStorage::new(seeded().await));
        let ctx = Context::background();
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("alice", codes(&["a1", "a1"])));
        batch.push(DeleteIntent::new("alice", codes(&["a1"])));

        let outcome = batch
            .flush(storage.as_ref(), &ctx, FetchFailurePolicy::Retry)
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 1);
        assert_eq!(storage.fetch_calls(), 1);
        assert_eq!(storage.deleted_batches(), vec![codes(&["a1"])]);
    }

    #[tokio::test]
    async fn nothing_owned_skips_delete_call() {
        let storage = Arc::new(FlakyStorage::new(seeded().await));
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("mallory", codes(&["a1"])));

        let outcome = batch
            .flush(
                storage.as_ref(),
                &Context::background(),
                FetchFailurePolicy::Retry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.rejected, 1);
        assert_eq!(storage.delete_calls(), 0);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_buffer() {
        let storage = Arc::new(FlakyStorage::new(seeded().await));
        storage.fail_deletes(true);
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("alice", codes(&["a1"])));

        let err = batch
            .flush(
                storage.as_ref(),
                &Context::background(),
                FetchFailurePolicy::Drop,
            )
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(batch.codes(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_retry_keeps_only_failed_user() {
        let storage = Arc::new(FlakyStorage::new(seeded().await));
        storage.fail_fetch("alice");
        let ctx = Context::background();
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("alice", codes(&["a1"])));
        batch.push(DeleteIntent::new("bob", codes(&["b1"])));

        let outcome = batch
            .flush(storage.as_ref(), &ctx, FetchFailurePolicy::Retry)
            .await
            .unwrap();

        assert_eq!(outcome.failed_users, 1);
        assert_eq!(outcome.retained, 1);
        assert_eq!(batch.intents[0].user_id, "alice");
        assert!(storage.get_addr(&ctx, "b1").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn fetch_failure_drop_discards_failed_user() {
        let storage = Arc::new(FlakyStorage::new(seeded().await));
        storage.fail_fetch("alice");
        let ctx = Context::background();
        let mut batch = PendingBatch::new(None);
        batch.push(DeleteIntent::new("alice", codes(&["a1"])));
        batch.push(DeleteIntent::new("bob", codes(&["b1"])));

        let outcome = batch
            .flush(storage.as_ref(), &ctx, FetchFailurePolicy::Drop)
            .await
            .unwrap();

        assert_eq!(outcome.failed_users, 1);
        assert_eq!(outcome.retained, 0);
        assert!(batch.is_empty());
        assert!(!storage.get_addr(&ctx, "a1").await.unwrap().deleted);
        assert!(storage.get_addr(&ctx, "b1").await.unwrap().deleted);
    }
}
