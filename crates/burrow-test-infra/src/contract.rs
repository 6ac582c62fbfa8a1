//! Behaviour every [`Storage`] backend must share.
//!
//! Each check expects an empty store and panics on the first violation, so
//! backend test suites can call them one per `#[tokio::test]`.

use burrow_core::{Context, MappingRecord, Stats, Storage, StorageError};

fn record(user: &str, code: &str, url: &str) -> MappingRecord {
    MappingRecord::new(user, code, url)
}

fn codes(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// `set` followed by `get_addr` returns the live record.
pub async fn round_trip(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .set(&ctx, record("u1", "abc123", "http://example.com"))
        .await
        .expect("set");

    let got = storage.get_addr(&ctx, "abc123").await.expect("get_addr");
    assert_eq!(got.short_code, "abc123");
    assert_eq!(got.original_url, "http://example.com");
    assert_eq!(got.user_id, "u1");
    assert!(!got.deleted);

    let err = storage.get_addr(&ctx, "missing").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)), "got {err:?}");
}

/// A second `set` of the same address under another code conflicts and
/// leaves the first mapping untouched.
pub async fn conflict_on_same_address(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .set(&ctx, record("u1", "first", "http://example.com"))
        .await
        .expect("first set");
    let err = storage
        .set(&ctx, record("u2", "second", "http://example.com"))
        .await
        .unwrap_err();

    assert!(err.is_conflict(), "got {err:?}");
    assert_eq!(
        storage.get_addr(&ctx, "first").await.expect("first").user_id,
        "u1"
    );
    assert!(storage
        .get_addr(&ctx, "second")
        .await
        .unwrap_err()
        .is_not_found());
}

/// Deleted records still block re-registration of their address.
pub async fn conflict_after_delete(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .set(&ctx, record("u1", "abc123", "http://example.com"))
        .await
        .expect("set");
    storage
        .delete_short(&ctx, &codes(&["abc123"]))
        .await
        .expect("delete");

    let err = storage
        .set(&ctx, record("u1", "def456", "http://example.com"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
}

/// Empty keys are rejected by `set`.
pub async fn set_validates_input(storage: &dyn Storage) {
    let ctx = Context::background();

    for bad in [
        record("u1", "", "http://example.com"),
        record("u1", "abc123", ""),
        record("u1", "  ", "http://example.com"),
    ] {
        let err = storage.set(&ctx, bad).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)), "got {err:?}");
    }
    assert_eq!(storage.stats(&ctx).await.expect("stats").urls, 0);
}

/// Upserting the same code twice keeps the latest address.
pub async fn upsert_overwrites(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .update(&ctx, vec![record("u1", "code", "http://a.example")])
        .await
        .expect("first update");
    storage
        .update(&ctx, vec![record("u1", "code", "http://b.example")])
        .await
        .expect("second update");

    let got = storage.get_addr(&ctx, "code").await.expect("get_addr");
    assert_eq!(got.original_url, "http://b.example");
    assert_eq!(storage.stats(&ctx).await.expect("stats").urls, 1);
}

/// Soft delete keeps the record, flags it, and an upsert never clears the flag.
pub async fn soft_delete(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .update(
            &ctx,
            vec![
                record("u1", "gone", "http://gone.example"),
                record("u1", "kept", "http://kept.example"),
            ],
        )
        .await
        .expect("update");
    storage
        .delete_short(&ctx, &codes(&["gone", "never-existed"]))
        .await
        .expect("delete");

    assert!(storage.get_addr(&ctx, "gone").await.expect("gone").deleted);
    assert!(!storage.get_addr(&ctx, "kept").await.expect("kept").deleted);

    storage
        .update(&ctx, vec![record("u1", "gone", "http://gone-again.example")])
        .await
        .expect("re-upsert");
    assert!(storage.get_addr(&ctx, "gone").await.expect("gone").deleted);
}

/// `get_user_urls` only returns the caller's records, deleted ones included.
pub async fn user_isolation(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .update(
            &ctx,
            vec![
                record("alice", "a2", "http://a2.example"),
                record("bob", "b1", "http://b1.example"),
                record("alice", "a1", "http://a1.example"),
            ],
        )
        .await
        .expect("update");
    storage
        .delete_short(&ctx, &codes(&["a2"]))
        .await
        .expect("delete");

    let alice = storage.get_user_urls(&ctx, "alice").await.expect("alice");
    let got: Vec<_> = alice.iter().map(|r| r.short_code.as_str()).collect();
    assert_eq!(got, ["a1", "a2"]);
    assert!(alice.iter().all(|r| r.user_id == "alice"));
    assert!(alice[1].deleted);

    assert!(storage
        .get_user_urls(&ctx, "carol")
        .await
        .expect("carol")
        .is_empty());
}

/// Empty batches succeed without touching anything.
pub async fn empty_batches_are_noops(storage: &dyn Storage) {
    let ctx = Context::background();

    storage
        .set(&ctx, record("u1", "abc123", "http://example.com"))
        .await
        .expect("set");
    storage.update(&ctx, Vec::new()).await.expect("update");
    storage.delete_short(&ctx, &[]).await.expect("delete");

    let got = storage.get_addr(&ctx, "abc123").await.expect("get_addr");
    assert!(!got.deleted);
    assert_eq!(
        storage.stats(&ctx).await.expect("stats"),
        Stats { urls: 1, users: 1 }
    );
}

/// `stats` counts every record and every distinct owner.
pub async fn stats_counts(storage: &dyn Storage) {
    let ctx = Context::background();

    assert_eq!(storage.stats(&ctx).await.expect("stats"), Stats::default());

    storage
        .update(
            &ctx,
            vec![
                record("u1", "a", "http://a.example"),
                record("u1", "b", "http://b.example"),
                record("u2", "c", "http://c.example"),
            ],
        )
        .await
        .expect("update");
    storage
        .delete_short(&ctx, &codes(&["c"]))
        .await
        .expect("delete");

    assert_eq!(
        storage.stats(&ctx).await.expect("stats"),
        Stats { urls: 3, users: 2 }
    );
}

/// Every operation refuses to start under a cancelled context.
pub async fn cancelled_context_fails_fast(storage: &dyn Storage) {
    let ctx = Context::background().with_cancel();
    ctx.cancel();

    assert!(storage.ping(&ctx).await.is_err());
    assert!(storage.get_addr(&ctx, "abc").await.is_err());
    assert!(storage
        .set(&ctx, record("u1", "abc", "http://example.com"))
        .await
        .is_err());
    assert!(storage
        .update(&ctx, vec![record("u1", "abc", "http://example.com")])
        .await
        .is_err());
    assert!(storage.get_user_urls(&ctx, "u1").await.is_err());
    assert!(storage.delete_short(&ctx, &codes(&["abc"])).await.is_err());
    assert!(storage.stats(&ctx).await.is_err());

    let live = Context::background();
    assert_eq!(storage.stats(&live).await.expect("stats").urls, 0);
}
