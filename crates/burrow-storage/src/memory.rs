mod log;

use crate::memory::log::AppendLog;
use async_trait::async_trait;
use burrow_core::{Context, MappingRecord, Result, Stats, Storage, StorageError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, trace};

/// In-memory implementation of the [`Storage`] contract.
///
/// When opened with a file path, every mutation is appended to a JSON-lines
/// log (and flushed) before the in-memory index changes, and the index is
/// rebuilt from that log on the next start. Soft deletes are logged as
/// tombstones, so deleted codes stay deleted across restarts.
///
/// The index, the set of previously stored URLs and the log writer sit
/// behind one mutex. No `.await` happens while it is held, so a caller that
/// is cancelled never leaves a batch half applied.
#[derive(Debug)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, MappingRecord>,
    seen_urls: HashSet<String>,
    log: Option<AppendLog>,
    /// Number of records ever logged; backs generated ids.
    sequence: u64,
    closed: bool,
}

impl MemoryStorage {
    /// Creates a volatile store that keeps nothing across restarts.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Opens a durable store backed by the log at `path`, replaying it first.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (log, replayed) = AppendLog::open(path)?;
        let mut inner = Inner {
            sequence: replayed.len() as u64,
            ..Inner::default()
        };
        inner.apply(replayed);

        info!(
            path = %log.path().display(),
            records = inner.records.len(),
            "opened file-backed memory storage"
        );

        inner.log = Some(log);
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Opens a durable store when `path` is given, a volatile one otherwise.
    pub fn with_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::Unavailable("storage is closed".to_string()));
        }
        Ok(())
    }

    /// Logs `records` and, only once the log write succeeded, applies them.
    fn commit(&mut self, mut records: Vec<MappingRecord>) -> Result<()> {
        let mut sequence = self.sequence;
        for record in &mut records {
            sequence += 1;
            if record.id.is_empty() {
                record.id = sequence.to_string();
            }
        }

        if let Some(log) = self.log.as_mut() {
            log.append(&records)?;
        }

        self.sequence = sequence;
        self.apply(records);
        Ok(())
    }

    /// Merges records into the index by short code. The deleted flag only ever goes up.
    fn apply(&mut self, records: Vec<MappingRecord>) {
        for mut record in records {
            self.seen_urls.insert(record.original_url.clone());
            if let Some(existing) = self.records.get(&record.short_code) {
                record.deleted |= existing.deleted;
            }
            self.records.insert(record.short_code.clone(), record);
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.check()?;
        self.inner.lock().ensure_open()
    }

    async fn get_addr(&self, ctx: &Context, short_code: &str) -> Result<MappingRecord> {
        ctx.check()?;
        let inner = self.inner.lock();
        inner.ensure_open()?;

        match inner.records.get(short_code) {
            Some(record) => {
                trace!(code = %short_code, deleted = record.deleted, "found record");
                Ok(record.clone())
            }
            None => Err(StorageError::NotFound(short_code.to_string())),
        }
    }

    async fn set(&self, ctx: &Context, record: MappingRecord) -> Result<()> {
        ctx.check()?;
        record.validate()?;

        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        if inner.seen_urls.contains(&record.original_url) {
            return Err(StorageError::Conflict(record.original_url));
        }
        if inner.records.contains_key(&record.short_code) {
            return Err(StorageError::Conflict(record.short_code));
        }

        debug!(code = %record.short_code, url = %record.original_url, "storing record");
        inner.commit(vec![record])
    }

    async fn update(&self, ctx: &Context, records: Vec<MappingRecord>) -> Result<()> {
        ctx.check()?;
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            record.validate()?;
        }

        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        debug!(count = records.len(), "upserting records");
        inner.commit(records)
    }

    async fn get_user_urls(&self, ctx: &Context, user_id: &str) -> Result<Vec<MappingRecord>> {
        ctx.check()?;
        let inner = self.inner.lock();
        inner.ensure_open()?;

        let mut owned: Vec<MappingRecord> = inner
            .records
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        Ok(owned)
    }

    async fn delete_short(&self, ctx: &Context, short_codes: &[String]) -> Result<()> {
        ctx.check()?;
        if short_codes.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let mut marked = HashSet::new();
        let tombstones: Vec<MappingRecord> = short_codes
            .iter()
            .filter(|code| marked.insert(code.as_str()))
            .filter_map(|code| inner.records.get(code.as_str()))
            .filter(|record| !record.deleted)
            .map(|record| MappingRecord {
                deleted: true,
                ..record.clone()
            })
            .collect();

        if tombstones.is_empty() {
            trace!(requested = short_codes.len(), "nothing to delete");
            return Ok(());
        }

        debug!(count = tombstones.len(), "marking records deleted");
        inner.commit(tombstones)
    }

    async fn stats(&self, ctx: &Context) -> Result<Stats> {
        ctx.check()?;
        let inner = self.inner.lock();
        inner.ensure_open()?;

        let users: HashSet<&str> = inner
            .records
            .values()
            .map(|record| record.user_id.as_str())
            .collect();

        Ok(Stats {
            urls: inner.records.len(),
            users: users.len(),
        })
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        if let Some(mut log) = inner.log.take() {
            log.sync()?;
            info!(path = %log.path().display(), "closed file-backed memory storage");
        }
        Ok(())
    }
}
