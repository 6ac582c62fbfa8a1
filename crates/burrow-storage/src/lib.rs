//! Storage backends for the Burrow URL shortener.
//!
//! Both backends implement [`burrow_core::Storage`] with identical
//! semantics: [`MemoryStorage`] keeps the index in memory and persists it to
//! an append-only log, [`PostgresStorage`] keeps it in a PostgreSQL table.

pub mod memory;
pub mod postgres;

pub use burrow_core::{Context, MappingRecord, Stats, Storage, StorageError};
pub use memory::MemoryStorage;
pub use postgres::{PoolSettings, PostgresStorage};
