//! Core types and traits for the Burrow URL shortener.
//!
//! This crate defines the storage contract shared by every backend and by
//! the deletion pipeline: the [`MappingRecord`] data type, the
//! [`StorageError`] taxonomy and the cancellable [`Context`].

pub mod context;
pub mod error;
pub mod record;
pub mod storage;

pub use context::Context;
pub use error::{ErrorKind, Result, StorageError};
pub use record::{MappingRecord, Stats};
pub use storage::Storage;
