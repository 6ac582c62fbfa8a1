//! Background, batched soft deletion of short codes.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use burrow_core::Storage;
//! # async fn demo(storage: Arc<dyn Storage>) -> burrow_deleter::Result<()> {
//! use burrow_deleter::{DeletionConfig, DeletionPipeline};
//!
//! let pipeline = DeletionPipeline::spawn(storage, DeletionConfig::default());
//! pipeline.submit("user-1", vec!["abc123".to_string()]).await?;
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod batch;
pub mod config;
pub mod error;
mod pipeline;

pub use batch::{DeleteIntent, FlushOutcome};
pub use config::{DeletionConfig, FetchFailurePolicy};
pub use error::{DeletionError, Result};
pub use pipeline::{DeletionHandle, DeletionPipeline, PipelineState};
