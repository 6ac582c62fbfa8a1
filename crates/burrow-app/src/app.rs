use crate::error::{AppError, Result};
use burrow_core::Storage;
use burrow_deleter::{DeletionConfig, DeletionHandle, DeletionPipeline};
use burrow_storage::{MemoryStorage, PoolSettings, PostgresStorage};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

/// The storage backend to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// In-memory index, persisted to `path` when one is given.
    Memory { path: Option<PathBuf> },
    Postgres { dsn: String, pool: PoolSettings },
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory { path: None } => write!(f, "in-memory"),
            Backend::Memory { path: Some(path) } => write!(f, "in-memory ({})", path.display()),
            Backend::Postgres { .. } => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct Settings {
    #[builder(default = Backend::Memory { path: None })]
    pub backend: Backend,
    #[builder(default)]
    pub deletion: DeletionConfig,
}

/// Opens the selected backend behind the storage contract.
pub async fn open_storage(backend: &Backend) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match backend {
        Backend::Memory { path } => Arc::new(MemoryStorage::with_optional_path(path.as_deref())?),
        Backend::Postgres { dsn, pool } => Arc::new(PostgresStorage::connect_with(dsn, *pool).await?),
    };
    info!(%backend, "storage backend ready");
    Ok(storage)
}

/// A running Burrow instance: the active backend plus its deletion pipeline.
///
/// Transport layers take [`storage`](Self::storage) for reads and writes and
/// route delete requests through [`delete_user_urls`](Self::delete_user_urls).
pub struct Application {
    storage: Arc<dyn Storage>,
    deleter: DeletionPipeline,
}

impl Application {
    /// Opens the configured backend and starts the deletion pipeline.
    pub async fn start(settings: Settings) -> Result<Self> {
        let storage = open_storage(&settings.backend).await?;
        Ok(Self::with_storage(storage, settings.deletion))
    }

    /// Starts the deletion pipeline on an already opened backend.
    pub fn with_storage(storage: Arc<dyn Storage>, deletion: DeletionConfig) -> Self {
        let deleter = DeletionPipeline::spawn(storage.clone(), deletion);
        Self { storage, deleter }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn deleter(&self) -> DeletionHandle {
        self.deleter.handle()
    }

    /// Queues `short_codes` for deletion on behalf of `user_id`.
    ///
    /// Codes the user does not own are silently skipped when the batch is
    /// flushed.
    pub async fn delete_user_urls(&self, user_id: &str, short_codes: Vec<String>) -> Result<()> {
        self.deleter.submit(user_id, short_codes).await?;
        Ok(())
    }

    /// Stops the deletion pipeline, then closes the backend.
    pub async fn shutdown(self) -> Result<()> {
        let drained = self.deleter.shutdown().await;
        if let Err(err) = &drained {
            warn!(error = %err, "deletion pipeline did not stop cleanly");
        }
        self.storage.close().await?;
        info!("application stopped");
        Ok(drained?)
    }

    /// Like [`shutdown`](Self::shutdown), bounded by `timeout`.
    ///
    /// When the pipeline does not stop in time its final flush is abandoned,
    /// but the backend is still closed before returning.
    pub async fn shutdown_within(self, timeout: Duration) -> Result<()> {
        let storage = self.storage.clone();
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "shutdown timed out, closing storage");
                if let Err(err) = storage.close().await {
                    warn!(error = %err, "failed to close storage after shutdown timeout");
                }
                Err(AppError::ShutdownTimedOut(timeout))
            }
        }
    }
}
