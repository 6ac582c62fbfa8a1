use crate::batch::{DeleteIntent, PendingBatch};
use crate::config::DeletionConfig;
use crate::error::{DeletionError, Result};
use burrow_core::{Context, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lower bound applied to the configured flush interval.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle of the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting intents and flushing on every tick.
    Running,
    /// Stop requested; queued intents are being flushed one last time.
    Draining,
    /// The worker has exited.
    Stopped,
}

/// Producer side of a running pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeletionHandle {
    sender: mpsc::Sender<DeleteIntent>,
    cancel_token: CancellationToken,
    state: watch::Receiver<PipelineState>,
}

impl DeletionHandle {
    /// Queues a deletion request for `user_id`.
    ///
    /// Waits while the queue is full. Returns as soon as the intent is queued;
    /// the deletion itself happens on a later flush. An empty code list is
    /// accepted and ignored.
    pub async fn submit(&self, user_id: &str, short_codes: Vec<String>) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(DeletionError::Stopped);
        }
        if short_codes.is_empty() {
            return Ok(());
        }

        self.sender
            .send(DeleteIntent::new(user_id, short_codes))
            .await
            .map_err(|_| DeletionError::Stopped)
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }
}

/// Asynchronous, batched soft deletion of short codes.
///
/// Producers submit intents through a bounded queue. A single worker task
/// buffers them and, on a fixed interval, deletes every code whose owner
/// matches the requesting user in one `delete_short` call.
pub struct DeletionPipeline {
    handle: DeletionHandle,
    worker: JoinHandle<()>,
}

impl DeletionPipeline {
    /// Spawns the worker on the current runtime.
    pub fn spawn(storage: Arc<dyn Storage>, config: DeletionConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PipelineState::Running);
        let cancel_token = CancellationToken::new();

        let worker = Worker {
            pending: PendingBatch::new(config.max_pending),
            storage,
            config,
            receiver,
            cancel_token: cancel_token.clone(),
            state: state_tx,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            handle: DeletionHandle {
                sender,
                cancel_token,
                state: state_rx,
            },
            worker,
        }
    }

    pub fn handle(&self) -> DeletionHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, user_id: &str, short_codes: Vec<String>) -> Result<()> {
        self.handle.submit(user_id, short_codes).await
    }

    pub fn state(&self) -> PipelineState {
        self.handle.state()
    }

    /// Signals the worker to stop. Calling it more than once is harmless.
    ///
    /// Returns immediately; use [`shutdown`](Self::shutdown) to wait for the
    /// worker to exit.
    pub fn stop(&self) {
        self.handle.cancel_token.cancel();
    }

    /// Stops the worker and waits for it to exit, final flush included.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.worker
            .await
            .map_err(|err| DeletionError::Worker(err.to_string()))
    }
}

struct Worker {
    storage: Arc<dyn Storage>,
    config: DeletionConfig,
    pending: PendingBatch,
    receiver: mpsc::Receiver<DeleteIntent>,
    cancel_token: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl Worker {
    async fn run(mut self) {
        let period = self.config.flush_interval.max(MIN_FLUSH_INTERVAL);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?period,
            policy = %self.config.fetch_failure_policy,
            "deletion pipeline started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => self.flush().await,
                intent = self.receiver.recv() => match intent {
                    Some(intent) => self.accept(intent),
                    None => break,
                },
            }
        }

        if self.config.drain_on_stop {
            self.state.send_replace(PipelineState::Draining);
            self.receiver.close();
            while let Some(intent) = self.receiver.recv().await {
                self.accept(intent);
            }
            self.flush().await;
        } else if !self.pending.is_empty() {
            warn!(
                pending = self.pending.codes(),
                "deletion pipeline stopped with unflushed intents"
            );
        }

        info!("deletion pipeline stopped");
    }

    fn accept(&mut self, intent: DeleteIntent) {
        debug!(
            user_id = %intent.user_id,
            codes = intent.short_codes.len(),
            "queued deletion intent"
        );
        self.pending.push(intent);
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let ctx = Context::background().with_timeout(self.config.flush_timeout);
        match self
            .pending
            .flush(
                self.storage.as_ref(),
                &ctx,
                self.config.fetch_failure_policy,
            )
            .await
        {
            Ok(outcome) => debug!(
                deleted = outcome.deleted,
                rejected = outcome.rejected,
                failed_users = outcome.failed_users,
                retained = outcome.retained,
                "flushed deletions"
            ),
            Err(err) => warn!(
                error = %err,
                pending = self.pending.codes(),
                "failed to delete short codes, keeping batch for next flush"
            ),
        }
    }
}

// Runs however the worker exits, panics included.
impl Drop for Worker {
    fn drop(&mut self) {
        self.state.send_replace(PipelineState::Stopped);
    }
}
