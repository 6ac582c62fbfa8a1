use crate::error::{Result, StorageError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline scope passed to every storage call.
///
/// A `Context` is cheap to clone. Derived contexts ([`with_cancel`],
/// [`with_timeout`], [`with_deadline`]) are cancelled together with their
/// parent, but cancelling a child never affects the parent.
///
/// [`with_cancel`]: Context::with_cancel
/// [`with_timeout`]: Context::with_timeout
/// [`with_deadline`]: Context::with_deadline
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child context that can be cancelled on its own.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derives a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child context that expires at `deadline`, or at the parent's
    /// deadline if that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error describing why this context is done, or `None` while it is live.
    pub fn err(&self) -> Option<StorageError> {
        if self.token.is_cancelled() {
            return Some(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StorageError::Timeout(
                "context deadline exceeded".to_string(),
            )),
            _ => None,
        }
    }

    /// Fails fast if the context is already cancelled or expired.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs `fut` unless the context ends first.
    ///
    /// When the context is cancelled or its deadline passes, `fut` is dropped
    /// and the context's error is returned.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StorageError::Cancelled),
            _ = expired => Err(StorageError::Timeout("context deadline exceeded".to_string())),
            result = fut => result,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let ctx = Context::background().with_cancel();
        ctx.cancel();

        assert!(matches!(ctx.check(), Err(StorageError::Cancelled)));
        let err = ctx.run(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[tokio::test]
    async fn cancelling_child_keeps_parent_alive() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();

        assert!(parent.check().is_ok());
        assert!(child.check().is_err());
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();

        assert!(matches!(child.check(), Err(StorageError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Timeout(_)));
        assert!(matches!(ctx.check(), Err(StorageError::Timeout(_))));
    }

    #[tokio::test]
    async fn child_deadline_never_outlives_parent() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
    }
}
