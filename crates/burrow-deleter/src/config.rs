use std::fmt::{Display, Formatter};
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Capacity of the intent queue between producers and the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// Interval between flush ticks.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on a single flush, storage calls included.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum number of short codes held in the pending buffer.
pub const DEFAULT_MAX_PENDING: usize = 100_000;

/// What a flush does with a user's intents when their record list cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchFailurePolicy {
    /// Discard the user's intents. Other users are still processed.
    Drop,
    /// Keep the user's intents for the next tick.
    #[default]
    Retry,
}

impl Display for FetchFailurePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailurePolicy::Drop => write!(f, "drop"),
            FetchFailurePolicy::Retry => write!(f, "retry"),
        }
    }
}

/// Configuration for a [`DeletionPipeline`](crate::DeletionPipeline).
#[derive(Debug, Clone, TypedBuilder)]
pub struct DeletionConfig {
    /// Number of intents that can wait in the queue before `submit` blocks.
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// Fixed interval between flushes, independent of queue activity.
    #[builder(default = DEFAULT_FLUSH_INTERVAL)]
    pub flush_interval: Duration,
    /// Deadline applied to each flush.
    #[builder(default = DEFAULT_FLUSH_TIMEOUT)]
    pub flush_timeout: Duration,
    /// Cap on buffered short codes; `None` lets the buffer grow without bound.
    ///
    /// Once exceeded the oldest intents are dropped and an error is logged.
    #[builder(default = Some(DEFAULT_MAX_PENDING))]
    pub max_pending: Option<usize>,
    /// Handling of users whose record list could not be fetched.
    #[builder(default)]
    pub fetch_failure_policy: FetchFailurePolicy,
    /// Whether stopping performs one final flush of already queued intents.
    #[builder(default = true)]
    pub drain_on_stop: bool,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
