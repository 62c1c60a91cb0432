//! Reconnect Retry Bookkeeping
//!
//! This module provides the pieces the session manager uses to recover from a
//! failed connect:
//!
//! - [`RetryPolicy`]: how many automatic retries follow an initial failure and
//!   how long to wait before each one (fixed delay, no backoff growth)
//! - [`PendingRetry`]: the counter for one reconnect sequence
//! - [`ScheduledTask`]: a cancellable delayed task, so that cancelling a
//!   scheduled reconnect is an explicit, observable operation
//!
//! # Example
//!
//! ```ignore
//! use nexus_session::session::retry::{RetryPolicy, ScheduledTask};
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(1000));
//! let mut pending = policy.begin();
//! if pending.try_advance() {
//!     let task = ScheduledTask::schedule(pending.delay, async move { reconnect().await });
//!     // later, on disconnect
//!     task.cancel();
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;

/// Retry policy for connection establishment
///
/// # Fields
///
/// * `max_attempts` - Automatic retries after the initial attempt (default: 3)
/// * `delay` - Wait before every retry (default: 1000ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of automatic retries (not counting the initial attempt)
    pub max_attempts: u32,

    /// Fixed delay before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Start a fresh reconnect sequence with zero attempts used
    pub fn begin(&self) -> PendingRetry {
        PendingRetry {
            attempt_count: 0,
            max_attempts: self.max_attempts,
            delay: self.delay,
        }
    }
}

impl From<&SessionConfig> for RetryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }
}

/// State of one in-progress reconnect sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRetry {
    /// Retries already scheduled in this sequence
    pub attempt_count: u32,

    pub max_attempts: u32,

    pub delay: Duration,
}

impl PendingRetry {
    /// Whether another retry may be scheduled
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Consume one retry, returning `false` once the budget is exhausted
    pub fn try_advance(&mut self) -> bool {
        if !self.can_retry() {
            return false;
        }
        self.attempt_count += 1;
        true
    }

    /// Retries left in this sequence
    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// A delayed task that can be cancelled before it starts
///
/// Cancellation only prevents the task from *starting*; once the delay has
/// elapsed the task runs to completion. Dropping the handle does not cancel.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `task` on the current Tokio runtime after `delay`
    pub fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {
                    tracing::debug!("Scheduled task cancelled before start");
                }
                _ = tokio::time::sleep(delay) => {
                    task.await;
                }
            }
        });

        Self { token, handle }
    }

    /// Spawn a long-lived watcher immediately
    ///
    /// `task` receives the cancellation token and should race it against its
    /// own waits.
    pub fn spawn_watcher<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        Self { token, handle }
    }

    /// Prevent the task from starting (no-op if it already started or finished)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the task has neither finished nor been cancelled
    pub fn is_pending(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}
