//! Cancellable, deadline-bounded execution context passed to node operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{NodeError, NodeResult};

/// Deadline plus cancellation handle for one unit of work.
///
/// Cloning shares the cancellation token; child contexts are cancelled
/// when their parent is, but not the other way round.
#[derive(Debug, Clone)]
pub struct ExecContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::background()
    }
}

impl ExecContext {
    /// A context with no deadline.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A fresh context expiring after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// A child context whose deadline is the earlier of the parent's and `timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the deadline passes or the context
    /// is cancelled first.
    ///
    /// The future is dropped on expiry, so anything it owns (child
    /// processes spawned with `kill_on_drop`, streams) is released.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> NodeResult<T>
    where
        F: Future<Output = NodeResult<T>>,
    {
        if self.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let started = Instant::now();
        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = sleep => Err(NodeError::Timeout {
                operation: operation.to_string(),
                after: started.elapsed(),
            }),
            _ = self.cancel.cancelled() => Err(NodeError::Cancelled),
        }
    }
}
