//! Cancellation and deadline scope for a single exporter call.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason an [`ExportContext`] stopped admitting work.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ContextDone {
    /// The cancellation token was triggered.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Carries the caller's cancellation token and deadline into every storage call
/// made on its behalf.
///
/// The default context never expires and needs no async runtime. A context with
/// a deadline must be used from within a Tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct ExportContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl ExportContext {
    /// A context without deadline or cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the call to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the call to an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Abort the call once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is finished, or `None` while it still admits work.
    pub fn done(&self) -> Option<ContextDone> {
        if self
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Some(ContextDone::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextDone::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub(crate) async fn run<F>(&self, fut: F) -> Result<F::Output, ContextDone>
    where
        F: Future,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| ContextDone::DeadlineExceeded),
                None => Ok(fut.await),
            }
        };

        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ContextDone::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }
}
