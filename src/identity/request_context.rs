use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::upstream::UpstreamError;

/// Per-request scope carried through every operation that may touch the network.
///
/// Cancelling the token or passing the deadline aborts the in-flight upstream
/// call; the caller sees it as a transport-level `UpstreamError`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self { request_id: uuid::Uuid::new_v4().to_string(), deadline: None, cancel: CancellationToken::new() }
    }
}

impl RequestContext {
    pub fn new() -> Self { Self::default() }

    pub fn with_request_id<S: Into<String>>(mut self, id: S) -> Self {
        self.request_id = id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Run an upstream call under this context's cancellation and deadline.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(UpstreamError::Cancelled),
                res = tokio::time::timeout_at(deadline, fut) => res.unwrap_or(Err(UpstreamError::DeadlineExceeded)),
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(UpstreamError::Cancelled),
                res = fut => res,
            },
        }
    }

    /// Wait for a future that cannot fail on its own, such as a lock acquisition,
    /// under this context's cancellation and deadline.
    pub async fn wait<T, F>(&self, fut: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = T>,
    {
        self.run(async { Ok::<T, UpstreamError>(fut.await) }).await
    }
}
