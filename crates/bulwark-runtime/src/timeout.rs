//! Per-attempt deadline on the base operation.
//!
//! Expiry yields `InvokeError::TimedOut`, which the retry layer treats as
//! an unclassified, retryable failure.

use async_trait::async_trait;
use std::time::Duration;

use bulwark_core::{Invocation, InvokeError, Invoker};

/// Layer enforcing a deadline on each call to its inner implementer.
pub struct TimeoutLayer<I> {
    inner: I,
    timeout: Duration,
}

impl<I> TimeoutLayer<I> {
    pub fn new(inner: I, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<Req, Resp, I> Invoker<Req, Resp> for TimeoutLayer<I>
where
    I: Invoker<Req, Resp>,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.invoke_with_source(request).await.result
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        match tokio::time::timeout(self.timeout, self.inner.invoke_with_source(request)).await {
            Ok(invocation) => invocation,
            Err(_) => {
                tracing::warn!(
                    invoker = self.inner.name(),
                    timeout = ?self.timeout,
                    "Remote call timed out"
                );
                Invocation::remote(Err(InvokeError::TimedOut(self.timeout)))
            }
        }
    }

    fn name(&self) -> &str {
        "timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::FnInvoker;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let slow = FnInvoker::new("slow", |_req: String| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, InvokeError>("late".to_string())
        });
        let layer = TimeoutLayer::new(slow, Duration::from_secs(1));

        let err = layer.invoke(&"q".to_string()).await.unwrap_err();
        assert_eq!(err, InvokeError::TimedOut(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let fast = FnInvoker::new("fast", |req: String| async move { Ok::<_, InvokeError>(req) });
        let layer = TimeoutLayer::new(fast, Duration::from_secs(1));
        assert_eq!(layer.invoke(&"q".to_string()).await.unwrap(), "q");
    }
}
