//! Bounded-concurrency batch invocation.
//!
//! Requests are split into groups of `concurrency`; each group runs
//! concurrently and is awaited in full before the next one starts. A
//! failure in one call never cancels its siblings.

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use bulwark_core::{InvokeError, Invoker};

/// Default number of calls in flight per group.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Batch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Calls in flight per group
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Per-request outcomes of a batch, in input order.
#[derive(Debug)]
pub struct BatchOutcome<Resp> {
    pub results: Vec<Result<Resp, InvokeError>>,
}

impl<Resp> BatchOutcome<Resp> {
    /// Number of requests that produced a response.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of requests that failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Consume into the raw results.
    pub fn into_results(self) -> Vec<Result<Resp, InvokeError>> {
        self.results
    }
}

/// Invoke every request, at most `concurrency` at a time.
///
/// A concurrency of zero is treated as one.
pub async fn invoke_batch<Req, Resp, I>(
    invoker: &I,
    requests: &[Req],
    concurrency: usize,
) -> BatchOutcome<Resp>
where
    I: Invoker<Req, Resp> + ?Sized,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    let group_size = concurrency.max(1);
    let mut results = Vec::with_capacity(requests.len());

    for (group, chunk) in requests.chunks(group_size).enumerate() {
        tracing::debug!(group, size = chunk.len(), "Dispatching batch group");
        let outcomes = join_all(chunk.iter().map(|request| invoker.invoke(request))).await;
        results.extend(outcomes);
    }

    let outcome = BatchOutcome { results };
    tracing::debug!(
        succeeded = outcome.succeeded(),
        failed = outcome.failed(),
        "Batch complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::{ClassifiedError, FnInvoker};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_groups_bound_in_flight_calls() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max_seen) = (in_flight.clone(), peak.clone());

        let invoker = FnInvoker::new("slow", move |n: u32| {
            let current = current.clone();
            let max_seen = max_seen.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, InvokeError>(n * 2)
            }
        });

        let requests: Vec<u32> = (0..12).collect();
        let outcome = invoke_batch(&invoker, &requests, 5).await;

        assert_eq!(outcome.succeeded(), 12);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
        let values: Vec<u32> = outcome.into_results().into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..12).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let invoker = FnInvoker::new("picky", |n: u32| async move {
            if n % 3 == 0 {
                Err(ClassifiedError::new(bulwark_core::ErrorClass::NotFound, "missing").into())
            } else {
                Ok::<_, InvokeError>(n)
            }
        });

        let requests: Vec<u32> = (1..=7).collect();
        let outcome = invoke_batch(&invoker, &requests, 0).await;

        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.succeeded(), 5);
        assert!(outcome.results[2].is_err());
        assert_eq!(outcome.results[3].as_ref().ok(), Some(&4));
    }
}
