//! Retry with bounded exponential backoff and jitter.
//!
//! # Algorithm
//! ```text
//! attempt 0..=max_retries:
//!     Ok                          -> return
//!     Err, not retryable          -> return error as-is
//!     Err, retryable, last try    -> RetriesExhausted { last: error }
//!     Err, retryable              -> sleep(delay), next attempt
//!
//! delay = retry_after hint, verbatim, if the callee sent one
//!       | min(initial * multiplier^attempt, max) + U[0, 0.3 * that]
//! ```
//!
//! Failures without a remote classification (connection resets, timeouts)
//! are retryable unless `retry_unclassified` is turned off.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use bulwark_core::{ErrorClass, Invocation, InvokeError, Invoker, ResponseSource};

use crate::config::duration_human;

/// Upper bound of the jitter as a fraction of the base delay, in tenths.
const JITTER_TENTHS: u64 = 3;

/// Retry policy. Every field can be overridden per call via [`retry_with`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base delay before the first retry
    #[serde(with = "duration_human")]
    pub initial_delay: Duration,

    /// Cap on the computed backoff (not on callee retry hints)
    #[serde(with = "duration_human")]
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub backoff_multiplier: f64,

    /// Remote classes worth retrying
    pub retryable: BTreeSet<ErrorClass>,

    /// Retry failures that carry no remote classification
    pub retry_unclassified: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            retryable: [
                ErrorClass::RateLimited,
                ErrorClass::InternalFault,
                ErrorClass::BadGateway,
                ErrorClass::Unavailable,
                ErrorClass::GatewayTimeout,
            ]
            .into_iter()
            .collect(),
            retry_unclassified: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Override the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the base and cap delays.
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Whether an error should consume another attempt.
    pub fn is_retryable(&self, error: &InvokeError) -> bool {
        match error {
            InvokeError::Remote(err) => self.retryable.contains(&err.class),
            InvokeError::Unclassified(_) | InvokeError::TimedOut(_) => self.retry_unclassified,
            InvokeError::CircuitOpen { .. } | InvokeError::RetriesExhausted { .. } => false,
        }
    }

    /// Backoff before jitter for a zero-based attempt index.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = initial_ms * self.backoff_multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms.round() as u64)
        }
    }

    /// Add uniform jitter in `[0, 0.3 * base]`.
    pub fn jittered(base: Duration) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter_range = base_ms.saturating_mul(JITTER_TENTHS) / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..=jitter_range)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    /// Delay before the retry that follows `attempt` failing with `error`.
    ///
    /// A callee retry hint is used verbatim and bypasses backoff, cap and
    /// jitter.
    pub fn delay_for(&self, attempt: u32, error: &InvokeError) -> Duration {
        match error.retry_after() {
            Some(hint) => hint,
            None => Self::jittered(self.base_delay(attempt)),
        }
    }
}

/// Run `op` under `policy`.
///
/// `op` receives the zero-based attempt index. On terminal failure the
/// last observed error is returned, wrapped in `RetriesExhausted` when the
/// attempts ran out.
pub async fn retry_with<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, InvokeError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InvokeError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let error = match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !policy.is_retryable(&error) {
            tracing::debug!(attempt, error = %error, "error is not retryable");
            return Err(error);
        }

        if attempt >= policy.max_retries {
            tracing::warn!(
                attempts = attempt + 1,
                error = %error,
                "retries exhausted"
            );
            return Err(InvokeError::RetriesExhausted {
                attempts: attempt + 1,
                last: Box::new(error),
            });
        }

        let delay = policy.delay_for(attempt, &error);
        tracing::warn!(
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying after transient failure"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Layer retrying its inner implementer under a fixed policy.
pub struct RetryLayer<I> {
    inner: I,
    policy: RetryPolicy,
}

impl<I> RetryLayer<I> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: I, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The policy applied to every call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke with a one-off policy instead of the configured one.
    pub async fn invoke_with_policy<Req, Resp>(
        &self,
        request: &Req,
        policy: &RetryPolicy,
    ) -> Result<Resp, InvokeError>
    where
        I: Invoker<Req, Resp>,
        Req: Send + Sync + 'static,
        Resp: Send + 'static,
    {
        self.run(request, policy).await.result
    }

    // The source reported is that of the final attempt.
    async fn run<Req, Resp>(&self, request: &Req, policy: &RetryPolicy) -> Invocation<Resp>
    where
        I: Invoker<Req, Resp>,
        Req: Send + Sync + 'static,
        Resp: Send + 'static,
    {
        let outcome = retry_with(policy, |_| async move {
            let invocation = self.inner.invoke_with_source(request).await;
            let source = invocation.source;
            invocation.result.map(|response| (response, source))
        })
        .await;

        match outcome {
            Ok((response, ResponseSource::Cache)) => Invocation::cached(response),
            Ok((response, ResponseSource::Remote)) => Invocation::remote(Ok(response)),
            Err(error) => Invocation::remote(Err(error)),
        }
    }
}

#[async_trait]
impl<Req, Resp, I> Invoker<Req, Resp> for RetryLayer<I>
where
    I: Invoker<Req, Resp>,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        self.run(request, &self.policy).await.result
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        self.run(request, &self.policy).await
    }

    fn name(&self) -> &str {
        "retry"
    }
}
