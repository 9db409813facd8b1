//! The call contract shared by every resilience layer.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::error::InvokeError;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// The call went through to the remote operation
    Remote,

    /// A fresh stored response was returned; the remote was not reached
    Cache,
}

/// Outcome of a call together with its [`ResponseSource`].
///
/// Failures are always `Remote`: nothing stores errors.
#[derive(Debug)]
pub struct Invocation<Resp> {
    pub result: Result<Resp, InvokeError>,
    pub source: ResponseSource,
}

impl<Resp> Invocation<Resp> {
    /// An outcome produced by reaching the remote operation.
    pub fn remote(result: Result<Resp, InvokeError>) -> Self {
        Self {
            result,
            source: ResponseSource::Remote,
        }
    }

    /// A response served from the cache.
    pub fn cached(response: Resp) -> Self {
        Self {
            result: Ok(response),
            source: ResponseSource::Cache,
        }
    }

    /// Whether the remote operation was skipped.
    pub fn from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// Invoke a remote operation: a response, or a single terminal error.
///
/// Every layer implements this trait and wraps exactly one inner
/// implementer of it, so layers compose by delegation. A layer must never
/// reach past its inner implementer.
#[async_trait]
pub trait Invoker<Req, Resp>: Send + Sync
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    /// Perform the call.
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError>;

    /// Perform the call and report where the outcome came from.
    ///
    /// Layers that serve responses without reaching the remote override
    /// this; layers that keep bookkeeping call it so they can skip those
    /// outcomes. Wrapping layers must forward it.
    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        Invocation::remote(self.invoke(request).await)
    }

    /// Name used in log fields.
    fn name(&self) -> &str {
        "invoker"
    }
}

#[async_trait]
impl<Req, Resp, T> Invoker<Req, Resp> for Arc<T>
where
    T: Invoker<Req, Resp> + ?Sized,
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        (**self).invoke(request).await
    }

    async fn invoke_with_source(&self, request: &Req) -> Invocation<Resp> {
        (**self).invoke_with_source(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapts an async closure into an [`Invoker`].
///
/// The closure receives an owned clone of the request.
pub struct FnInvoker<F> {
    name: String,
    f: F,
}

impl<F> FnInvoker<F> {
    /// Wrap a closure under the given name.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> std::fmt::Debug for FnInvoker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<Req, Resp, F, Fut> Invoker<Req, Resp> for FnInvoker<F>
where
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, InvokeError>> + Send,
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    async fn invoke(&self, request: &Req) -> Result<Resp, InvokeError> {
        (self.f)(request.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifiedError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_invoker_delegates() {
        let invoker = FnInvoker::new("echo", |req: String| async move {
            Ok::<_, InvokeError>(req.to_uppercase())
        });

        assert_eq!(invoker.name(), "echo");
        assert_eq!(invoker.invoke(&"hi".to_string()).await.unwrap(), "HI");

        let invocation = invoker.invoke_with_source(&"hi".to_string()).await;
        assert_eq!(invocation.source, ResponseSource::Remote);
        assert!(!invocation.from_cache());
    }

    #[tokio::test]
    async fn test_arc_dyn_invoker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let invoker: Arc<dyn Invoker<String, String>> = Arc::new(FnInvoker::new(
            "failing",
            move |_req: String| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(InvokeError::from(ClassifiedError::unavailable("down")))
                }
            },
        ));

        let result = invoker.invoke(&"q".to_string()).await;
        assert!(matches!(result, Err(InvokeError::Remote(_))));
        assert_eq!(invoker.name(), "failing");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
