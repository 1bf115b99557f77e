//! Step adapter.
//!
//! Every user function (setUp, tearDown, test bodies, suite hooks) is
//! normalised into a [`Step`]: an async function of a [`StepContext`] that
//! resolves to a [`StepResult`]. Three calling styles are accepted:
//!
//! - synchronous closures returning `StepResult` ([`Step::from_fn`])
//! - closures returning a future ([`Step::from_async`])
//! - callback style closures that receive a [`Done`] ([`Step::from_callback`])
//!
//! Panics raised while calling or polling the function are caught and turned
//! into [`TestError::Panicked`]; they never unwind past [`Step::call`].

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::boundary::ErrorBoundary;
use crate::error::{StepResult, TestError};

type StepFn<C> = dyn Fn(StepContext<C>) -> BoxFuture<'static, StepResult> + Send + Sync;

/// A normalised lifecycle step. An empty step completes immediately.
pub struct Step<C> {
    inner: Option<Arc<StepFn<C>>>,
}

/// Everything a step sees while it runs: the shared case context and the
/// error boundary of the task it belongs to.
pub struct StepContext<C> {
    context: Arc<C>,
    boundary: ErrorBoundary,
}

/// Completion callback for callback-style steps.
///
/// Consumed on first use, so a step can complete at most once. Dropping it
/// without calling completes the step with an error.
#[derive(Debug)]
pub struct Done {
    tx: oneshot::Sender<StepResult>,
}

impl<C: Send + Sync + 'static> Step<C> {
    /// A step that does nothing.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Adapt a synchronous function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&StepContext<C>) -> StepResult + Send + Sync + 'static,
    {
        Self::wrap(move |cx| {
            let result = f(&cx);
            futures::future::ready(result).boxed()
        })
    }

    /// Adapt a function returning a future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(StepContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self::wrap(move |cx| f(cx).boxed())
    }

    /// Adapt a callback-style function that signals completion through [`Done`].
    pub fn from_callback<F>(f: F) -> Self
    where
        F: Fn(StepContext<C>, Done) + Send + Sync + 'static,
    {
        Self::wrap(move |cx| {
            let (tx, rx) = oneshot::channel();
            f(cx, Done { tx });
            async move {
                rx.await.unwrap_or_else(|_| {
                    Err(TestError::msg("completion callback dropped without being called"))
                })
            }
            .boxed()
        })
    }

    fn wrap<F>(f: F) -> Self
    where
        F: Fn(StepContext<C>) -> BoxFuture<'static, StepResult> + Send + Sync + 'static,
    {
        Self {
            inner: Some(Arc::new(f)),
        }
    }

    /// Whether this step has a function behind it.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Invoke the step. Errors and panics are folded into the result.
    pub fn call(&self, cx: StepContext<C>) -> BoxFuture<'static, StepResult> {
        let Some(f) = self.inner.as_ref().map(Arc::clone) else {
            return futures::future::ready(Ok(())).boxed();
        };
        async move {
            let fut = match catch_unwind(AssertUnwindSafe(|| f(cx))) {
                Ok(fut) => fut,
                Err(panic) => return Err(TestError::from_panic(&*panic)),
            };
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(TestError::from_panic(&*panic)),
            }
        }
        .boxed()
    }
}

impl<C: Send + Sync + 'static> Default for Step<C> {
    fn default() -> Self {
        Self::noop()
    }
}

impl<C> Clone for Step<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.inner.is_some() { "Step(fn)" } else { "Step(noop)" })
    }
}

impl<C> StepContext<C> {
    pub fn new(context: Arc<C>, boundary: ErrorBoundary) -> Self {
        Self { context, boundary }
    }

    /// Error boundary of the running task.
    pub fn boundary(&self) -> &ErrorBoundary {
        &self.boundary
    }
}

impl<C> Clone for StepContext<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            boundary: self.boundary.clone(),
        }
    }
}

impl<C> Deref for StepContext<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.context
    }
}

impl Done {
    /// Complete the step with `result`.
    pub fn call(self, result: StepResult) {
        // Receiver is gone when the sequence already timed out.
        let _ = self.tx.send(result);
    }

    /// Complete the step successfully.
    pub fn ok(self) {
        self.call(Ok(()));
    }

    /// Complete the step with an error.
    pub fn fail(self, err: impl Into<TestError>) {
        self.call(Err(err.into()));
    }
}
