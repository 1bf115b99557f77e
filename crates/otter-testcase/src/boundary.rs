//! Per-task error boundary.
//!
//! Failures that happen outside a step's own future (a detached tokio task,
//! a callback fired after the step returned) cannot travel back through the
//! step result. Steps get an [`ErrorBoundary`] handle instead and report such
//! failures through it. The receiving half is a [`Listener`] owned by the
//! completion guard of the task that is currently executing.
//!
//! Registration is scoped: dropping the `Listener` unregisters it, after which
//! every `raise` on the boundary is dropped. A late failure from a task that
//! already settled therefore never reaches the next task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{StepResult, TestError};

/// Sending half handed to steps through their [`StepContext`](crate::step::StepContext).
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    task: Arc<str>,
    tx: mpsc::UnboundedSender<TestError>,
}

/// Receiving half; owning it means the boundary is registered.
#[derive(Debug)]
pub struct Listener {
    task: Arc<str>,
    rx: mpsc::UnboundedReceiver<TestError>,
}

impl ErrorBoundary {
    /// Register a fresh boundary for `task`.
    pub fn register(task: impl Into<Arc<str>>) -> (ErrorBoundary, Listener) {
        let task = task.into();
        let (tx, rx) = mpsc::unbounded_channel();
        trace!(task = %task, "error boundary registered");
        (
            ErrorBoundary {
                task: Arc::clone(&task),
                tx,
            },
            Listener { task, rx },
        )
    }

    /// A boundary nobody listens on.
    #[cfg(test)]
    pub(crate) fn detached(label: impl Into<Arc<str>>) -> ErrorBoundary {
        let (boundary, listener) = Self::register(label);
        drop(listener);
        boundary
    }

    /// Name of the task this boundary belongs to.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Report a failure that happened outside the step's call chain.
    ///
    /// Returns `false` when the boundary is no longer registered and the
    /// failure was dropped.
    pub fn raise(&self, err: impl Into<TestError>) -> bool {
        let err = err.into();
        match self.tx.send(err) {
            Ok(()) => true,
            Err(mpsc::error::SendError(err)) => {
                debug!(task = %self.task, error = %err, "dropping failure raised after boundary was released");
                false
            }
        }
    }

    /// Whether a listener is still attached.
    pub fn is_registered(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Spawn detached work whose error or panic is routed to this boundary.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = StepResult> + Send + 'static,
    {
        let boundary = self.clone();
        tokio::spawn(async move {
            let err = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(panic) => TestError::from_panic(&*panic),
            };
            boundary.raise(err);
        })
    }
}

impl Listener {
    /// Wait for the next uncaught failure. `None` once every boundary handle
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<TestError> {
        self.rx.recv().await
    }

    /// Take a failure that has already been raised, without waiting.
    pub fn try_recv(&mut self) -> Option<TestError> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.rx.close();
        trace!(task = %self.task, "error boundary unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_reaches_listener() {
        let (boundary, mut listener) = ErrorBoundary::register("testA");
        assert!(boundary.is_registered());
        assert!(boundary.raise("late failure"));
        let err = listener.recv().await.expect("failure delivered");
        assert_eq!(err.to_string(), "late failure");
    }

    #[tokio::test]
    async fn test_raise_after_unregister_is_dropped() {
        let (boundary, listener) = ErrorBoundary::register("testA");
        drop(listener);
        assert!(!boundary.is_registered());
        assert!(!boundary.raise("too late"));
    }

    #[tokio::test]
    async fn test_detached_boundary_drops_everything() {
        let boundary = ErrorBoundary::detached("setUpSuite");
        assert_eq!(boundary.task(), "setUpSuite");
        assert!(!boundary.raise("ignored"));
    }

    #[tokio::test]
    async fn test_spawn_routes_error_and_panic() {
        let (boundary, mut listener) = ErrorBoundary::register("testA");

        boundary
            .spawn(async { Err(TestError::msg("detached error")) })
            .await
            .unwrap();
        assert_eq!(
            listener.recv().await.unwrap().to_string(),
            "detached error"
        );

        fn explode() -> StepResult {
            panic!("detached panic")
        }
        boundary.spawn(async { explode() }).await.unwrap();
        assert_eq!(
            listener.recv().await.unwrap().to_string(),
            "panicked: detached panic"
        );
    }

    #[tokio::test]
    async fn test_spawn_success_raises_nothing() {
        let (boundary, mut listener) = ErrorBoundary::register("testA");
        boundary.spawn(async { Ok::<_, TestError>(()) }).await.unwrap();
        drop(boundary);
        assert!(listener.recv().await.is_none());
    }
}
