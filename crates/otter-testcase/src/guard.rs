//! Lifecycle execution and dual-channel completion.
//!
//! ```text
//!            register boundary                 spawn
//!   execute ─────────────────► Listener ──────────────► watch_uncaught ─┐
//!      │                                                                 │ claim
//!      │   spawn  [setUp, body, tearDown*]                               ▼
//!      └────────► complete_from_sequence ──────── claim ──────► CompletionToken
//!                                                                        │ deliver
//!   execute ◄──────────────────────── outcome ◄──────────────────────────┘
//!
//!   * tearDown runs at most once: either inside the sequence or alone,
//!     from whichever path settles the token, before the outcome is delivered.
//! ```
//!
//! Both paths run as detached tokio tasks. The losing path keeps running
//! until it finishes or hits its budget, and its late completion is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::boundary::{ErrorBoundary, Listener};
use crate::completion::{Channel, CompletionToken};
use crate::error::TestError;
use crate::sequence::StepList;
use crate::step::{Step, StepContext};
use crate::task::{Task, TaskResult};

/// tearDown wrapper that can be claimed exactly once across both paths.
struct TearDownOnce<C> {
    step: Step<C>,
    called: Arc<AtomicBool>,
}

impl<C: Send + Sync + 'static> TearDownOnce<C> {
    fn new(step: Step<C>) -> Self {
        Self {
            step,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A step that runs tearDown unless someone already did.
    fn as_step(&self) -> Step<C> {
        let step = self.step.clone();
        let called = Arc::clone(&self.called);
        Step::from_async(move |cx| {
            if called.swap(true, Ordering::AcqRel) {
                futures::future::ready(Ok(())).boxed()
            } else {
                step.call(cx)
            }
        })
    }

    /// Run tearDown alone if it has not run yet, ignoring its errors.
    async fn run_alone(&self, cx: StepContext<C>, timeout: Option<Duration>) {
        let report = StepList::new(vec![self.as_step()], cx.clone())
            .timeout(timeout)
            .to_array(false)
            .await;
        if let Some(Some(err)) = report.errors.first() {
            debug!(task = cx.boundary().task(), error = %err, "tearDown failed after test failure");
        }
    }
}

impl<C> Clone for TearDownOnce<C> {
    fn clone(&self) -> Self {
        Self {
            step: self.step.clone(),
            called: Arc::clone(&self.called),
        }
    }
}

/// Run one task's lifecycle and wait for its single outcome.
pub(crate) async fn execute<C: Send + Sync + 'static>(task: &Task<C>) -> TaskResult {
    let started = Instant::now();
    let name: Arc<str> = Arc::from(task.name.as_str());
    debug!(task = %name, timeout = ?task.timeout, "running test");

    let (boundary, listener) = ErrorBoundary::register(Arc::clone(&name));
    let (token, outcome) = CompletionToken::new(Arc::clone(&name));
    let tear_down = TearDownOnce::new(task.tear_down.clone());
    let cx = StepContext::new(Arc::clone(&task.context), boundary);

    let watcher = tokio::spawn(watch_uncaught(
        listener,
        Arc::clone(&token),
        tear_down.clone(),
        cx.clone(),
        task.timeout,
    ));

    let steps = vec![task.set_up.clone(), task.body.clone(), tear_down.as_step()];
    let sequence = StepList::new(steps, cx.clone())
        .delay(Duration::ZERO)
        .timeout(task.timeout);
    tokio::spawn(complete_from_sequence(
        sequence,
        token,
        watcher.abort_handle(),
        tear_down,
        cx,
        task.timeout,
    ));

    let err = outcome.await.unwrap_or(Some(TestError::Dropped));
    let duration = started.elapsed();
    debug!(task = %name, passed = err.is_none(), ?duration, "test settled");
    TaskResult { err, duration }
}

async fn complete_from_sequence<C: Send + Sync + 'static>(
    sequence: StepList<C>,
    token: Arc<CompletionToken>,
    watcher: AbortHandle,
    tear_down: TearDownOnce<C>,
    cx: StepContext<C>,
    timeout: Option<Duration>,
) {
    let report = sequence.to_array(false).await;
    let Some(settler) = token.claim(Channel::Sequence) else {
        trace!(task = token.task(), "sequence finished after task settled, ignoring");
        return;
    };
    // Unregisters the boundary: the watcher owns the listener.
    watcher.abort();

    let mut errors = report.errors.into_iter();
    let set_up_err = errors.next().flatten();
    let body_err = errors.next().flatten();
    // The body slot is authoritative. When setUp failed the body never ran and
    // its slot is empty, so the setUp error is surfaced instead of a pass.
    let err = body_err.or(set_up_err);

    // No-op when tearDown already ran inside the sequence.
    tear_down.run_alone(cx, timeout).await;
    trace!(task = token.task(), passed = err.is_none(), "settled by sequence");
    settler.deliver(err);
}

async fn watch_uncaught<C: Send + Sync + 'static>(
    mut listener: Listener,
    token: Arc<CompletionToken>,
    tear_down: TearDownOnce<C>,
    cx: StepContext<C>,
    timeout: Option<Duration>,
) {
    let Some(err) = listener.recv().await else {
        return;
    };
    let Some(settler) = token.claim(Channel::Uncaught) else {
        trace!(task = token.task(), error = %err, "uncaught failure after task settled, dropping");
        return;
    };
    drop(listener);

    debug!(task = token.task(), error = %err, "uncaught failure");
    tear_down.run_alone(cx, timeout).await;
    settler.deliver(Some(err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Step<AtomicUsize>, StepContext<AtomicUsize>) {
        let step = Step::from_fn(|cx: &StepContext<AtomicUsize>| {
            cx.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let cx = StepContext::new(Arc::new(AtomicUsize::new(0)), ErrorBoundary::detached("guard"));
        (step, cx)
    }

    fn task(body: Step<AtomicUsize>, tear_down: Step<AtomicUsize>) -> Task<AtomicUsize> {
        Task {
            name: "testGuard".to_string(),
            set_up: Step::noop(),
            tear_down,
            body,
            context: Arc::new(AtomicUsize::new(0)),
            timeout: Some(Duration::from_millis(200)),
            set_up_suite: None,
            tear_down_suite: None,
            result: None,
        }
    }

    #[tokio::test]
    async fn test_tear_down_once_runs_single_time() {
        let (step, cx) = counting();
        let once = TearDownOnce::new(step);

        once.as_step().call(cx.clone()).await.unwrap();
        once.clone().as_step().call(cx.clone()).await.unwrap();
        once.run_alone(cx.clone(), None).await;
        assert_eq!(cx.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_alone_ignores_tear_down_error() {
        let once = TearDownOnce::new(Step::from_fn(|_: &StepContext<()>| Err("cleanup".into())));
        let cx = StepContext::new(Arc::new(()), ErrorBoundary::detached("guard"));
        once.run_alone(cx, Some(Duration::from_millis(50))).await;
        assert!(once.called.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_body_error_is_authoritative() {
        let body = Step::from_fn(|_: &StepContext<AtomicUsize>| Err("body failed".into()));
        let tear_down = Step::from_fn(|cx: &StepContext<AtomicUsize>| {
            cx.fetch_add(1, Ordering::SeqCst);
            Err("tearDown failed".into())
        });
        let task = task(body, tear_down);
        let result = execute(&task).await;

        assert_eq!(result.err.unwrap().to_string(), "body failed");
        assert_eq!(task.context.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncaught_wins_over_hanging_body() {
        let body = Step::from_async(|cx: StepContext<AtomicUsize>| async move {
            cx.boundary().raise("raised from a callback");
            futures::future::pending::<()>().await;
            Ok::<_, TestError>(())
        });
        let tear_down = Step::from_fn(|cx: &StepContext<AtomicUsize>| {
            cx.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let task = task(body, tear_down);

        let started = Instant::now();
        let result = execute(&task).await;
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(result.err.unwrap().to_string(), "raised from a callback");
        assert_eq!(task.context.load(Ordering::SeqCst), 1);

        // The abandoned sequence times out later without running tearDown again.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(task.context.load(Ordering::SeqCst), 1);
    }
}
