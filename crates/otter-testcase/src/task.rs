//! A single test method and its recorded outcome

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::TestError;
use crate::guard;
use crate::step::Step;

/// Default per-test budget when a case does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// One unit of work: a declared test method plus the hooks it runs with.
pub struct Task<C> {
    pub(crate) name: String,
    pub(crate) set_up: Step<C>,
    pub(crate) tear_down: Step<C>,
    pub(crate) body: Step<C>,
    pub(crate) context: Arc<C>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) set_up_suite: Option<Step<C>>,
    pub(crate) tear_down_suite: Option<Step<C>>,
    pub(crate) result: Option<TaskResult>,
}

/// What happened when a task ran.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Error that failed the test, `None` when it passed
    pub err: Option<TestError>,
    /// Wall time from start of the lifecycle until the outcome was delivered
    pub duration: Duration,
}

impl TaskResult {
    pub fn passed(&self) -> bool {
        self.err.is_none()
    }
}

impl<C: Send + Sync + 'static> Task<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time budget for the setUp/body/tearDown sequence; `None` means unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Context the steps run against.
    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn has_set_up_suite(&self) -> bool {
        self.set_up_suite.is_some()
    }

    pub fn has_tear_down_suite(&self) -> bool {
        self.tear_down_suite.is_some()
    }

    /// Outcome, once the task has run.
    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// `Some(passed)` once the task has run.
    pub fn passed(&self) -> Option<bool> {
        self.result.as_ref().map(TaskResult::passed)
    }

    pub fn err(&self) -> Option<&TestError> {
        self.result.as_ref().and_then(|r| r.err.as_ref())
    }

    /// Run the lifecycle and record the outcome. A task runs at most once;
    /// later calls keep the first outcome.
    pub async fn execute(&mut self) -> &TaskResult {
        let result = match self.result.take() {
            Some(existing) => {
                warn!(task = %self.name, "task already executed, keeping first outcome");
                existing
            }
            None => guard::execute(self).await,
        };
        self.result.insert(result)
    }

    /// Record an outcome without running the lifecycle.
    pub(crate) fn settle_without_running(&mut self, err: TestError) {
        if self.result.is_none() {
            self.result = Some(TaskResult {
                err: Some(err),
                duration: Duration::ZERO,
            });
        }
    }
}

impl<C> std::fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("set_up_suite", &self.set_up_suite.is_some())
            .field("tear_down_suite", &self.tear_down_suite.is_some())
            .field("result", &self.result)
            .finish()
    }
}
