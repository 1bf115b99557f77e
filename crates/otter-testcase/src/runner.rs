//! Test run execution

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::boundary::ErrorBoundary;
use crate::error::TestError;
use crate::sequence::StepList;
use crate::step::{Step, StepContext};
use crate::task::{Task, TaskResult};

/// Ordered tasks of one test case, plus what went wrong in suite hooks.
pub struct Run<C> {
    tasks: Vec<Task<C>>,
    suite_errors: Vec<SuiteError>,
    executed: bool,
}

/// Failure of a suite-level hook.
#[derive(Debug, Clone)]
pub struct SuiteError {
    /// `setUpSuite` or `tearDownSuite`
    pub hook: &'static str,
    pub err: TestError,
}

impl<C: Send + Sync + 'static> Run<C> {
    pub(crate) fn new(tasks: Vec<Task<C>>) -> Self {
        Self {
            tasks,
            suite_errors: Vec::new(),
            executed: false,
        }
    }

    pub fn tasks(&self) -> &[Task<C>] {
        &self.tasks
    }

    /// Test names in execution order.
    pub fn list(&self) -> Vec<&str> {
        self.tasks.iter().map(Task::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn suite_errors(&self) -> &[SuiteError] {
        &self.suite_errors
    }

    /// `(name, result)` pairs in execution order; `None` for tasks that
    /// have not run.
    pub fn results(&self) -> impl Iterator<Item = (&str, Option<&TaskResult>)> {
        self.tasks.iter().map(|task| (task.name(), task.result()))
    }

    /// Execute every task once, in order.
    ///
    /// `setUpSuite` runs before the first task and `tearDownSuite` after the
    /// last. If `setUpSuite` fails, the tests are not executed and each one is
    /// recorded as failed; `tearDownSuite` still runs. A failing test never
    /// stops the run.
    pub async fn run(&mut self) -> &mut Self {
        if self.executed {
            warn!("run already executed, not running tasks again");
            return self;
        }
        self.executed = true;
        info!(tests = self.tasks.len(), "running test case");

        let mut suite_failure: Option<TestError> = None;

        for index in 0..self.tasks.len() {
            let task = &mut self.tasks[index];

            if let Some(hook) = task.set_up_suite.clone() {
                let context = Arc::clone(&task.context);
                if let Err(err) = run_suite_hook(hook, context, "setUpSuite", task.timeout).await {
                    warn!(error = %err, "setUpSuite failed, skipping tests");
                    self.suite_errors.push(SuiteError {
                        hook: "setUpSuite",
                        err: err.clone(),
                    });
                    suite_failure = Some(err);
                }
            }

            let task = &mut self.tasks[index];
            match &suite_failure {
                Some(err) => task.settle_without_running(TestError::SuiteSetUp(Box::new(err.clone()))),
                None => {
                    task.execute().await;
                }
            }

            if let Some(hook) = task.tear_down_suite.clone() {
                let context = Arc::clone(&task.context);
                if let Err(err) = run_suite_hook(hook, context, "tearDownSuite", task.timeout).await {
                    warn!(error = %err, "tearDownSuite failed");
                    self.suite_errors.push(SuiteError {
                        hook: "tearDownSuite",
                        err,
                    });
                }
            }
        }

        debug!(
            passed = self.passed(),
            failed = self.failed(),
            "test case finished"
        );
        self
    }

    pub fn passed(&self) -> usize {
        self.tasks.iter().filter(|t| t.passed() == Some(true)).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.iter().filter(|t| t.passed() == Some(false)).count()
    }
}

/// Run a suite hook. A failure raised through the boundary while the hook
/// runs fails the hook like a returned error; the step's own error wins when
/// both happen.
async fn run_suite_hook<C: Send + Sync + 'static>(
    hook: Step<C>,
    context: Arc<C>,
    label: &'static str,
    timeout: Option<Duration>,
) -> Result<(), TestError> {
    let (boundary, mut listener) = ErrorBoundary::register(label);
    let cx = StepContext::new(context, boundary);
    let report = StepList::new(vec![hook], cx)
        .timeout(timeout)
        .to_array(false)
        .await;

    let mut err = report.errors.into_iter().next().flatten();
    while let Some(uncaught) = listener.try_recv() {
        warn!(hook = label, error = %uncaught, "uncaught failure in suite hook");
        err.get_or_insert(uncaught);
    }
    match err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl<C> std::fmt::Debug for Run<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("tasks", &self.tasks)
            .field("suite_errors", &self.suite_errors)
            .field("executed", &self.executed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::TestCase;
    use parking_lot::Mutex;

    type Log = Mutex<Vec<String>>;

    fn log(label: &'static str) -> Step<Log> {
        Step::from_fn(move |cx: &StepContext<Log>| {
            cx.lock().push(label.to_string());
            Ok(())
        })
    }

    fn failing(label: &'static str) -> Step<Log> {
        Step::from_fn(move |cx: &StepContext<Log>| {
            cx.lock().push(label.to_string());
            Err(TestError::msg(format!("{label} failed")))
        })
    }

    #[tokio::test]
    async fn test_lifecycle_order() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .set_up_suite(log("setUpSuite"))
            .tear_down_suite(log("tearDownSuite"))
            .set_up(log("setUp"))
            .tear_down(log("tearDown"))
            .method("testA", log("testA"))
            .method("testB", log("testB"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(
            *case.context().lock(),
            vec![
                "setUpSuite",
                "setUp",
                "testA",
                "tearDown",
                "setUp",
                "testB",
                "tearDown",
                "tearDownSuite",
            ]
        );
        assert_eq!(run.passed(), 2);
        assert!(run.suite_errors().is_empty());
    }

    #[tokio::test]
    async fn test_failing_test_does_not_stop_run() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .tear_down(log("tearDown"))
            .method("testA", failing("testA"))
            .method("testB", log("testB"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(run.passed(), 1);
        assert_eq!(run.failed(), 1);
        let results: Vec<_> = run.results().collect();
        assert_eq!(results[0].0, "testA");
        assert_eq!(
            results[0].1.unwrap().err.as_ref().unwrap().to_string(),
            "testA failed"
        );
        // tearDown still ran after the failing body
        assert_eq!(
            *case.context().lock(),
            vec!["testA", "tearDown", "testB", "tearDown"]
        );
    }

    #[tokio::test]
    async fn test_set_up_suite_failure_fails_all_tests() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .set_up_suite(failing("setUpSuite"))
            .tear_down_suite(log("tearDownSuite"))
            .method("testA", log("testA"))
            .method("testB", log("testB"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(run.failed(), 2);
        assert!(matches!(
            run.tasks()[1].err(),
            Some(TestError::SuiteSetUp(_))
        ));
        assert_eq!(run.suite_errors().len(), 1);
        assert_eq!(run.suite_errors()[0].hook, "setUpSuite");
        assert_eq!(
            *case.context().lock(),
            vec!["setUpSuite", "tearDownSuite"]
        );
    }

    #[tokio::test]
    async fn test_tear_down_suite_failure_recorded() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .tear_down_suite(failing("tearDownSuite"))
            .method("testA", log("testA"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(run.passed(), 1);
        assert_eq!(run.suite_errors()[0].hook, "tearDownSuite");
    }

    #[tokio::test]
    async fn test_suite_hook_uncaught_failure_recorded() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .set_up_suite(Step::from_fn(|cx: &StepContext<Log>| {
                cx.lock().push("setUpSuite".to_string());
                cx.boundary().raise("fixture server crashed");
                Ok(())
            }))
            .tear_down_suite(log("tearDownSuite"))
            .method("testA", log("testA"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(run.suite_errors().len(), 1);
        assert_eq!(run.suite_errors()[0].hook, "setUpSuite");
        assert_eq!(run.suite_errors()[0].err.to_string(), "fixture server crashed");
        assert!(matches!(run.tasks()[0].err(), Some(TestError::SuiteSetUp(_))));
        assert_eq!(
            *case.context().lock(),
            vec!["setUpSuite", "tearDownSuite"]
        );
    }

    #[tokio::test]
    async fn test_tear_down_suite_uncaught_failure_recorded() {
        let case = TestCase::new(Mutex::new(Vec::new()))
            .tear_down_suite(Step::from_async(|cx: StepContext<Log>| async move {
                cx.boundary()
                    .spawn(async { Err(TestError::msg("cleanup worker failed")) });
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok::<_, TestError>(())
            }))
            .method("testA", log("testA"));
        let mut run = case.assemble().unwrap();
        run.run().await;

        assert_eq!(run.passed(), 1);
        assert_eq!(run.suite_errors().len(), 1);
        assert_eq!(run.suite_errors()[0].hook, "tearDownSuite");
        assert_eq!(run.suite_errors()[0].err.to_string(), "cleanup worker failed");
    }

    #[tokio::test]
    async fn test_run_executes_once() {
        let case = TestCase::new(Mutex::new(Vec::new())).method("testA", log("testA"));
        let mut run = case.assemble().unwrap();
        run.run().await;
        run.run().await;
        assert!(run.is_executed());
        assert_eq!(*case.context().lock(), vec!["testA"]);
    }
}
