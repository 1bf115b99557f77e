//! Ordered step sequencing with an overall time budget.

use std::time::Duration;

use tracing::trace;

use crate::error::TestError;
use crate::step::{Step, StepContext};

/// An ordered list of steps bound to one context.
pub struct StepList<C> {
    steps: Vec<Step<C>>,
    context: StepContext<C>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
}

/// Per-step errors of one sequence run. `errors[i]` is `None` when step `i`
/// succeeded or was never reached.
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub errors: Vec<Option<TestError>>,
    /// Number of steps that finished (successfully or not)
    pub completed: usize,
    pub timed_out: bool,
}

impl<C: Send + Sync + 'static> StepList<C> {
    pub fn new(steps: Vec<Step<C>>, context: StepContext<C>) -> Self {
        Self {
            steps,
            context,
            delay: None,
            timeout: None,
        }
    }

    /// Wait before the first step. A zero delay still yields once to the
    /// scheduler, so anything spawned before the sequence gets to run first.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Budget for the whole sequence, measured after the delay. `None` means
    /// no budget; a zero budget still lets steps that finish on their first
    /// poll complete.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the steps in order and collect one error slot per step.
    ///
    /// Without `continue_on_error` the first failing step abandons the rest.
    /// When the budget runs out the in-flight step is dropped and the timeout
    /// is recorded in its slot.
    pub async fn to_array(self, continue_on_error: bool) -> SequenceReport {
        let Self {
            steps,
            context,
            delay,
            timeout,
        } = self;

        match delay {
            Some(d) if d.is_zero() => tokio::task::yield_now().await,
            Some(d) => tokio::time::sleep(d).await,
            None => {}
        }

        let mut errors: Vec<Option<TestError>> = vec![None; steps.len()];
        let mut in_flight = 0usize;

        let run = async {
            for (index, step) in steps.iter().enumerate() {
                in_flight = index;
                if let Err(err) = step.call(context.clone()).await {
                    trace!(task = context.boundary().task(), step = index, error = %err, "step failed");
                    errors[index] = Some(err);
                    if !continue_on_error {
                        return index + 1;
                    }
                }
            }
            steps.len()
        };

        let finished = match timeout {
            Some(budget) => tokio::time::timeout(budget, run).await.ok(),
            None => Some(run.await),
        };
        let timed_out = finished.is_none();
        let completed = finished.unwrap_or(in_flight);

        if timed_out {
            if let (Some(budget), Some(slot)) = (timeout, errors.get_mut(in_flight)) {
                *slot = Some(TestError::Timeout(budget));
            }
        }

        SequenceReport {
            errors,
            completed,
            timed_out,
        }
    }
}
