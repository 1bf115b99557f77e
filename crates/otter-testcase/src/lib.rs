//! # Otter Test Case Runner
//!
//! Runs declarative test cases: named test methods over a shared context,
//! with optional `setUp`/`tearDown` per test and `setUpSuite`/`tearDownSuite`
//! around the whole case. Each test runs its lifecycle under a time budget and
//! settles exactly once, whether it finishes normally, fails, times out, or
//! raises a failure from detached work through its error boundary.
//!
//! ```ignore
//! use otter_testcase::{Step, StepContext, TestCase};
//!
//! let case = TestCase::new(())
//!     .method("testAdd", Step::from_fn(|_: &StepContext<()>| Ok(())))
//!     .timeout_ms(500);
//! let mut run = case.assemble()?;
//! run.run().await.report()?;
//! ```

#![warn(clippy::all)]

pub mod boundary;
pub mod case;
pub mod completion;
pub mod config;
pub mod error;
mod guard;
pub mod report;
pub mod runner;
pub mod sequence;
pub mod step;
pub mod task;

pub use boundary::ErrorBoundary;
pub use case::{Member, TestCase};
pub use config::RunnerConfig;
pub use error::{ConfigError, StepResult, TestError};
pub use report::{Reporter, TestReport};
pub use runner::{Run, SuiteError};
pub use step::{Done, Step, StepContext};
pub use task::{DEFAULT_TIMEOUT_MS, Task, TaskResult};
