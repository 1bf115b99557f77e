//! Error types for test execution and case assembly

use std::backtrace::{Backtrace, BacktraceStatus};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error attached to a task after it ran.
///
/// Step errors, timeouts and uncaught (detached) failures all end up here;
/// uncaught failures are stored verbatim as whatever the boundary received.
#[derive(Debug, Clone, Error)]
pub enum TestError {
    /// Error returned by a step (setUp, test body, tearDown or a suite hook)
    #[error("{message}")]
    Failed {
        /// Human readable message
        message: String,
        /// Captured stack, if backtraces were enabled when the error was built
        stack: Option<String>,
    },

    /// A step panicked; the adapter caught the unwind
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// The lifecycle sequence exceeded its time budget
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The suite setUp hook failed, so the test was never executed
    #[error("setUpSuite failed: {0}")]
    SuiteSetUp(Box<TestError>),

    /// Both completion channels went away without settling
    #[error("test completed without delivering an outcome")]
    Dropped,
}

impl TestError {
    /// Build a step error from a message, capturing a backtrace when
    /// `RUST_BACKTRACE` enables it.
    pub fn msg(message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self::Failed {
            message: message.into(),
            stack,
        }
    }

    /// Build a step error with an explicit stack text.
    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }

    /// Wrap any error type, keeping its source chain in the message.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::msg(message)
    }

    /// Build an error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Panicked { message }
    }

    /// Stack text to print for this error, if any.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Failed { stack, .. } => stack.as_deref(),
            Self::SuiteSetUp(inner) => inner.stack(),
            _ => None,
        }
    }

    /// Whether this error came from the time budget running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<String> for TestError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for TestError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<std::io::Error> for TestError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

/// Result type returned by every step
pub type StepResult = Result<(), TestError>;

/// Errors raised while assembling a test case or loading runner config
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Suite hooks were declared but the case has no tests to attach them to
    #[error("test case declares {hooks} but has no test methods")]
    SuiteHooksWithoutTests {
        /// Which hooks were declared, e.g. "setUpSuite and tearDownSuite"
        hooks: &'static str,
    },

    /// Two tests registered under the same name
    #[error("duplicate test name: {0}")]
    DuplicateTest(String),

    /// Config file could not be read
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `RunnerConfig`
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
