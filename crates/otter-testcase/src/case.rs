//! Test case declaration and assembly into a [`Run`].
//!
//! A [`TestCase`] is an ordered set of named members over one shared context,
//! the way a test module declares methods. Members whose name starts with
//! `test` and that hold a step become tests, in declaration order. `setUp`,
//! `tearDown`, `setUpSuite` and `tearDownSuite` are picked up as hooks.
//! Tests can also be registered explicitly with [`TestCase::test`], which
//! bypasses the name convention.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::RunnerConfig;
use crate::error::ConfigError;
use crate::runner::Run;
use crate::step::Step;
use crate::task::{DEFAULT_TIMEOUT_MS, Task};

pub const SET_UP: &str = "setUp";
pub const TEAR_DOWN: &str = "tearDown";
pub const SET_UP_SUITE: &str = "setUpSuite";
pub const TEAR_DOWN_SUITE: &str = "tearDownSuite";

const TEST_PREFIX: &str = "test";

/// A named member of a test case.
pub enum Member<C> {
    /// Explicitly registered test
    Test(Step<C>),
    /// Callable member; a test when its name starts with `test`
    Method(Step<C>),
    /// Non-callable member, never a test
    Value(serde_json::Value),
}

/// Declarative test case over a shared context `C`.
pub struct TestCase<C> {
    context: Arc<C>,
    members: Vec<(String, Member<C>)>,
    duplicates: Vec<String>,
    timeout_ms: Option<u64>,
    default_timeout_ms: u64,
    filter: Option<String>,
}

impl<C: Send + Sync + 'static> TestCase<C> {
    pub fn new(context: C) -> Self {
        Self::with_shared(Arc::new(context))
    }

    /// Build a case over a context that is shared with something else.
    pub fn with_shared(context: Arc<C>) -> Self {
        Self {
            context,
            members: Vec::new(),
            duplicates: Vec::new(),
            timeout_ms: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            filter: None,
        }
    }

    /// Set a member. Re-setting a name replaces the old member in place.
    pub fn member(mut self, name: impl Into<String>, member: Member<C>) -> Self {
        let name = name.into();
        match self.members.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = member,
            None => self.members.push((name, member)),
        }
        self
    }

    /// Add a callable member.
    pub fn method(self, name: impl Into<String>, step: Step<C>) -> Self {
        self.member(name, Member::Method(step))
    }

    /// Add a non-callable member.
    pub fn value(self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.member(name, Member::Value(value.into()))
    }

    /// Register a test explicitly, whatever its name.
    pub fn test(mut self, name: impl Into<String>, step: Step<C>) -> Self {
        let name = name.into();
        if self.members.iter().any(|(existing, _)| *existing == name) {
            self.duplicates.push(name);
            return self;
        }
        self.members.push((name, Member::Test(step)));
        self
    }

    pub fn set_up(self, step: Step<C>) -> Self {
        self.method(SET_UP, step)
    }

    pub fn tear_down(self, step: Step<C>) -> Self {
        self.method(TEAR_DOWN, step)
    }

    pub fn set_up_suite(self, step: Step<C>) -> Self {
        self.method(SET_UP_SUITE, step)
    }

    pub fn tear_down_suite(self, step: Step<C>) -> Self {
        self.method(TEAR_DOWN_SUITE, step)
    }

    /// Per-test budget in milliseconds. `0` is a zero-length budget: only
    /// steps that complete on their first poll pass. Leaving it unset uses the
    /// default (3000 ms unless overridden by config).
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Only keep tests whose name contains `pattern`.
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Apply runner configuration: default budget and name filter. An explicit
    /// [`timeout_ms`](Self::timeout_ms) still wins over the configured default.
    pub fn with_config(mut self, config: &RunnerConfig) -> Self {
        self.default_timeout_ms = config.default_timeout_ms;
        if let Some(filter) = &config.filter {
            self.filter = Some(filter.clone());
        }
        self
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Names of the tests this case declares, in order, before filtering.
    pub fn test_names(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(name, member)| is_test(name, member))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn hook(&self, name: &str) -> Option<Step<C>> {
        self.members.iter().find_map(|(member_name, member)| match member {
            Member::Method(step) if member_name == name => Some(step.clone()),
            _ => None,
        })
    }

    fn timeout(&self) -> Option<Duration> {
        let ms = self.timeout_ms.unwrap_or(self.default_timeout_ms);
        Some(Duration::from_millis(ms))
    }

    /// Build the ordered task list. Can be called repeatedly; every call
    /// produces a fresh, unexecuted run.
    pub fn assemble(&self) -> Result<Run<C>, ConfigError> {
        if let Some(name) = self.duplicates.first() {
            return Err(ConfigError::DuplicateTest(name.clone()));
        }

        let set_up_suite = self.hook(SET_UP_SUITE);
        let tear_down_suite = self.hook(TEAR_DOWN_SUITE);

        let declared = self.test_names();
        if declared.is_empty() {
            let hooks = match (&set_up_suite, &tear_down_suite) {
                (Some(_), Some(_)) => Some("setUpSuite and tearDownSuite"),
                (Some(_), None) => Some(SET_UP_SUITE),
                (None, Some(_)) => Some(TEAR_DOWN_SUITE),
                (None, None) => None,
            };
            if let Some(hooks) = hooks {
                return Err(ConfigError::SuiteHooksWithoutTests { hooks });
            }
        }

        let set_up = self.hook(SET_UP).unwrap_or_default();
        let tear_down = self.hook(TEAR_DOWN).unwrap_or_default();
        let timeout = self.timeout();

        let mut tasks: Vec<Task<C>> = self
            .members
            .iter()
            .filter(|(name, member)| is_test(name, member))
            .filter(|(name, _)| match &self.filter {
                Some(pattern) => name.contains(pattern.as_str()),
                None => true,
            })
            .filter_map(|(name, member)| match member {
                Member::Test(body) | Member::Method(body) => Some(Task {
                    name: name.clone(),
                    set_up: set_up.clone(),
                    tear_down: tear_down.clone(),
                    body: body.clone(),
                    context: Arc::clone(&self.context),
                    timeout,
                    set_up_suite: None,
                    tear_down_suite: None,
                    result: None,
                }),
                Member::Value(_) => None,
            })
            .collect();

        if tasks.is_empty() && !declared.is_empty() {
            warn!(
                filter = ?self.filter,
                declared = declared.len(),
                "filter matched no tests, suite hooks will not run"
            );
        }

        if let Some(first) = tasks.first_mut() {
            first.set_up_suite = set_up_suite;
        }
        if let Some(last) = tasks.last_mut() {
            last.tear_down_suite = tear_down_suite;
        }

        Ok(Run::new(tasks))
    }
}

fn is_test<C>(name: &str, member: &Member<C>) -> bool {
    match member {
        Member::Test(_) => true,
        Member::Method(_) => name.starts_with(TEST_PREFIX),
        Member::Value(_) => false,
    }
}
