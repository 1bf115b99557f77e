//! Test result reporting

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::*;
use serde::{Deserialize, Serialize};

use crate::runner::Run;
use crate::task::TaskResult;

/// Writes one line per task to a console-like sink.
pub struct Reporter<W: Write> {
    sink: W,
    color: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, color: true }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// `<name> OK` for passing tasks; `<name> FAIL` followed by the error's
    /// stack (or the error itself when there is no stack) for failing ones.
    pub fn report<C: Send + Sync + 'static>(&mut self, run: &Run<C>) -> io::Result<()> {
        for (name, result) in run.results() {
            match result {
                Some(result) if result.passed() => {
                    let line = format!("{name} OK");
                    self.line(&line, |s| s.yellow())?;
                }
                Some(TaskResult { err: Some(err), .. }) => {
                    let line = format!("{name} FAIL");
                    self.line(&line, |s| s.red())?;
                    match err.stack() {
                        Some(stack) => writeln!(self.sink, "{err}\n{stack}")?,
                        None => writeln!(self.sink, "{err}")?,
                    }
                }
                _ => {
                    let line = format!("{name} NOT RUN");
                    self.line(&line, |s| s.dimmed())?;
                }
            }
        }

        for suite in run.suite_errors() {
            let line = format!("{} FAIL", suite.hook);
            self.line(&line, |s| s.red())?;
            writeln!(self.sink, "{}", suite.err)?;
        }
        self.sink.flush()
    }

    fn line(&mut self, text: &str, paint: impl FnOnce(&str) -> ColoredString) -> io::Result<()> {
        if self.color {
            writeln!(self.sink, "{}", paint(text))
        } else {
            writeln!(self.sink, "{text}")
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<C: Send + Sync + 'static> Run<C> {
    /// Print the per-task report to stdout.
    pub fn report(&self) -> io::Result<()> {
        Reporter::new(io::stdout().lock()).report(self)
    }
}

/// Aggregated test run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Failed tests whose error was the time budget running out
    pub timeout: usize,
    /// Tasks that never ran
    pub not_run: usize,
    pub pass_rate: f64,
    pub suite_errors: Vec<SuiteFailure>,
    pub failures: Vec<FailureInfo>,
    pub results: Vec<TestRecord>,
}

/// One task's outcome as exported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Information about a failed test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteFailure {
    pub hook: String,
    pub error: String,
}

impl TestReport {
    /// Build a report from a (usually executed) run.
    pub fn from_run<C: Send + Sync + 'static>(run: &Run<C>) -> Self {
        let mut report = Self {
            generated_at: Utc::now(),
            total: run.len(),
            passed: 0,
            failed: 0,
            timeout: 0,
            not_run: 0,
            pass_rate: 0.0,
            suite_errors: run
                .suite_errors()
                .iter()
                .map(|s| SuiteFailure {
                    hook: s.hook.to_string(),
                    error: s.err.to_string(),
                })
                .collect(),
            failures: Vec::new(),
            results: Vec::with_capacity(run.len()),
        };

        for (name, result) in run.results() {
            let Some(result) = result else {
                report.not_run += 1;
                continue;
            };
            match &result.err {
                None => report.passed += 1,
                Some(err) => {
                    report.failed += 1;
                    if err.is_timeout() {
                        report.timeout += 1;
                    }
                    report.failures.push(FailureInfo {
                        name: name.to_string(),
                        error: err.to_string(),
                    });
                }
            }
            report.results.push(TestRecord {
                name: name.to_string(),
                passed: result.passed(),
                error: result.err.as_ref().map(ToString::to_string),
                duration_ms: result.duration.as_millis() as u64,
            });
        }

        let run_count = report.passed + report.failed;
        if run_count > 0 {
            report.pass_rate = (report.passed as f64 / run_count as f64) * 100.0;
        }

        report
    }

    /// Print colored summary to stdout.
    pub fn print_summary(&self) {
        println!();
        println!("{}", "=== Test Case Results ===".bold().cyan());
        println!("Total:   {}", self.total);
        println!(
            "Passed:  {} ({:.1}%)",
            self.passed.to_string().green(),
            self.pass_rate
        );
        println!("Failed:  {}", self.failed.to_string().red());
        println!("Timeout: {}", self.timeout);
        if self.not_run > 0 {
            println!("Not run: {}", self.not_run.to_string().yellow());
        }

        if !self.suite_errors.is_empty() {
            println!();
            println!("{}", "=== Suite Hooks ===".bold().red());
            for suite in &self.suite_errors {
                println!("  {} - {}", suite.hook.yellow(), suite.error);
            }
        }
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the JSON report to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json().map_err(io::Error::other)?;
        std::fs::write(path, json)
    }
}
