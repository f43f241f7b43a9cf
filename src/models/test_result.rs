//! Test result models
//!
//! Defines per-test outcomes and the suite-level aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Test execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASS"),
            TestStatus::Failed => write!(f, "FAIL"),
            TestStatus::Skipped => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single test execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub status: TestStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl TestCaseResult {
    fn finished(
        name: impl Into<String>,
        status: TestStatus,
        start_time: DateTime<Utc>,
        error: Option<String>,
    ) -> Self {
        let end_time = Utc::now();
        let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            name: name.into(),
            status,
            start_time,
            end_time,
            duration_ms,
            error,
            logs: Vec::new(),
        }
    }

    /// Passed test that started at `start_time` and ends now
    pub fn passed(name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self::finished(name, TestStatus::Passed, start_time, None)
    }

    pub fn failed(
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self::finished(name, TestStatus::Failed, start_time, Some(message.into()))
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::finished(name, TestStatus::Skipped, Utc::now(), Some(reason.into()))
    }

    pub fn error(
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self::finished(name, TestStatus::Error, start_time, Some(error.into()))
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl fmt::Display for TestCaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.name,
            self.duration_ms
        )?;
        if let Some(err) = &self.error {
            write!(f, " - {err}")?;
        }
        Ok(())
    }
}

/// Aggregate results of one batch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResults {
    pub suite_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub results: Vec<TestCaseResult>,
}

impl TestResults {
    /// Build the aggregate from completed results, ending now
    pub fn new(
        suite_name: impl Into<String>,
        start_time: DateTime<Utc>,
        results: Vec<TestCaseResult>,
    ) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            suite_name: suite_name.into(),
            start_time,
            end_time: Utc::now(),
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            skipped: count(TestStatus::Skipped),
            errors: count(TestStatus::Error),
            results,
        }
    }

    /// Aggregate for a batch with nothing to run
    pub fn empty(suite_name: impl Into<String>) -> Self {
        Self::new(suite_name, Utc::now(), Vec::new())
    }

    pub fn duration_ms(&self) -> u64 {
        (self.end_time - self.start_time).num_milliseconds().max(0) as u64
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Counts reconcile with the number of recorded results
    pub fn is_consistent(&self) -> bool {
        self.passed + self.failed + self.skipped + self.errors == self.total
            && self.total == self.results.len()
    }

    pub fn result(&self, name: &str) -> Option<&TestCaseResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for TestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suite: {}", self.suite_name)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms()
        )
    }
}
