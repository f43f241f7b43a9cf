//! Parallel test execution
//!
//! Runs a batch of independent tests with bounded concurrency. Each test gets
//! its own task, waits for an admission permit, borrows its resources from the
//! [`ResourceManager`], runs, and always hands the resources back.

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::models::{Test, TestCaseResult, TestResults};
use crate::resources::{ManagerStats, ResourceFactories, ResourceManager};
use crate::utils::timer::Timer;

/// Least time pool cleanup gets after the graceful deadline is spent
const CLEANUP_GRACE: Duration = Duration::from_millis(250);

/// Runner lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Running,
    ShuttingDown,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Point-in-time view of the runner and its resources
#[derive(Clone, Debug, Serialize)]
pub struct RunnerStats {
    pub state: RunnerState,
    pub max_concurrency: usize,
    /// Free execution slots
    pub available_slots: usize,
    pub in_flight: usize,
    pub resources: ManagerStats,
}

struct Lifecycle {
    state: RunnerState,
    active_batches: usize,
    closed: bool,
}

/// Executes test batches with a concurrency bound
pub struct ParallelRunner {
    config: RunnerConfig,
    manager: Arc<ResourceManager>,
    gate: Arc<Semaphore>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    /// Stops admissions
    shutdown: CancellationToken,
    /// Fired when the graceful deadline passes with tests still running.
    /// Also cancels their pending resource acquisitions.
    abandon: CancellationToken,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
}

impl ParallelRunner {
    pub fn new(config: RunnerConfig, manager: Arc<ResourceManager>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            gate: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            manager,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: RunnerState::Idle,
                active_batches: 0,
                closed: false,
            })),
            shutdown: CancellationToken::new(),
            abandon: CancellationToken::new(),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Build and initialize a resource manager for `config`
    pub fn with_factories(config: RunnerConfig, factories: ResourceFactories) -> Result<Self> {
        let manager = ResourceManager::new(config.clone(), factories)?;
        manager.initialize()?;
        Self::new(config, Arc::new(manager))
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    pub fn state(&self) -> RunnerState {
        self.lifecycle.lock().state
    }

    fn begin_batch(&self) -> Result<BatchGuard> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.closed {
            return Err(Error::NotInitialized("parallel runner (shut down)".to_string()));
        }
        lifecycle.active_batches += 1;
        lifecycle.state = RunnerState::Running;
        Ok(BatchGuard {
            lifecycle: Arc::clone(&self.lifecycle),
        })
    }

    /// Run every test and aggregate the outcomes
    ///
    /// Failures inside a test, including resource acquisition failures and
    /// panics, are recorded in its result. The call itself only fails when the
    /// batch cannot start.
    pub async fn execute_tests_parallel(&self, tests: Vec<Arc<dyn Test>>) -> Result<TestResults> {
        let _batch = self.begin_batch()?;
        let suite = self.config.suite_name.as_str();

        if tests.is_empty() {
            debug!("Empty batch, nothing to run");
            return Ok(TestResults::empty(suite));
        }
        if !self.manager.is_initialized() {
            return Err(Error::NotInitialized("resource manager".to_string()));
        }

        info!(
            "Running {} tests (max {} concurrent)",
            tests.len(),
            self.config.max_concurrency
        );
        let start = Utc::now();
        let timer = Timer::start(format!("batch {suite}"));

        let mut workers = Vec::with_capacity(tests.len());
        for test in tests {
            let name = test.name().to_string();
            let worker = Worker {
                gate: Arc::clone(&self.gate),
                manager: Arc::clone(&self.manager),
                shutdown: self.shutdown.clone(),
                abandon: self.abandon.clone(),
                in_flight: Arc::clone(&self.in_flight),
            };
            workers.push((name, self.tracker.spawn(worker.run(test))));
        }

        // Collected in submission order
        let mut results = Vec::with_capacity(workers.len());
        for (name, mut handle) in workers {
            let result = tokio::select! {
                biased;
                joined = &mut handle => joined.unwrap_or_else(|e| {
                    TestCaseResult::error(&name, start, format!("worker task failed: {e}"))
                }),
                _ = self.abandon.cancelled() => TestCaseResult::error(
                    &name,
                    start,
                    "abandoned at shutdown: still running after the graceful deadline",
                ),
            };
            results.push(result);
        }

        let summary = TestResults::new(suite, start, results);
        info!(
            "Batch completed in {}ms - Pass: {}/{} ({:.1}%), failed {}, skipped {}, errors {}",
            timer.stop().as_millis(),
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.failed,
            summary.skipped,
            summary.errors
        );
        Ok(summary)
    }

    /// Stop admitting tests, wait up to the graceful deadline for running ones,
    /// then release every pool. Later batches are refused.
    ///
    /// Returns within the graceful deadline plus a short cleanup allowance.
    /// Pool cleanup still running at that point continues in the background.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.closed {
                return Ok(());
            }
            lifecycle.closed = true;
            lifecycle.state = RunnerState::ShuttingDown;
        }

        info!(
            in_flight = self.in_flight.load(Ordering::SeqCst),
            "Shutting down (grace {}ms)",
            self.config.graceful_shutdown.as_millis()
        );
        let deadline = Instant::now() + self.config.graceful_shutdown;
        self.shutdown.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                stragglers = self.tracker.len(),
                "Graceful deadline passed, abandoning running tests"
            );
            self.abandon.cancel();
        }

        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(CLEANUP_GRACE);
        let manager = Arc::clone(&self.manager);
        let mut cleanup = tokio::spawn(async move { manager.cleanup().await });
        let cleanup = match tokio::time::timeout(budget, &mut cleanup).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::ResourceRelease {
                pool: "all".to_string(),
                reason: format!("cleanup task failed: {e}"),
            }),
            Err(_) => {
                warn!(
                    budget_ms = budget.as_millis() as u64,
                    "Pool cleanup still closing resources, leaving it in the background"
                );
                Ok(())
            }
        };

        self.lifecycle.lock().state = RunnerState::Idle;
        info!(drained, "Shutdown complete");
        cleanup
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            state: self.state(),
            max_concurrency: self.config.max_concurrency,
            available_slots: self.gate.available_permits(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            resources: self.manager.stats(),
        }
    }
}

/// Returns the runner to idle when the last active batch finishes
struct BatchGuard {
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.active_batches = lifecycle.active_batches.saturating_sub(1);
        if lifecycle.active_batches == 0 && lifecycle.state == RunnerState::Running {
            lifecycle.state = RunnerState::Idle;
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything one test task needs from the runner
struct Worker {
    gate: Arc<Semaphore>,
    manager: Arc<ResourceManager>,
    shutdown: CancellationToken,
    abandon: CancellationToken,
    in_flight: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self, test: Arc<dyn Test>) -> TestCaseResult {
        let name = test.name().to_string();

        let permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            permit = Arc::clone(&self.gate).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            debug!(test = %name, "Not admitted before shutdown");
            return TestCaseResult::skipped(&name, "runner shut down before the test was admitted");
        };
        let _in_flight = InFlight::enter(&self.in_flight);

        let start = Utc::now();
        debug!(test = %name, kind = %test.kind().name(), "Test admitted");

        let mut resources = match self
            .manager
            .acquire_resources(test.as_ref(), &self.abandon)
            .await
        {
            Ok(resources) => resources,
            Err(e) => {
                warn!(test = %name, "Resource acquisition failed: {e}");
                return TestCaseResult::error(&name, start, format!("resource acquisition failed: {e}"));
            }
        };

        let mut result = match AssertUnwindSafe(test.execute(&mut resources))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(test = %name, "Test panicked: {message}");
                TestCaseResult::error(&name, start, format!("test panicked: {message}"))
            }
        };

        if let Err(e) = self.manager.release_resources(resources).await {
            warn!(test = %name, "Resource release failed: {e}");
            result = result.with_log(format!("resource release failed: {e}"));
        }

        debug!(test = %name, status = %result.status, "Test finished");
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
