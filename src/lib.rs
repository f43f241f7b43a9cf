//! Parallel execution and resource pooling for multi-protocol tests
//!
//! A [`ParallelRunner`](executor::ParallelRunner) runs batches of independent
//! [`Test`](models::Test)s with bounded concurrency. Before each test runs, the
//! [`ResourceManager`](resources::ResourceManager) lends it the browser
//! session, HTTP client and database connections it declares, drawing them
//! from bounded [`ResourcePool`](pool::ResourcePool)s that reuse instances
//! across tests.

pub mod checks;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod pool;
pub mod resources;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::RunnerConfig;
pub use error::{Error, Result};
pub use executor::{ParallelRunner, RunnerState, RunnerStats};
pub use models::{ResourceNeeds, Test, TestCaseResult, TestKind, TestResults, TestStatus};
pub use resources::{ResourceFactories, ResourceHandle, ResourceManager};
