//! Test execution engine
//!
//! Provides bounded parallel execution of test batches.

mod parallel;

pub use parallel::{ParallelRunner, RunnerState, RunnerStats};
