//! Data models for parallel test execution
//!
//! Test abstraction, capability descriptors and result types.

mod test_result;

pub use test::{ResourceNeeds, Test, TestKind};
pub use test_result::{TestCaseResult, TestResults, TestStatus};
