//! Generic bounded resource pool
//!
//! A pool hands out instances built by a [`ResourceFactory`], reuses returned
//! ones, and makes callers wait with a deadline when the bound is reached.

mod factory;
mod resource_pool;
mod stats;

pub use factory::ResourceFactory;
pub use resource_pool::ResourcePool;
pub use stats::{HealthReport, PoolStats, Pooled};
