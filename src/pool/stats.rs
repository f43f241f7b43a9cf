//! Pool entries, statistics and health reports

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A resource checked out of a pool
///
/// Owned by exactly one holder until it is handed back through
/// [`ResourcePool::release`](super::ResourcePool::release).
pub struct Pooled<T> {
    pub(super) resource: T,
    pub(super) pool_id: u64,
    pub(super) id: u64,
    pub(super) usage_count: u64,
}

impl<T> Pooled<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    /// Number of times this instance has been acquired, including this one
    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn get(&self) -> &T {
        &self.resource
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool_id", &self.pool_id)
            .field("id", &self.id)
            .field("usage_count", &self.usage_count)
            .finish()
    }
}

/// Idle entry owned by the pool
pub(super) struct Entry<T> {
    pub resource: T,
    pub id: u64,
    pub usage_count: u64,
}

impl<T> Entry<T> {
    pub fn new(resource: T, id: u64) -> Self {
        Self {
            resource,
            id,
            usage_count: 0,
        }
    }

    pub fn checkout(mut self, pool_id: u64) -> Pooled<T> {
        self.usage_count += 1;
        Pooled {
            resource: self.resource,
            pool_id,
            id: self.id,
            usage_count: self.usage_count,
        }
    }

    pub fn returned(pooled: Pooled<T>) -> Self {
        Self {
            resource: pooled.resource,
            id: pooled.id,
            usage_count: pooled.usage_count,
        }
    }
}

/// Point-in-time pool statistics
///
/// `total_acquired - total_released == in_use` always holds;
/// `available + in_use == total_created - total_destroyed` holds whenever
/// `pending` is zero. Written-off checkouts count as both released and
/// destroyed, and again in `total_lost`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub initialized: bool,
    pub max_size: usize,
    pub available: usize,
    pub in_use: usize,
    /// Instances being created or probed
    pub pending: usize,
    pub total_created: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_errors: u64,
    pub total_destroyed: u64,
    /// Checkouts dropped by their holder without a release
    pub total_lost: u64,
}

impl PoolStats {
    /// Live instances counted against `max_size`
    pub fn live(&self) -> usize {
        self.available + self.in_use + self.pending
    }

    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.in_use as f64 / self.max_size as f64) * 100.0
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} in use, {} idle (created {}, acquired {}, released {}, errors {})",
            self.name,
            self.in_use,
            self.max_size,
            self.available,
            self.total_created,
            self.total_acquired,
            self.total_released,
            self.total_errors
        )
    }
}

/// Outcome of probing the idle instances of one pool
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub pool: String,
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_checkout_counts_usage() {
        let entry = Entry::new("conn", 7);
        let pooled = entry.checkout(1);
        assert_eq!(pooled.id(), 7);
        assert_eq!(pooled.usage_count(), 1);
        assert_eq!(*pooled, "conn");

        let again = Entry::returned(pooled).checkout(1);
        assert_eq!(again.usage_count(), 2);
    }

    #[test]
    fn test_stats_live_and_utilization() {
        let stats = PoolStats {
            max_size: 4,
            available: 1,
            in_use: 2,
            pending: 1,
            ..Default::default()
        };
        assert_eq!(stats.live(), 4);
        assert_eq!(stats.utilization(), 50.0);
    }
}
