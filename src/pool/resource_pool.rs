//! Bounded pool of reusable resources
//!
//! Instances are created lazily up to `max_size`, reused before new ones are
//! created, and waited for with a deadline once the pool is exhausted.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::factory::ResourceFactory;
use super::stats::{Entry, HealthReport, PoolStats, Pooled};
use crate::error::{Error, Result};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Idle list and counters, guarded by one lock per pool
struct PoolState<F: ResourceFactory> {
    factory: Option<Arc<F>>,
    initialized: bool,
    max_size: usize,
    timeout: Duration,
    idle: VecDeque<Entry<F::Resource>>,
    checked_out: HashSet<u64>,
    /// Slots reserved for instances being created or probed
    pending: usize,
    next_entry_id: u64,
    total_created: u64,
    total_acquired: u64,
    total_released: u64,
    total_errors: u64,
    total_destroyed: u64,
    total_lost: u64,
}

impl<F: ResourceFactory> PoolState<F> {
    fn new() -> Self {
        Self {
            factory: None,
            initialized: false,
            max_size: 0,
            timeout: Duration::ZERO,
            idle: VecDeque::new(),
            checked_out: HashSet::new(),
            pending: 0,
            next_entry_id: 1,
            total_created: 0,
            total_acquired: 0,
            total_released: 0,
            total_errors: 0,
            total_destroyed: 0,
            total_lost: 0,
        }
    }

    fn live(&self) -> usize {
        self.idle.len() + self.checked_out.len() + self.pending
    }
}

enum Next<F: ResourceFactory> {
    Ready(Pooled<F::Resource>),
    Create(Arc<F>),
    Wait,
}

/// Generic bounded resource pool
pub struct ResourcePool<F: ResourceFactory> {
    id: u64,
    name: String,
    state: Mutex<PoolState<F>>,
    available: Notify,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create an uninitialized pool
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: Mutex::new(PoolState::new()),
            available: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn not_initialized(&self) -> Error {
        Error::NotInitialized(format!("{} pool", self.name))
    }

    /// Make the pool usable. A second call on a live pool is a no-op.
    pub fn initialize(&self, max_size: usize, timeout: Duration, factory: F) -> Result<()> {
        let mut state = self.state.lock();
        if state.initialized {
            debug!(pool = %self.name, "Pool already initialized");
            return Ok(());
        }

        if max_size == 0 {
            return Err(Error::configuration(format!(
                "{} pool max size must be greater than 0",
                self.name
            )));
        }
        if timeout.is_zero() {
            return Err(Error::configuration(format!(
                "{} pool acquire timeout must be greater than 0",
                self.name
            )));
        }
        factory.validate().map_err(|e| {
            Error::configuration(format!("{} pool factory is invalid: {e:#}", self.name))
        })?;

        state.factory = Some(Arc::new(factory));
        state.max_size = max_size;
        state.timeout = timeout;
        state.initialized = true;

        info!(
            pool = %self.name,
            max_size,
            timeout_ms = timeout.as_millis() as u64,
            "Initialized resource pool"
        );
        Ok(())
    }

    /// Acquire with the timeout given at initialization
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Pooled<F::Resource>> {
        let timeout = self.state.lock().timeout;
        self.acquire_timeout(timeout, cancel).await
    }

    /// Acquire an instance, waiting at most `timeout` for one to free up.
    ///
    /// On timeout or cancellation nothing is created and no slot is consumed.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Pooled<F::Resource>> {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(self.name.clone()));
            }

            // Register interest before inspecting state so a release between
            // the check and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.next_step()? {
                Next::Ready(pooled) => return Ok(pooled),
                Next::Create(factory) => {
                    return self.create(factory, deadline, timeout, cancel).await;
                }
                Next::Wait => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(pool = %self.name, "Acquisition cancelled while waiting");
                    return Err(Error::Cancelled(self.name.clone()));
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        pool = %self.name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Timed out waiting for a pooled resource"
                    );
                    return Err(Error::ResourceTimeout {
                        pool: self.name.clone(),
                        timeout,
                    });
                }
                () = notified.as_mut() => {}
            }
        }
    }

    fn next_step(&self) -> Result<Next<F>> {
        let mut state = self.state.lock();
        let factory = match (&state.factory, state.initialized) {
            (Some(factory), true) => Arc::clone(factory),
            _ => return Err(self.not_initialized()),
        };

        if let Some(mut entry) = state.idle.pop_front() {
            factory.reset(&mut entry.resource);
            state.checked_out.insert(entry.id);
            state.total_acquired += 1;
            debug!(pool = %self.name, id = entry.id, "Reusing idle resource");
            return Ok(Next::Ready(entry.checkout(self.id)));
        }

        if state.live() < state.max_size {
            state.pending += 1;
            return Ok(Next::Create(factory));
        }

        Ok(Next::Wait)
    }

    async fn create(
        &self,
        factory: Arc<F>,
        deadline: Instant,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Pooled<F::Resource>> {
        let reservation = Reservation::reserved(self);

        let created = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled(self.name.clone())),
            () = tokio::time::sleep_until(deadline) => {
                return Err(Error::ResourceTimeout {
                    pool: self.name.clone(),
                    timeout,
                });
            }
            result = factory.create() => result,
        };

        match created {
            Ok(resource) => match reservation.commit(resource) {
                Ok(pooled) => {
                    debug!(pool = %self.name, id = pooled.id(), "Created new resource");
                    Ok(pooled)
                }
                Err(resource) => {
                    // Pool was cleaned up while the instance was being created
                    if let Err(e) = factory.close(resource).await {
                        warn!(pool = %self.name, "Failed to close orphaned resource: {e:#}");
                    }
                    Err(self.not_initialized())
                }
            },
            Err(source) => {
                reservation.fail();
                warn!(pool = %self.name, "Resource creation failed: {source:#}");
                Err(Error::ResourceCreation {
                    pool: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Hand an instance back.
    ///
    /// Instances that did not come from this pool, or were already returned,
    /// are rejected without touching the counters. When the pool has shrunk
    /// below its live count the instance is closed instead of queued.
    pub async fn release(&self, pooled: Pooled<F::Resource>) -> Result<()> {
        let (factory, discarded, result) = {
            let mut state = self.state.lock();
            let Some(factory) = state.factory.clone() else {
                return Err(self.not_initialized());
            };

            if pooled.pool_id != self.id || !state.checked_out.remove(&pooled.id) {
                warn!(
                    pool = %self.name,
                    id = pooled.id,
                    owner = pooled.pool_id,
                    "Rejected release of an instance not checked out from this pool"
                );
                return Err(Error::ResourceRelease {
                    pool: self.name.clone(),
                    reason: format!("instance {} is not checked out from this pool", pooled.id),
                });
            }

            state.total_released += 1;
            let mut entry = Entry::returned(pooled);

            if !state.initialized {
                state.total_destroyed += 1;
                (factory, Some(entry), Err(self.not_initialized()))
            } else if state.live() < state.max_size {
                factory.reset(&mut entry.resource);
                state.idle.push_back(entry);
                (factory, None, Ok(()))
            } else {
                debug!(pool = %self.name, id = entry.id, "Pool over capacity, discarding");
                state.total_destroyed += 1;
                (factory, Some(entry), Ok(()))
            }
        };

        match discarded {
            Some(entry) => {
                if let Err(e) = factory.close(entry.resource).await {
                    warn!(pool = %self.name, "Failed to close discarded resource: {e:#}");
                }
            }
            None => self.available.notify_one(),
        }

        result
    }

    /// Write off checkout `id` whose instance was dropped without a release.
    ///
    /// The instance is gone and cannot be closed; only its slot comes back.
    pub fn forget(&self, id: u64) -> bool {
        {
            let mut state = self.state.lock();
            if !state.checked_out.remove(&id) {
                return false;
            }
            state.total_released += 1;
            state.total_destroyed += 1;
            state.total_lost += 1;
        }

        warn!(pool = %self.name, id, "Reclaimed slot of a resource dropped without release");
        self.available.notify_one();
        true
    }

    /// Change the pool ceiling. Idle instances beyond the new size are closed;
    /// checked-out instances are discarded on release while over capacity.
    pub async fn resize(&self, new_max: usize) -> Result<()> {
        if new_max == 0 {
            return Err(Error::configuration(format!(
                "{} pool max size must be greater than 0",
                self.name
            )));
        }

        let (factory, surplus, grew) = {
            let mut state = self.state.lock();
            let factory = match (&state.factory, state.initialized) {
                (Some(factory), true) => Arc::clone(factory),
                _ => return Err(self.not_initialized()),
            };

            let old_max = state.max_size;
            state.max_size = new_max;

            let keep = state.idle.len().min(new_max);
            let surplus: Vec<_> = state.idle.drain(keep..).collect();
            state.total_destroyed += surplus.len() as u64;

            info!(
                pool = %self.name,
                old_max,
                new_max,
                closed = surplus.len(),
                "Resized resource pool"
            );
            (factory, surplus, new_max > old_max)
        };

        if grew {
            self.available.notify_waiters();
        }

        for entry in surplus {
            if let Err(e) = factory.close(entry.resource).await {
                warn!(pool = %self.name, "Failed to close surplus resource: {e:#}");
            }
        }

        Ok(())
    }

    /// Probe every idle instance; failures are closed and counted.
    ///
    /// Returns an error only when `require_all` is set and a probe failed.
    pub async fn health_check(&self, timeout: Duration, require_all: bool) -> Result<HealthReport> {
        let (factory, count) = {
            let state = self.state.lock();
            match (&state.factory, state.initialized) {
                (Some(factory), true) => (Arc::clone(factory), state.idle.len()),
                _ => return Err(self.not_initialized()),
            }
        };

        let mut report = HealthReport {
            pool: self.name.clone(),
            ..Default::default()
        };

        for _ in 0..count {
            let Some(reservation) = Reservation::take_idle(self) else {
                break;
            };
            report.checked += 1;

            let outcome = match reservation.resource() {
                Some(resource) => {
                    match tokio::time::timeout(timeout, factory.probe(resource)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(format!("{e:#}")),
                        Err(_) => Err(format!("probe timed out after {}ms", timeout.as_millis())),
                    }
                }
                None => Ok(()),
            };

            match outcome {
                Ok(()) => {
                    report.healthy += 1;
                    if let Some(entry) = reservation.restore() {
                        if let Err(e) = factory.close(entry.resource).await {
                            warn!(pool = %self.name, "Failed to close resource: {e:#}");
                        }
                    }
                }
                Err(reason) => {
                    warn!(pool = %self.name, "Discarding unhealthy resource: {reason}");
                    report.failed += 1;
                    report.errors.push(reason);
                    if let Some(entry) = reservation.discard() {
                        if let Err(e) = factory.close(entry.resource).await {
                            warn!(pool = %self.name, "Failed to close unhealthy resource: {e:#}");
                        }
                    }
                }
            }
        }

        debug!(
            pool = %self.name,
            checked = report.checked,
            failed = report.failed,
            "Health check finished"
        );

        if require_all && report.failed > 0 {
            return Err(Error::Unhealthy {
                pool: self.name.clone(),
                failed: report.failed,
            });
        }
        Ok(report)
    }

    /// Close every idle instance and refuse further use. Idempotent.
    pub async fn cleanup(&self) -> Result<()> {
        let (factory, idle) = {
            let mut state = self.state.lock();
            if !state.initialized && state.idle.is_empty() {
                return Ok(());
            }
            state.initialized = false;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total_destroyed += idle.len() as u64;
            (state.factory.clone(), idle)
        };

        // Waiters re-check state and fail with NotInitialized
        self.available.notify_waiters();

        let mut errors = Vec::new();
        if let Some(factory) = factory {
            for entry in idle {
                if let Err(source) = factory.close(entry.resource).await {
                    errors.push(Error::ResourceClose {
                        pool: self.name.clone(),
                        source,
                    });
                }
            }
        }

        info!(pool = %self.name, "Cleaned up resource pool");
        Error::into_result(errors)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            initialized: state.initialized,
            max_size: state.max_size,
            available: state.idle.len(),
            in_use: state.checked_out.len(),
            pending: state.pending,
            total_created: state.total_created,
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            total_errors: state.total_errors,
            total_destroyed: state.total_destroyed,
            total_lost: state.total_lost,
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A pending slot: either a creation in flight or an idle entry being probed.
///
/// Dropping an unfinished reservation gives the slot back, returning the
/// entry to the idle list when there is room for it.
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a ResourcePool<F>,
    entry: Option<Entry<F::Resource>>,
    active: bool,
}

impl<'a, F: ResourceFactory> Reservation<'a, F> {
    /// Wrap a slot already counted in `pending`
    fn reserved(pool: &'a ResourcePool<F>) -> Self {
        Self {
            pool,
            entry: None,
            active: true,
        }
    }

    fn take_idle(pool: &'a ResourcePool<F>) -> Option<Self> {
        let mut state = pool.state.lock();
        if !state.initialized {
            return None;
        }
        let entry = state.idle.pop_front()?;
        state.pending += 1;
        Some(Self {
            pool,
            entry: Some(entry),
            active: true,
        })
    }

    fn resource(&self) -> Option<&F::Resource> {
        self.entry.as_ref().map(|e| &e.resource)
    }

    /// Turn a creation slot into a checked-out instance. Gives the resource
    /// back if the pool was cleaned up in the meantime.
    fn commit(mut self, resource: F::Resource) -> std::result::Result<Pooled<F::Resource>, F::Resource> {
        self.active = false;
        let mut state = self.pool.state.lock();
        state.pending -= 1;
        state.total_created += 1;

        if !state.initialized {
            state.total_destroyed += 1;
            return Err(resource);
        }

        let id = state.next_entry_id;
        state.next_entry_id += 1;
        state.checked_out.insert(id);
        state.total_acquired += 1;
        Ok(Entry::new(resource, id).checkout(self.pool.id))
    }

    fn fail(self) {
        self.pool.state.lock().total_errors += 1;
    }

    /// Put a probed entry back; returns it when there is no room
    fn restore(mut self) -> Option<Entry<F::Resource>> {
        self.active = false;
        let entry = self.entry.take()?;
        let mut state = self.pool.state.lock();
        state.pending -= 1;
        if state.initialized && state.live() < state.max_size {
            state.idle.push_back(entry);
            drop(state);
            self.pool.available.notify_one();
            None
        } else {
            state.total_destroyed += 1;
            Some(entry)
        }
    }

    /// Remove a probed entry from the pool for closing
    fn discard(mut self) -> Option<Entry<F::Resource>> {
        self.active = false;
        let entry = self.entry.take();
        {
            let mut state = self.pool.state.lock();
            state.pending -= 1;
            state.total_errors += 1;
            state.total_destroyed += 1;
        }
        self.pool.available.notify_one();
        entry
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let mut state = self.pool.state.lock();
        state.pending -= 1;
        if let Some(entry) = self.entry.take() {
            if state.initialized && state.live() < state.max_size {
                state.idle.push_back(entry);
            } else {
                state.total_destroyed += 1;
            }
        }
        drop(state);
        self.pool.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFactory;
    use std::sync::atomic::Ordering;
    use std::time::Instant as StdInstant;

    fn pool(max_size: usize) -> (ResourcePool<MockFactory>, MockFactory) {
        let factory = MockFactory::new();
        let pool = ResourcePool::new("mock");
        pool.initialize(max_size, Duration::from_secs(5), factory.clone())
            .unwrap();
        (pool, factory)
    }

    #[tokio::test]
    async fn test_initialize_validation() {
        let pool = ResourcePool::new("mock");
        let err = pool
            .initialize(0, Duration::from_secs(1), MockFactory::new())
            .unwrap_err();
        assert!(err.is_configuration());

        let err = pool
            .initialize(2, Duration::from_secs(1), MockFactory::invalid())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(!pool.is_initialized());

        pool.initialize(2, Duration::from_secs(1), MockFactory::new())
            .unwrap();
        // Second call is a no-op, even with a different size
        pool.initialize(9, Duration::from_secs(1), MockFactory::new())
            .unwrap();
        assert_eq!(pool.stats().max_size, 2);
    }

    #[tokio::test]
    async fn test_acquire_uninitialized() {
        let pool: ResourcePool<MockFactory> = ResourcePool::new("mock");
        let err = pool.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_reuse_with_capacity_one() {
        let (pool, factory) = pool(1);
        let cancel = CancellationToken::new();

        let first = pool.acquire(&cancel).await.unwrap();
        let first_serial = first.serial;
        pool.release(first).await.unwrap();

        let second = pool.acquire(&cancel).await.unwrap();
        assert_eq!(second.serial, first_serial);
        assert_eq!(second.usage_count(), 2);

        let stats = pool.stats();
        assert_eq!(stats.total_created, 1);
        assert_eq!(stats.total_acquired, 2);
        assert_eq!(stats.in_use, 1);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_reuse_resets_session_state() {
        let (pool, _) = pool(1);
        let cancel = CancellationToken::new();

        let mut resource = pool.acquire(&cancel).await.unwrap();
        resource.session = Some("token-123".to_string());
        pool.release(resource).await.unwrap();

        let resource = pool.acquire(&cancel).await.unwrap();
        assert!(resource.session.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (pool, _) = pool(2);
        let cancel = CancellationToken::new();

        let _a = pool.acquire(&cancel).await.unwrap();
        let _b = pool.acquire(&cancel).await.unwrap();

        let start = StdInstant::now();
        let err = pool
            .acquire_timeout(Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, Error::ResourceTimeout { .. }));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(600));

        let stats = pool.stats();
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_blocked_acquire_gets_released_instance() {
        let (pool, _) = pool(1);
        let pool = Arc::new(pool);
        let cancel = CancellationToken::new();

        let held = pool.acquire(&cancel).await.unwrap();
        let held_serial = held.serial;

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(2), &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().total_created, 1);
        pool.release(held).await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        assert_eq!(acquired.serial, held_serial);
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_forget_frees_slot_of_dropped_instance() {
        let (pool, factory) = pool(1);
        let pool = Arc::new(pool);
        let cancel = CancellationToken::new();

        let dropped = pool.acquire(&cancel).await.unwrap();
        let id = dropped.id();
        drop(dropped);

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(2), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(pool.forget(id));
        assert!(!pool.forget(id));

        let fresh = waiter.await.unwrap().unwrap();
        assert_eq!(fresh.serial, 2);
        assert_eq!(factory.closed(), 0);

        let stats = pool.stats();
        assert_eq!(stats.total_lost, 1);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.total_acquired - stats.total_released, stats.in_use as u64);
        assert_eq!(
            (stats.available + stats.in_use) as u64,
            stats.total_created - stats.total_destroyed
        );
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let (pool, _) = pool(1);
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let trigger = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = pool
            .acquire_timeout(Duration::from_secs(5), &waiter_cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert!(err.is_timeout());
        assert_eq!(pool.stats().in_use, 1);
    }

    #[tokio::test]
    async fn test_resize_shrink_and_grow() {
        let (pool, _) = pool(5);
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        pool.release(a).await.unwrap();
        pool.release(b).await.unwrap();
        assert_eq!(pool.stats().available, 2);

        pool.resize(2).await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.max_size, 2);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.total_destroyed, 0);

        pool.resize(5).await.unwrap();
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire(&cancel).await.unwrap());
        }
        let stats = pool.stats();
        assert_eq!(stats.total_created, 5);
        assert_eq!(stats.in_use, 5);

        assert!(pool.resize(0).await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn test_shrink_discards_on_release() {
        let (pool, factory) = pool(3);
        let cancel = CancellationToken::new();

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.acquire(&cancel).await.unwrap());
        }
        pool.resize(1).await.unwrap();

        for resource in held {
            pool.release(resource).await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.total_destroyed, 2);
        assert_eq!(factory.closed(), 2);
        assert_eq!(
            stats.available + stats.in_use,
            (stats.total_created - stats.total_destroyed) as usize
        );
    }

    #[tokio::test]
    async fn test_foreign_release_rejected() {
        let (pool_a, _) = pool(1);
        let (pool_b, _) = pool(1);
        let cancel = CancellationToken::new();

        let from_a = pool_a.acquire(&cancel).await.unwrap();
        let err = pool_b.release(from_a).await.unwrap_err();
        assert!(matches!(err, Error::ResourceRelease { .. }));

        let b = pool_b.stats();
        assert_eq!(b.in_use, 0);
        assert_eq!(b.available, 0);
        assert_eq!(b.total_released, 0);
        assert_eq!(pool_a.stats().in_use, 1);
    }

    #[tokio::test]
    async fn test_cleanup_lifecycle() {
        let (pool, factory) = pool(2);
        let cancel = CancellationToken::new();

        let idle = pool.acquire(&cancel).await.unwrap();
        let held = pool.acquire(&cancel).await.unwrap();
        pool.release(idle).await.unwrap();

        pool.cleanup().await.unwrap();
        pool.cleanup().await.unwrap();
        assert!(!pool.is_initialized());
        assert_eq!(factory.closed(), 1);

        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));

        // The straggler is closed and accounted for, but reported
        let err = pool.release(held).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
        assert_eq!(factory.closed(), 2);
        assert_eq!(pool.stats().in_use, 0);

        let never: ResourcePool<MockFactory> = ResourcePool::new("never");
        never.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_wakes_waiters() {
        let (pool, _) = pool(1);
        let pool = Arc::new(pool);
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire_timeout(Duration::from_secs(5), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.cleanup().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_creation_failure_frees_slot() {
        let (pool, factory) = pool(1);
        let cancel = CancellationToken::new();

        factory.fail_next_create();
        let err = pool.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::ResourceCreation { .. }));

        let stats = pool.stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_created, 0);

        assert!(pool.acquire(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_discards_failures() {
        let (pool, factory) = pool(3);
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        a.healthy.store(false, Ordering::SeqCst);
        pool.release(a).await.unwrap();
        pool.release(b).await.unwrap();

        let report = pool
            .health_check(Duration::from_secs(1), false)
            .await
            .unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_healthy());

        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(factory.closed(), 1);

        let report = pool.health_check(Duration::from_secs(1), true).await.unwrap();
        assert!(report.is_healthy());
    }

    #[tokio::test]
    async fn test_health_check_require_all() {
        let (pool, _) = pool(1);
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        a.healthy.store(false, Ordering::SeqCst);
        pool.release(a).await.unwrap();

        let err = pool
            .health_check(Duration::from_secs(1), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unhealthy { failed: 1, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_release_respects_bound() {
        let (pool, factory) = pool(3);
        let pool = Arc::new(pool);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let resource = pool
                    .acquire_timeout(Duration::from_secs(5), &cancel)
                    .await
                    .unwrap();
                assert!(pool.stats().live() <= 3);
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(resource).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.total_created <= 3);
        assert_eq!(factory.created(), stats.total_created);
        assert_eq!(stats.total_acquired, 20);
        assert_eq!(stats.total_acquired - stats.total_released, stats.in_use as u64);
        assert_eq!(stats.in_use, 0);
        assert_eq!(
            stats.available as u64,
            stats.total_created - stats.total_destroyed
        );
    }
}
