//! Resource manager
//!
//! Owns the browser pool, the HTTP pool and one database pool per connection
//! name, and turns a test's declared needs into one [`ResourceHandle`].

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::browser::{BrowserFactory, BrowserLauncher, BrowserPool};
use super::database::{DatabaseConfig, DatabaseDriver, DatabaseFactory, DatabasePool};
use super::handle::{LostCheckouts, ResourceHandle};
use super::http::{HttpClientFactory, HttpPool};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::models::{ResourceNeeds, Test};
use crate::pool::{HealthReport, PoolStats};

/// Collaborator-supplied resource constructors
#[derive(Clone, Default)]
pub struct ResourceFactories {
    browser: Option<Arc<dyn BrowserLauncher>>,
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl ResourceFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_browser(mut self, launcher: impl BrowserLauncher + 'static) -> Self {
        self.browser = Some(Arc::new(launcher));
        self
    }

    /// Register a database driver under its own name
    pub fn with_driver(mut self, driver: impl DatabaseDriver + 'static) -> Self {
        let name = driver.name().to_string();
        self.drivers.insert(name, Arc::new(driver));
        self
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }
}

/// Composite statistics across every owned pool
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManagerStats {
    pub initialized: bool,
    pub browser: PoolStats,
    pub http: PoolStats,
    pub databases: BTreeMap<String, PoolStats>,
}

/// Decide which resources a test needs from its declared capabilities
pub fn classify(test: &dyn Test) -> ResourceNeeds {
    let mut needs = test.resource_needs();
    needs.databases.retain(|name| !name.trim().is_empty());
    needs
}

/// Allocates and reclaims resources for test executions
pub struct ResourceManager {
    config: RunnerConfig,
    factories: ResourceFactories,
    initialized: Mutex<bool>,
    browser_pool: BrowserPool,
    http_pool: HttpPool,
    database_pools: RwLock<HashMap<String, Arc<DatabasePool>>>,
    /// Pools removed by cleanup while connections were still checked out
    retired_pools: Mutex<Vec<Arc<DatabasePool>>>,
    lost: LostCheckouts,
}

impl ResourceManager {
    pub fn new(config: RunnerConfig, factories: ResourceFactories) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factories,
            initialized: Mutex::new(false),
            browser_pool: BrowserPool::new("browser"),
            http_pool: HttpPool::new("http"),
            database_pools: RwLock::new(HashMap::new()),
            retired_pools: Mutex::new(Vec::new()),
            lost: LostCheckouts::default(),
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Create the browser and HTTP pools. Database pools are created on
    /// first use. Calling this again is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut initialized = self.initialized.lock();
        if *initialized {
            debug!("Resource manager already initialized");
            return Ok(());
        }

        self.http_pool.initialize(
            self.config.http_client_pool_size,
            self.config.resource_timeout,
            HttpClientFactory::new(self.config.http.clone()),
        )?;

        if let Some(launcher) = &self.factories.browser {
            self.browser_pool.initialize(
                self.config.browser_pool_size,
                self.config.resource_timeout,
                BrowserFactory::new(Arc::clone(launcher), self.config.browser.clone()),
            )?;
        }

        *initialized = true;
        info!(
            browser = self.factories.has_browser(),
            http_pool = self.config.http_client_pool_size,
            databases = self.config.databases.len(),
            "Resource manager initialized"
        );
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized("resource manager".to_string()))
        }
    }

    /// Create the pool for a named connection. An existing name is kept as is.
    pub fn initialize_database_pool(
        &self,
        name: &str,
        config: DatabaseConfig,
    ) -> Result<Arc<DatabasePool>> {
        self.ensure_initialized()?;

        if let Some(pool) = self.database_pools.read().get(name) {
            return Ok(Arc::clone(pool));
        }

        let driver = self.factories.drivers.get(&config.driver).ok_or_else(|| {
            Error::configuration(format!(
                "No database driver registered for '{}' (connection '{name}')",
                config.driver
            ))
        })?;
        let pool_size = config.pool_size.unwrap_or(self.config.database_pool_size);

        let mut pools = self.database_pools.write();
        if let Some(pool) = pools.get(name) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(DatabasePool::new(format!("database:{name}")));
        pool.initialize(
            pool_size,
            self.config.resource_timeout,
            DatabaseFactory::new(name, config, Arc::clone(driver)),
        )?;
        pools.insert(name.to_string(), Arc::clone(&pool));

        info!(connection = name, pool_size, "Database pool created");
        Ok(pool)
    }

    /// Existing pool for `name`, created from configuration on first use
    fn database_pool(&self, name: &str) -> Result<Arc<DatabasePool>> {
        if let Some(pool) = self.database_pools.read().get(name) {
            return Ok(Arc::clone(pool));
        }
        let config = self.config.databases.get(name).cloned().ok_or_else(|| {
            Error::configuration(format!("Unknown database connection: {name}"))
        })?;
        self.initialize_database_pool(name, config)
    }

    /// Pool that issued checkout `pool_id`, live or retired
    fn owning_database_pool(&self, name: &str, pool_id: u64) -> Option<Arc<DatabasePool>> {
        let live = self.database_pools.read().get(name).cloned();
        live.filter(|pool| pool.id() == pool_id).or_else(|| {
            self.retired_pools
                .lock()
                .iter()
                .find(|pool| pool.id() == pool_id)
                .cloned()
        })
    }

    /// Free the slots of checkouts whose handles were dropped unreleased
    fn reclaim_lost(&self) {
        for (pool_id, id) in self.lost.take() {
            let reclaimed = if pool_id == self.browser_pool.id() {
                self.browser_pool.forget(id)
            } else if pool_id == self.http_pool.id() {
                self.http_pool.forget(id)
            } else {
                let live: Vec<_> = self.database_pools.read().values().cloned().collect();
                let retired: Vec<_> = self.retired_pools.lock().clone();
                live.iter()
                    .chain(&retired)
                    .find(|pool| pool.id() == pool_id)
                    .is_some_and(|pool| pool.forget(id))
            };
            if !reclaimed {
                debug!(pool_id, id, "Lost checkout already settled");
            }
        }
    }

    /// Acquire everything `test` needs. Nothing stays checked out on failure.
    pub async fn acquire_resources(
        &self,
        test: &dyn Test,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle> {
        self.ensure_initialized()?;
        self.reclaim_lost();

        let needs = classify(test);
        let mut handle = ResourceHandle::new(test.name(), self.lost.clone());
        if needs.is_empty() {
            return Ok(handle);
        }

        if let Err(err) = self.fill(&mut handle, &needs, cancel).await {
            warn!(test = %test.name(), "Resource acquisition failed: {err}");
            return Err(match self.release_resources(handle).await {
                Ok(()) => err,
                Err(release_err) => Error::Multiple(vec![err, release_err]),
            });
        }

        debug!(test = %test.name(), held = handle.len(), "Resources acquired");
        Ok(handle)
    }

    async fn fill(
        &self,
        handle: &mut ResourceHandle,
        needs: &ResourceNeeds,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if needs.browser {
            if !self.browser_pool.is_initialized() {
                return Err(Error::configuration(
                    "Test needs a browser but no browser launcher is registered",
                ));
            }
            handle.browser = Some(self.browser_pool.acquire(cancel).await?);
        }

        if needs.http_client {
            handle.http = Some(self.http_pool.acquire(cancel).await?);
        }

        for name in &needs.databases {
            let pool = self.database_pool(name)?;
            let connection = pool.acquire(cancel).await?;
            handle.databases.insert(name.clone(), connection);
        }

        Ok(())
    }

    /// Return every resource in `handle` to its pool, attempting all of them
    pub async fn release_resources(&self, mut handle: ResourceHandle) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(browser) = handle.browser.take() {
            if let Err(e) = self.browser_pool.release(browser).await {
                errors.push(e);
            }
        }

        if let Some(http) = handle.http.take() {
            if let Err(e) = self.http_pool.release(http).await {
                errors.push(e);
            }
        }

        for (name, connection) in std::mem::take(&mut handle.databases) {
            match self.owning_database_pool(&name, connection.pool_id()) {
                Some(pool) => {
                    if let Err(e) = pool.release(connection).await {
                        errors.push(e);
                    }
                }
                None => errors.push(Error::ResourceRelease {
                    pool: format!("database:{name}"),
                    reason: "no pool exists for this connection".to_string(),
                }),
            }
        }

        if !errors.is_empty() {
            warn!(
                test = %handle.test_name(),
                failures = errors.len(),
                "Resource release reported errors"
            );
        }
        Error::into_result(errors)
    }

    /// Probe idle instances in every live pool
    pub async fn health_check(&self, timeout: Duration) -> Vec<HealthReport> {
        let mut reports = Vec::new();

        if self.browser_pool.is_initialized() {
            reports.extend(self.browser_pool.health_check(timeout, false).await.ok());
        }
        if self.http_pool.is_initialized() {
            reports.extend(self.http_pool.health_check(timeout, false).await.ok());
        }

        let pools: Vec<_> = self.database_pools.read().values().cloned().collect();
        for pool in pools {
            reports.extend(pool.health_check(timeout, false).await.ok());
        }

        reports
    }

    /// Tear down every pool. Safe to call when never initialized.
    pub async fn cleanup(&self) -> Result<()> {
        *self.initialized.lock() = false;

        let mut errors = Vec::new();
        if let Err(e) = self.browser_pool.cleanup().await {
            errors.push(e);
        }
        if let Err(e) = self.http_pool.cleanup().await {
            errors.push(e);
        }

        // Retired pools stay reachable so late releases still close their
        // connections
        let pools: Vec<_> = {
            let pools: Vec<_> = self
                .database_pools
                .write()
                .drain()
                .map(|(_, pool)| pool)
                .collect();
            let mut retired = self.retired_pools.lock();
            retired.retain(|pool| pool.stats().in_use > 0);
            retired.extend(pools.iter().cloned());
            pools
        };
        for pool in pools {
            if let Err(e) = pool.cleanup().await {
                errors.push(e);
            }
        }

        info!(errors = errors.len(), "Resource manager cleaned up");
        Error::into_result(errors)
    }

    pub fn stats(&self) -> ManagerStats {
        self.reclaim_lost();
        let databases = self
            .database_pools
            .read()
            .iter()
            .map(|(name, pool)| (name.clone(), pool.stats()))
            .collect();

        ManagerStats {
            initialized: self.is_initialized(),
            browser: self.browser_pool.stats(),
            http: self.http_pool.stats(),
            databases,
        }
    }
}
