//! Named database connection pooling
//!
//! One pool exists per connection name. The SQL driver is supplied by a
//! collaborator through [`DatabaseDriver`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pool::{ResourceFactory, ResourcePool};

/// Connection settings for one named database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Registered driver name (postgres, mysql, sqlite, ...)
    pub driver: String,

    /// Driver-specific data source name
    pub dsn: String,

    /// Overrides the runner-wide database pool size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
}

impl DatabaseConfig {
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
            pool_size: None,
        }
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            bail!("database driver must not be empty");
        }
        if self.dsn.trim().is_empty() {
            bail!("database dsn must not be empty");
        }
        if self.pool_size == Some(0) {
            bail!("database pool size must be greater than 0");
        }
        Ok(())
    }
}

/// An open database connection
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Run a statement, returning the number of affected rows
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Run a query, returning rows as JSON objects
    async fn query(&self, statement: &str) -> Result<Vec<serde_json::Value>>;

    async fn ping(&self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections for one driver name
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, dsn: &str) -> Result<Box<dyn DatabaseConnection>>;
}

/// Pool factory for one named connection
pub struct DatabaseFactory {
    connection: String,
    config: DatabaseConfig,
    driver: Arc<dyn DatabaseDriver>,
}

impl DatabaseFactory {
    pub fn new(
        connection: impl Into<String>,
        config: DatabaseConfig,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Self {
        Self {
            connection: connection.into(),
            config,
            driver,
        }
    }
}

#[async_trait]
impl ResourceFactory for DatabaseFactory {
    type Resource = Box<dyn DatabaseConnection>;

    fn validate(&self) -> Result<()> {
        self.config
            .validate()
            .with_context(|| format!("database connection '{}'", self.connection))
    }

    async fn create(&self) -> Result<Self::Resource> {
        self.driver
            .connect(&self.config.dsn)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect '{}' via {} driver",
                    self.connection,
                    self.driver.name()
                )
            })
    }

    async fn probe(&self, connection: &Self::Resource) -> Result<()> {
        connection.ping().await
    }

    async fn close(&self, connection: Self::Resource) -> Result<()> {
        connection.close().await
    }
}

pub type DatabasePool = ResourcePool<DatabaseFactory>;
