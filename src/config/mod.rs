//! Configuration module
//!
//! Runner settings, loaded from a file and overridden from the environment.

pub mod env;
mod file;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::resources::{BrowserConfig, DatabaseConfig, HttpClientConfig};

pub use file::CONFIG_LOCATIONS;

/// Settings for one parallel run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Name recorded on the aggregate results
    pub suite_name: String,

    /// Maximum tests executing at once
    pub max_concurrency: usize,

    /// Deadline for each resource acquisition
    #[serde(rename = "resource_timeout_ms", with = "duration_ms")]
    pub resource_timeout: Duration,

    pub browser_pool_size: usize,

    /// Default size for every database pool
    pub database_pool_size: usize,

    pub http_client_pool_size: usize,

    /// How long shutdown waits for in-flight tests
    #[serde(rename = "graceful_shutdown_ms", with = "duration_ms")]
    pub graceful_shutdown: Duration,

    pub browser: BrowserConfig,

    pub http: HttpClientConfig,

    /// Named database connections
    pub databases: BTreeMap<String, DatabaseConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            suite_name: "testpool".to_string(),
            max_concurrency: 4,
            resource_timeout: Duration::from_secs(30),
            browser_pool_size: 2,
            database_pool_size: 5,
            http_client_pool_size: 10,
            graceful_shutdown: Duration::from_secs(30),
            browser: BrowserConfig::default(),
            http: HttpClientConfig::default(),
            databases: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn with_suite_name(mut self, name: impl Into<String>) -> Self {
        self.suite_name = name.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_resource_timeout(mut self, timeout: Duration) -> Self {
        self.resource_timeout = timeout;
        self
    }

    pub fn with_browser_pool_size(mut self, size: usize) -> Self {
        self.browser_pool_size = size;
        self
    }

    pub fn with_database_pool_size(mut self, size: usize) -> Self {
        self.database_pool_size = size;
        self
    }

    pub fn with_http_client_pool_size(mut self, size: usize) -> Self {
        self.http_client_pool_size = size;
        self
    }

    pub fn with_graceful_shutdown(mut self, deadline: Duration) -> Self {
        self.graceful_shutdown = deadline;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_database(mut self, name: impl Into<String>, config: DatabaseConfig) -> Self {
        self.databases.insert(name.into(), config);
        self
    }

    /// Reject zero sizes and durations and invalid nested settings
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_concurrency", self.max_concurrency),
            ("browser_pool_size", self.browser_pool_size),
            ("database_pool_size", self.database_pool_size),
            ("http_client_pool_size", self.http_client_pool_size),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::configuration(format!("{field} must be greater than 0")));
        }
        if self.resource_timeout.is_zero() {
            return Err(Error::configuration("resource_timeout must be greater than 0"));
        }
        if self.graceful_shutdown.is_zero() {
            return Err(Error::configuration("graceful_shutdown must be greater than 0"));
        }

        self.browser
            .validate()
            .map_err(|e| Error::configuration(format!("browser: {e}")))?;
        self.http
            .validate()
            .map_err(|e| Error::configuration(format!("http: {e}")))?;
        for (name, database) in &self.databases {
            if name.trim().is_empty() {
                return Err(Error::configuration("database connection name must not be empty"));
            }
            database
                .validate()
                .map_err(|e| Error::configuration(format!("database '{name}': {e}")))?;
        }
        Ok(())
    }

    /// A populated configuration suitable as a starting file
    pub fn example() -> Self {
        Self::default()
            .with_suite_name("smoke")
            .with_http(
                HttpClientConfig::default()
                    .with_base_url("http://localhost:8080")
                    .with_header("Accept", "application/json"),
            )
            .with_database(
                "orders",
                DatabaseConfig::new("postgres", "postgres://localhost:5432/orders"),
            )
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
