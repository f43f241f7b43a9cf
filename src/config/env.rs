//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::time::Duration;

use super::RunnerConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTPOOL";

/// Overrides read from `TESTPOOL_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// TESTPOOL_MAX_CONCURRENCY
    pub max_concurrency: Option<usize>,
    /// TESTPOOL_RESOURCE_TIMEOUT_MS
    pub resource_timeout_ms: Option<u64>,
    /// TESTPOOL_BROWSER_POOL_SIZE
    pub browser_pool_size: Option<usize>,
    /// TESTPOOL_DATABASE_POOL_SIZE
    pub database_pool_size: Option<usize>,
    /// TESTPOOL_HTTP_POOL_SIZE
    pub http_pool_size: Option<usize>,
    /// TESTPOOL_GRACEFUL_SHUTDOWN_MS
    pub graceful_shutdown_ms: Option<u64>,
    /// TESTPOOL_CONFIG
    pub config_file: Option<String>,
    /// TESTPOOL_LOG_LEVEL
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            max_concurrency: get_env_parse("MAX_CONCURRENCY"),
            resource_timeout_ms: get_env_parse("RESOURCE_TIMEOUT_MS"),
            browser_pool_size: get_env_parse("BROWSER_POOL_SIZE"),
            database_pool_size: get_env_parse("DATABASE_POOL_SIZE"),
            http_pool_size: get_env_parse("HTTP_POOL_SIZE"),
            graceful_shutdown_ms: get_env_parse("GRACEFUL_SHUTDOWN_MS"),
            config_file: get_env("CONFIG"),
            log_level: get_env("LOG_LEVEL"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.max_concurrency.is_some()
            || self.resource_timeout_ms.is_some()
            || self.browser_pool_size.is_some()
            || self.database_pool_size.is_some()
            || self.http_pool_size.is_some()
            || self.graceful_shutdown_ms.is_some()
            || self.config_file.is_some()
            || self.log_level.is_some()
    }

    /// Overwrite the fields that are set in the environment
    pub fn apply_to(&self, config: &mut RunnerConfig) {
        if let Some(max) = self.max_concurrency {
            config.max_concurrency = max;
        }
        if let Some(ms) = self.resource_timeout_ms {
            config.resource_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = self.browser_pool_size {
            config.browser_pool_size = size;
        }
        if let Some(size) = self.database_pool_size {
            config.database_pool_size = size;
        }
        if let Some(size) = self.http_pool_size {
            config.http_client_pool_size = size;
        }
        if let Some(ms) = self.graceful_shutdown_ms {
            config.graceful_shutdown = Duration::from_millis(ms);
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_MAX_CONCURRENCY:      {:?}", self.max_concurrency);
        println!("  {ENV_PREFIX}_RESOURCE_TIMEOUT_MS:  {:?}", self.resource_timeout_ms);
        println!("  {ENV_PREFIX}_BROWSER_POOL_SIZE:    {:?}", self.browser_pool_size);
        println!("  {ENV_PREFIX}_DATABASE_POOL_SIZE:   {:?}", self.database_pool_size);
        println!("  {ENV_PREFIX}_HTTP_POOL_SIZE:       {:?}", self.http_pool_size);
        println!("  {ENV_PREFIX}_GRACEFUL_SHUTDOWN_MS: {:?}", self.graceful_shutdown_ms);
        println!("  {ENV_PREFIX}_CONFIG:               {:?}", self.config_file);
        println!("  {ENV_PREFIX}_LOG_LEVEL:            {:?}", self.log_level);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Builder for setting environment variables (useful for testing)
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn var(mut self, name: &str, value: impl ToString) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.to_string()));
        self
    }

    pub fn max_concurrency(self, max: usize) -> Self {
        self.var("MAX_CONCURRENCY", max)
    }

    pub fn resource_timeout_ms(self, ms: u64) -> Self {
        self.var("RESOURCE_TIMEOUT_MS", ms)
    }

    pub fn http_pool_size(self, size: usize) -> Self {
        self.var("HTTP_POOL_SIZE", size)
    }

    pub fn graceful_shutdown_ms(self, ms: u64) -> Self {
        self.var("GRACEFUL_SHUTDOWN_MS", ms)
    }

    pub fn config_file(self, path: impl Into<String>) -> Self {
        self.var("CONFIG", path.into())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTPOOL environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_MAX_CONCURRENCY       Maximum tests running at once");
    println!("  {ENV_PREFIX}_RESOURCE_TIMEOUT_MS   Resource acquisition deadline in milliseconds");
    println!("  {ENV_PREFIX}_BROWSER_POOL_SIZE     Browser pool size");
    println!("  {ENV_PREFIX}_DATABASE_POOL_SIZE    Default size of each database pool");
    println!("  {ENV_PREFIX}_HTTP_POOL_SIZE        HTTP client pool size");
    println!("  {ENV_PREFIX}_GRACEFUL_SHUTDOWN_MS  Shutdown deadline in milliseconds");
    println!("  {ENV_PREFIX}_CONFIG                Path to configuration file");
    println!("  {ENV_PREFIX}_LOG_LEVEL             Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_MAX_CONCURRENCY=8");
    println!("  testpool run --url http://localhost:8080/health");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());

        let mut runner = RunnerConfig::default();
        config.apply_to(&mut runner);
        assert_eq!(runner, RunnerConfig::default());
    }

    // Single test touching the process environment so parallel tests cannot race
    #[test]
    fn test_env_builder_overrides() {
        let _guard = EnvBuilder::new()
            .max_concurrency(16)
            .resource_timeout_ms(250)
            .http_pool_size(3)
            .graceful_shutdown_ms(1000)
            .config_file("/tmp/testpool.yaml")
            .apply_scoped();

        let env_config = EnvConfig::load();
        assert!(env_config.has_any());
        assert_eq!(env_config.config_file.as_deref(), Some("/tmp/testpool.yaml"));

        let mut config = RunnerConfig::default();
        env_config.apply_to(&mut config);
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.resource_timeout, Duration::from_millis(250));
        assert_eq!(config.http_client_pool_size, 3);
        assert_eq!(config.graceful_shutdown, Duration::from_secs(1));
        assert_eq!(config.browser_pool_size, 2);
    }
}
