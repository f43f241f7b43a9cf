//! Error types for resource pooling and parallel execution
//!
//! Test failures are never errors: they are recorded as data in a
//! [`TestCaseResult`](crate::models::TestCaseResult). Only configuration,
//! acquisition and release problems surface here.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pool, manager and runner errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} is not initialized")]
    NotInitialized(String),

    #[error("Timed out after {}ms acquiring from {pool} pool", .timeout.as_millis())]
    ResourceTimeout { pool: String, timeout: Duration },

    #[error("Acquisition from {0} pool was cancelled")]
    Cancelled(String),

    #[error("Failed to create resource for {pool} pool: {source}")]
    ResourceCreation {
        pool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Release rejected by {pool} pool: {reason}")]
    ResourceRelease { pool: String, reason: String },

    #[error("Failed to close resource from {pool} pool: {source}")]
    ResourceClose {
        pool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{failed} unhealthy instance(s) in {pool} pool")]
    Unhealthy { pool: String, failed: usize },

    #[error("{}", MultipleErrors(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// True for deadline expiry and cancellation while waiting on a pool
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ResourceTimeout { .. } | Error::Cancelled(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::NotInitialized(_))
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is exactly one, `Multiple` otherwise.
    pub fn collect(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// Convert a collected list into a `Result`
    pub fn into_result(errors: Vec<Error>) -> Result<()> {
        match Self::collect(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct MultipleErrors<'a>(&'a [Error]);

impl fmt::Display for MultipleErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, " [{err}]")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
