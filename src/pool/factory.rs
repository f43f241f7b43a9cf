//! Resource factory contract
//!
//! Protocol collaborators plug concrete resources into a
//! [`ResourcePool`](super::ResourcePool) by implementing [`ResourceFactory`].

use anyhow::Result;
use async_trait::async_trait;

/// Creates, resets, probes and tears down one kind of pooled resource
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// Reject unusable factory configuration before the pool goes live
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self) -> Result<Self::Resource>;

    /// Clear request-scoped state (auth headers, cookies) before the
    /// instance is handed to another test. Runs under the pool lock.
    fn reset(&self, _resource: &mut Self::Resource) {}

    /// Lightweight liveness check used by health checks
    async fn probe(&self, _resource: &Self::Resource) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _resource: Self::Resource) -> Result<()> {
        Ok(())
    }
}
