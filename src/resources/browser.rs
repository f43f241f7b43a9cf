//! Browser session pooling
//!
//! The browser driver itself is supplied by a UI-testing collaborator through
//! [`BrowserLauncher`]; this module only adapts it to the pool contract.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pool::{ResourceFactory, ResourcePool};

/// Browser launch configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser engine (chromium, firefox, webkit)
    pub browser: String,

    /// Run without a visible window
    pub headless: bool,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Extra command-line arguments for the browser process
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: "chromium".to_string(),
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    pub fn validate(&self) -> Result<()> {
        if self.browser.trim().is_empty() {
            bail!("browser engine must not be empty");
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            bail!(
                "viewport must be non-zero, got {}x{}",
                self.viewport_width,
                self.viewport_height
            );
        }
        Ok(())
    }
}

/// A live browser with one page
#[async_trait]
pub trait BrowserSession: Send + Sync {
    fn id(&self) -> String;

    /// Drop cookies, storage and navigation state between tests
    fn reset(&mut self);

    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<Option<String>>;

    async fn ping(&self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn BrowserSession>>;
}

/// Pool factory backed by a [`BrowserLauncher`]
pub struct BrowserFactory {
    launcher: Arc<dyn BrowserLauncher>,
    config: BrowserConfig,
}

impl BrowserFactory {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: BrowserConfig) -> Self {
        Self { launcher, config }
    }
}

#[async_trait]
impl ResourceFactory for BrowserFactory {
    type Resource = Box<dyn BrowserSession>;

    fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    async fn create(&self) -> Result<Self::Resource> {
        self.launcher.launch(&self.config).await
    }

    fn reset(&self, session: &mut Self::Resource) {
        session.reset();
    }

    async fn probe(&self, session: &Self::Resource) -> Result<()> {
        session.ping().await
    }

    async fn close(&self, session: Self::Resource) -> Result<()> {
        session.close().await
    }
}

pub type BrowserPool = ResourcePool<BrowserFactory>;
