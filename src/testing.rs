//! Mock factories, collaborators and scripted tests for unit tests

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ResourceNeeds, Test, TestCaseResult};
use crate::pool::ResourceFactory;
use crate::resources::{
    BrowserConfig, BrowserLauncher, BrowserSession, DatabaseConnection, DatabaseDriver,
    ResourceHandle,
};

/// Resource handed out by [`MockFactory`]
#[derive(Debug)]
pub struct MockResource {
    pub serial: u64,
    pub session: Option<String>,
    pub healthy: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockFactoryState {
    created: AtomicU64,
    closed: AtomicU64,
    fail_next: AtomicBool,
    invalid: bool,
}

/// Counting factory with switchable failures
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockFactoryState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalid() -> Self {
        Self {
            state: Arc::new(MockFactoryState {
                invalid: true,
                ..Default::default()
            }),
        }
    }

    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn fail_next_create(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceFactory for MockFactory {
    type Resource = MockResource;

    fn validate(&self) -> Result<()> {
        if self.state.invalid {
            bail!("mock factory has no configuration");
        }
        Ok(())
    }

    async fn create(&self) -> Result<MockResource> {
        if self.state.fail_next.swap(false, Ordering::SeqCst) {
            bail!("mock creation failure");
        }
        let serial = self.state.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockResource {
            serial,
            session: None,
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    fn reset(&self, resource: &mut MockResource) {
        resource.session = None;
    }

    async fn probe(&self, resource: &MockResource) -> Result<()> {
        if !resource.healthy.load(Ordering::SeqCst) {
            bail!("mock resource {} is unhealthy", resource.serial);
        }
        Ok(())
    }

    async fn close(&self, _resource: MockResource) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct LauncherState {
    launched: AtomicU64,
    closed: AtomicU64,
    fail: AtomicBool,
}

/// Browser launcher producing in-memory sessions
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<LauncherState>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> u64 {
        self.state.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, config: &BrowserConfig) -> Result<Box<dyn BrowserSession>> {
        if self.state.fail.load(Ordering::SeqCst) {
            bail!("failed to launch {}", config.browser);
        }
        let id = self.state.launched.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockBrowser {
            id,
            visited: Vec::new(),
            launcher: Arc::clone(&self.state),
        }))
    }
}

pub struct MockBrowser {
    id: u64,
    visited: Vec<String>,
    launcher: Arc<LauncherState>,
}

#[async_trait]
impl BrowserSession for MockBrowser {
    fn id(&self) -> String {
        format!("mock-browser-{}", self.id)
    }

    fn reset(&mut self) {
        self.visited.clear();
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.visited.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.visited.last().cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.launcher.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    connected: AtomicU64,
    closed: AtomicU64,
    close_delay: Duration,
}

/// Database driver named `mock`; the dsn `fail://` refuses connections
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<DriverState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections take `delay` to close
    pub fn slow_close(delay: Duration) -> Self {
        Self {
            state: Arc::new(DriverState {
                close_delay: delay,
                ..Default::default()
            }),
        }
    }

    pub fn connected(&self) -> u64 {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, dsn: &str) -> Result<Box<dyn DatabaseConnection>> {
        if dsn.starts_with("fail://") {
            bail!("connection refused: {dsn}");
        }
        self.state.connected.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            dsn: dsn.to_string(),
            driver: Arc::clone(&self.state),
        }))
    }
}

pub struct MockConnection {
    dsn: String,
    driver: Arc<DriverState>,
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&self, _statement: &str) -> Result<u64> {
        Ok(1)
    }

    async fn query(&self, statement: &str) -> Result<Vec<serde_json::Value>> {
        Ok(vec![serde_json::json!({ "dsn": self.dsn, "statement": statement })])
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        tokio::time::sleep(self.driver.close_delay).await;
        self.driver.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many test bodies run at once
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Error,
    Panic,
}

/// Test with a fixed outcome, duration and resource needs
pub struct ScriptedTest {
    name: String,
    needs: ResourceNeeds,
    outcome: Outcome,
    delay: Duration,
    probe: Option<ConcurrencyProbe>,
}

impl ScriptedTest {
    pub fn new(name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            needs: ResourceNeeds::none(),
            outcome,
            delay: Duration::ZERO,
            probe: None,
        }
    }

    pub fn passing(name: impl Into<String>) -> Self {
        Self::new(name, Outcome::Pass)
    }

    pub fn needs(mut self, needs: ResourceNeeds) -> Self {
        self.needs = needs;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probe(mut self, probe: &ConcurrencyProbe) -> Self {
        self.probe = Some(probe.clone());
        self
    }

    pub fn shared(self) -> Arc<dyn Test> {
        Arc::new(self)
    }

    fn missing_resource(&self, resources: &ResourceHandle) -> Option<String> {
        if self.needs.browser && resources.browser().is_none() {
            return Some("browser session".to_string());
        }
        if self.needs.http_client && resources.http().is_none() {
            return Some("HTTP client".to_string());
        }
        self.needs
            .databases
            .iter()
            .find(|name| resources.database(name).is_none())
            .map(|name| format!("database connection '{name}'"))
    }
}

#[async_trait]
impl Test for ScriptedTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_needs(&self) -> ResourceNeeds {
        self.needs.clone()
    }

    async fn execute(&self, resources: &mut ResourceHandle) -> TestCaseResult {
        let start = Utc::now();
        if let Some(missing) = self.missing_resource(resources) {
            return TestCaseResult::error(&self.name, start, format!("missing {missing}"));
        }

        if let Some(probe) = &self.probe {
            probe.enter();
        }
        tokio::time::sleep(self.delay).await;
        if let Some(probe) = &self.probe {
            probe.exit();
        }

        match self.outcome {
            Outcome::Pass => TestCaseResult::passed(&self.name, start),
            Outcome::Fail => TestCaseResult::failed(&self.name, start, "expected 200, got 500"),
            Outcome::Skip => TestCaseResult::skipped(&self.name, "disabled"),
            Outcome::Error => TestCaseResult::error(&self.name, start, "unexpected response"),
            Outcome::Panic => panic!("scripted panic in {}", self.name),
        }
    }
}
