//! Per-execution resource bundle

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::browser::BrowserSession;
use super::database::DatabaseConnection;
use super::http::HttpSession;
use crate::pool::Pooled;

pub(crate) type PooledBrowser = Pooled<Box<dyn BrowserSession>>;
pub(crate) type PooledConnection = Pooled<Box<dyn DatabaseConnection>>;

/// Checkouts, as `(pool id, checkout id)`, left behind by handles dropped
/// without a release
#[derive(Clone, Debug, Default)]
pub(crate) struct LostCheckouts(Arc<Mutex<Vec<(u64, u64)>>>);

impl LostCheckouts {
    fn record(&self, pool_id: u64, id: u64) {
        self.0.lock().push((pool_id, id));
    }

    pub(crate) fn take(&self) -> Vec<(u64, u64)> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// Resources checked out for one test execution
///
/// Issued by [`ResourceManager::acquire_resources`](super::ResourceManager::acquire_resources)
/// and handed back through
/// [`ResourceManager::release_resources`](super::ResourceManager::release_resources).
/// A handle dropped without release loses its instances unclosed; the manager
/// reclaims their pool slots the next time it is used.
pub struct ResourceHandle {
    test_name: String,
    lost: LostCheckouts,
    pub(crate) browser: Option<PooledBrowser>,
    pub(crate) http: Option<Pooled<HttpSession>>,
    pub(crate) databases: BTreeMap<String, PooledConnection>,
}

impl ResourceHandle {
    pub(crate) fn new(test_name: impl Into<String>, lost: LostCheckouts) -> Self {
        Self {
            test_name: test_name.into(),
            lost,
            browser: None,
            http: None,
            databases: BTreeMap::new(),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn browser(&self) -> Option<&dyn BrowserSession> {
        self.browser.as_ref().map(|b| b.get().as_ref())
    }

    pub fn browser_mut(&mut self) -> Option<&mut (dyn BrowserSession + 'static)> {
        self.browser.as_mut().map(|b| b.get_mut().as_mut())
    }

    pub fn http(&self) -> Option<&HttpSession> {
        self.http.as_ref().map(|h| h.get())
    }

    pub fn http_mut(&mut self) -> Option<&mut HttpSession> {
        self.http.as_mut().map(|h| h.get_mut())
    }

    pub fn database(&self, name: &str) -> Option<&dyn DatabaseConnection> {
        self.databases.get(name).map(|c| c.get().as_ref())
    }

    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    /// Number of pooled resources held
    pub fn len(&self) -> usize {
        usize::from(self.browser.is_some()) + usize::from(self.http.is_some()) + self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("test_name", &self.test_name)
            .field("browser", &self.browser)
            .field("http", &self.http)
            .field("databases", &self.databases)
            .finish()
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        warn!(
            test = %self.test_name,
            held = self.len(),
            "Resource handle dropped without release; instances are lost unclosed"
        );

        if let Some(browser) = &self.browser {
            self.lost.record(browser.pool_id(), browser.id());
        }
        if let Some(http) = &self.http {
            self.lost.record(http.pool_id(), http.id());
        }
        for connection in self.databases.values() {
            self.lost.record(connection.pool_id(), connection.id());
        }
    }
}
