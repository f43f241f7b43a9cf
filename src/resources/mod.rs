//! Test resources and their pools
//!
//! Browser sessions, HTTP clients and named database connections, plus the
//! manager that hands them out per test execution.

pub mod browser;
pub mod database;
mod handle;
pub mod http;
mod manager;

pub use browser::{BrowserConfig, BrowserFactory, BrowserLauncher, BrowserPool, BrowserSession};
pub use database::{
    DatabaseConfig, DatabaseConnection, DatabaseDriver, DatabaseFactory, DatabasePool,
};
pub use handle::ResourceHandle;
pub use http::{
    HttpClientConfig, HttpClientFactory, HttpError, HttpPool, HttpRequest, HttpResponse,
    HttpSession,
};
pub use manager::{classify, ManagerStats, ResourceFactories, ResourceManager};
