//! Pooled HTTP sessions
//!
//! An [`HttpSession`] wraps a `reqwest` client with per-test request state
//! (bearer token and cookies) that is wiped before the session is reused.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE},
    Client, Method,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::duration_ms;
use crate::pool::{ResourceFactory, ResourcePool};

/// HTTP client errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),
}

/// Settings shared by every pooled HTTP session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    /// Prefix for relative request paths
    pub base_url: Option<String>,

    pub default_headers: BTreeMap<String, String>,

    pub user_agent: String,

    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            base_url: None,
            default_headers: BTreeMap::new(),
            user_agent: format!("testpool/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: false,
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            bail!("HTTP timeout must be greater than 0");
        }
        if let Some(base) = &self.base_url {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                bail!("HTTP base URL must start with http:// or https://, got {base}");
            }
        }
        for (key, value) in &self.default_headers {
            HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("Invalid header name: {key}"))?;
            HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {key}"))?;
        }
        Ok(())
    }
}

/// HTTP client checked out by one test at a time
pub struct HttpSession {
    client: Client,
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Duration,
    auth_token: Option<String>,
    cookies: BTreeMap<String, String>,
}

impl HttpSession {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to create HTTP client")?;

        let mut default_headers = HeaderMap::new();
        for (key, value) in &config.default_headers {
            let name = HeaderName::from_bytes(key.as_bytes()).context("Invalid header name")?;
            let value = HeaderValue::from_str(value).context("Invalid header value")?;
            default_headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            default_headers,
            timeout: config.timeout,
            auth_token: None,
            cookies: BTreeMap::new(),
        })
    }

    /// Attach a bearer token to every following request
    pub fn set_auth_token(&mut self, token: impl Into<String>) {
        self.auth_token = Some(token.into());
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Forget credentials and cookies
    pub fn reset(&mut self) {
        self.auth_token = None;
        self.cookies.clear();
    }

    /// Build full URL
    fn build_url(&self, path: &str) -> String {
        match &self.base_url {
            Some(base) if !path.starts_with("http://") && !path.starts_with("https://") => {
                format!("{}{}", base.trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        }
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Send HTTP request
    pub async fn send(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let url = self.build_url(&request.url);
        debug!("Sending {} request to {}", request.method, url);

        let method =
            Method::from_bytes(request.method.as_bytes()).context("Invalid HTTP method")?;

        let mut req_builder = self.client.request(method, &url);

        for (key, value) in &self.default_headers {
            req_builder = req_builder.header(key, value);
        }
        if let Some(token) = &self.auth_token {
            req_builder = req_builder.bearer_auth(token);
        }
        if let Some(cookies) = self.cookie_header() {
            req_builder = req_builder.header(COOKIE, cookies);
        }
        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let start = Instant::now();

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(HttpError::Timeout(self.timeout.as_millis() as u64))
            } else if e.is_connect() {
                anyhow::anyhow!(HttpError::ConnectionRefused(url.clone()))
            } else {
                anyhow::anyhow!(HttpError::RequestFailed(e.to_string()))
            }
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        for value in response.headers().get_all(SET_COOKIE) {
            if let Some((name, value)) = value.to_str().ok().and_then(parse_set_cookie) {
                self.cookies.insert(name, value);
            }
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            headers,
            body,
            duration_ms,
        })
    }

    pub async fn get(&mut self, url: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::get(url)).await
    }

    pub async fn post(&mut self, url: &str, body: impl Into<String>) -> Result<HttpResponse> {
        self.send(HttpRequest::post(url).body(body)).await
    }
}

/// `name=value; Path=/; HttpOnly` -> (name, value)
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// HTTP request builder
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// HTTP response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_contains(&self, text: &str) -> bool {
        self.body.contains(text)
    }
}

/// Pool factory for [`HttpSession`]s
pub struct HttpClientFactory {
    config: HttpClientConfig,
}

impl HttpClientFactory {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResourceFactory for HttpClientFactory {
    type Resource = HttpSession;

    fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    async fn create(&self) -> Result<HttpSession> {
        HttpSession::new(&self.config)
    }

    fn reset(&self, session: &mut HttpSession) {
        session.reset();
    }
}

pub type HttpPool = ResourcePool<HttpClientFactory>;
