//! Built-in HTTP smoke check
//!
//! The only concrete [`Test`] shipped with the crate; the `run` command
//! builds one per URL.

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{ResourceNeeds, Test, TestCaseResult, TestKind};
use crate::resources::ResourceHandle;

/// Requests a URL and checks the status code and, optionally, the body
#[derive(Clone, Debug)]
pub struct HttpCheck {
    name: String,
    url: String,
    expected_status: u16,
    body_contains: Option<String>,
}

impl HttpCheck {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: format!("GET {url}"),
            url,
            expected_status: 200,
            body_contains: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn expect_body(mut self, text: impl Into<String>) -> Self {
        self.body_contains = Some(text.into());
        self
    }
}

#[async_trait]
impl Test for HttpCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TestKind {
        TestKind::Api
    }

    fn resource_needs(&self) -> ResourceNeeds {
        ResourceNeeds::api()
    }

    async fn execute(&self, resources: &mut ResourceHandle) -> TestCaseResult {
        let start = Utc::now();
        let Some(session) = resources.http_mut() else {
            return TestCaseResult::error(&self.name, start, "no HTTP client in resource handle");
        };

        let response = match session.get(&self.url).await {
            Ok(response) => response,
            Err(e) => return TestCaseResult::error(&self.name, start, format!("{e:#}")),
        };
        let log = format!("{} in {}ms", response.status_code, response.duration_ms);

        if response.status_code != self.expected_status {
            return TestCaseResult::failed(
                &self.name,
                start,
                format!(
                    "expected status {}, got {}",
                    self.expected_status, response.status_code
                ),
            )
            .with_log(log);
        }
        if let Some(text) = &self.body_contains {
            if !response.body_contains(text) {
                return TestCaseResult::failed(
                    &self.name,
                    start,
                    format!("response body does not contain '{text}'"),
                )
                .with_log(log);
            }
        }

        TestCaseResult::passed(&self.name, start).with_log(log)
    }
}
