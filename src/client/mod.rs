//! Client module: the interfaces the lifecycle uses to talk to the server.
//!
//! The orchestration core never issues requests itself. It goes through two
//! traits so that tests can substitute fakes:
//! - [`HttpClient`] issues the readiness GET requests
//! - [`AdminClient`] installs, starts and uninstalls bundles
//!
//! [`ServerClient`] implements both against an OSGi web console over HTTP.
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod console;

pub use console::{BundleState, ServerClient};

/// A decoded query parameter. A `None` value is sent as a bare key.
pub type QueryParam = (String, Option<String>);

/// Status and body of a completed GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Succeeds if the body contains `expected`.
    pub fn check_content_contains(&self, expected: &str) -> Result<()> {
        if self.body.contains(expected) {
            Ok(())
        } else {
            Err(Error::ContentMismatch(format!(
                "response body does not contain '{}'",
                expected
            )))
        }
    }

    /// Succeeds if `pattern` matches somewhere in the body.
    pub fn check_content_regexp(&self, pattern: &Regex) -> Result<()> {
        if pattern.is_match(&self.body) {
            Ok(())
        } else {
            Err(Error::ContentMismatch(format!(
                "response body does not match /{}/",
                pattern.as_str()
            )))
        }
    }
}

/// Issues GET requests against the server under test.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `path` with `params`, failing unless the status is `expected_status`.
    async fn get(
        &self,
        path: &str,
        params: &[QueryParam],
        expected_status: u16,
    ) -> Result<HttpResponse>;

    /// Absolute URL of `path`, for log messages.
    fn url(&self, path: &str) -> String;
}

/// Manages bundles on the server under test.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Upload `files`, optionally starting them right away.
    async fn install_bundles(&self, files: &[PathBuf], start: bool) -> Result<()>;

    /// Symbolic name of a bundle archive, from its manifest.
    fn bundle_symbolic_name(&self, file: &Path) -> Result<String> {
        crate::bundles::bundle_symbolic_name(file)
    }

    /// Poll until every bundle in `names` is known to the server.
    async fn wait_for_bundles_installed(&self, names: &[String], timeout: Duration) -> Result<()>;

    /// Start every bundle in `names` and poll until all are active.
    async fn wait_for_bundles_started(&self, names: &[String], timeout: Duration) -> Result<()>;

    async fn uninstall_bundles(&self, names: &[String]) -> Result<()>;
}
