//! Readiness probing of the server under test.
//!
//! The server counts as ready once a GET on every configured path answers
//! 200 with the expected content. Paths are configured as
//! `<path>[?query][:<expected>[:regexp]]`.

use crate::client::{HttpClient, HttpResponse, QueryParam};
use crate::config::ReadinessSettings;
use crate::error::{Error, Result};
use crate::state::{InstanceState, ReadinessPhase};
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::Arc;
use tokio::time::Instant;

/// Third path segment that switches matching to a regular expression.
pub const REGEXP_MARKER: &str = "regexp";

/// How a response body is checked.
#[derive(Debug, Clone)]
pub enum ContentMatch {
    /// Body contains the text
    Contains(String),
    /// Pattern matches somewhere in the body
    Regexp(Regex),
}

/// One parsed readiness path specification.
#[derive(Debug, Clone)]
pub struct ReadyPath {
    /// Path without its query string
    pub path: String,
    /// Decoded query parameters
    pub params: Vec<QueryParam>,
    pub content: ContentMatch,
}

impl ReadyPath {
    /// Parses `path[?query][:expected[:regexp]]`.
    ///
    /// A missing expected part matches any body. An empty path or an invalid
    /// regular expression is a configuration error.
    pub fn parse(spec: &str) -> Result<Self> {
        let segments: Vec<&str> = spec.split(':').collect();
        let full_path = segments[0].trim();
        let expected = segments.get(1).copied().unwrap_or_default();
        let is_regexp = segments.get(2).is_some_and(|s| *s == REGEXP_MARKER);

        let (path, query) = match full_path.split_once('?') {
            Some((path, query)) => (path, query),
            None => (full_path, ""),
        };
        if path.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "Readiness path '{}' has an empty path",
                spec
            )));
        }

        let content = if is_regexp {
            let pattern = Regex::new(expected).map_err(|e| {
                Error::ConfigInvalid(format!("Readiness path '{}' has an invalid pattern: {}", spec, e))
            })?;
            ContentMatch::Regexp(pattern)
        } else {
            ContentMatch::Contains(expected.to_string())
        };

        Ok(Self {
            path: path.to_string(),
            params: extract_params(query),
            content,
        })
    }

    /// Checks a response body against the expected content.
    pub fn check(&self, response: &HttpResponse) -> Result<()> {
        match &self.content {
            ContentMatch::Contains(expected) => response.check_content_contains(expected),
            ContentMatch::Regexp(pattern) => response.check_content_regexp(pattern),
        }
    }
}

/// Decodes a query string into request parameters.
///
/// `+` decodes to a space. A pair without `=` keeps its raw text as key and
/// has no value, as does a pair with nothing after the `=`.
pub fn extract_params(query: &str) -> Vec<QueryParam> {
    if query.is_empty() {
        return Vec::new();
    }

    query
        .split('&')
        .map(|pair| match pair.find('=') {
            Some(idx) if idx > 0 => {
                let value = &pair[idx + 1..];
                (
                    decode_component(&pair[..idx]),
                    (!value.is_empty()).then(|| decode_component(value)),
                )
            }
            _ => (pair.to_string(), None),
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    percent_decode_str(&component.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Polls the readiness paths of an instance until they all succeed.
pub struct ReadinessProber {
    state: Arc<InstanceState>,
    client: Arc<dyn HttpClient>,
    settings: ReadinessSettings,
    username: String,
}

impl ReadinessProber {
    pub fn new(
        state: Arc<InstanceState>,
        client: Arc<dyn HttpClient>,
        settings: ReadinessSettings,
        username: impl Into<String>,
    ) -> Self {
        Self {
            state,
            client,
            settings,
            username: username.into(),
        }
    }

    /// Waits until every path in `specs` returns the expected content.
    ///
    /// Returns immediately once the instance is ready. A failure is recorded
    /// on the instance, and later calls fail without probing.
    #[tracing::instrument(skip(self, specs), fields(instance = %self.state.name()))]
    pub async fn wait_for_ready(&self, specs: &[String]) -> Result<()> {
        match self.state.readiness() {
            ReadinessPhase::Ready => return Ok(()),
            ReadinessPhase::Failed { timeout_secs } => {
                return Err(Error::ReadinessFailedPreviously { timeout_secs });
            }
            ReadinessPhase::Pending => {}
        }

        let timeout_secs = self.settings.timeout_secs;
        tracing::info!(
            "Will wait up to {} seconds for server to become ready with a {} second initial delay and {} seconds between each check",
            timeout_secs,
            self.settings.initial_delay_secs,
            self.settings.delay_secs
        );
        let deadline = Instant::now() + self.settings.timeout();

        let paths: Vec<ReadyPath> = specs
            .iter()
            .filter_map(|spec| match ReadyPath::parse(spec) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(spec = %spec, error = %e, "Ignoring invalid readiness path");
                    None
                }
            })
            .collect();

        if self.settings.initial_delay_secs > 0 {
            tokio::time::sleep(self.settings.initial_delay()).await;
        }

        tracing::info!(
            timeout_secs,
            paths = ?specs,
            "Checking that GET requests return expected content"
        );
        while Instant::now() < deadline {
            let mut errors = false;
            for path in &paths {
                if let Err(e) = self.probe(path).await {
                    errors = true;
                    tracing::debug!(
                        "Request to {}@{} failed, will retry ({})",
                        self.username,
                        self.client.url(&path.path),
                        e
                    );
                }
            }

            if !errors {
                self.state.mark_ready();
                tracing::info!("All {} paths return expected content, server ready", paths.len());
                return Ok(());
            }
            tokio::time::sleep(self.settings.delay()).await;
        }

        self.state.mark_ready_failed(timeout_secs);
        let error = Error::ReadinessTimeout { timeout_secs };
        tracing::info!("{}", error);
        Err(error)
    }

    async fn probe(&self, path: &ReadyPath) -> Result<()> {
        let response = self.client.get(&path.path, &path.params, 200).await?;
        if response.status != 200 {
            return Err(Error::UnexpectedStatus {
                path: path.path.clone(),
                expected: 200,
                actual: response.status,
            });
        }
        path.check(&response)
    }
}
