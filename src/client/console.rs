use crate::client::{AdminClient, HttpClient, HttpResponse, QueryParam};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const BUNDLES_PATH: &str = "/system/console/bundles";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// State of a bundle as reported by the web console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Fragment,
    Other(String),
}

impl BundleState {
    pub fn parse(state: &str) -> Self {
        match state {
            "Installed" => Self::Installed,
            "Resolved" => Self::Resolved,
            "Starting" => Self::Starting,
            "Active" => Self::Active,
            "Stopping" => Self::Stopping,
            "Fragment" => Self::Fragment,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            Self::Installed | Self::Resolved | Self::Starting | Self::Active | Self::Fragment
        )
    }

    /// Fragments never become active and count as started.
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Active | Self::Fragment)
    }
}

#[derive(Debug, Deserialize)]
struct BundleListing {
    #[serde(default)]
    data: Vec<BundleEntry>,
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
    state: String,
}

/// HTTP client for a server exposing an OSGi web console.
///
/// Every request carries basic authentication with the configured
/// credentials.
#[derive(Debug, Clone)]
pub struct ServerClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl ServerClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| Error::ConfigInvalid(format!("Invalid server URL '{}': {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(format!("Cannot create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            username: username.into(),
            password: password.into(),
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    fn parse_url(&self, path: &str, params: &[QueryParam]) -> Result<Url> {
        let mut url = Url::parse(&self.url(path))
            .map_err(|e| Error::Transport(format!("Invalid URL for path '{}': {}", path, e)))?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                match value {
                    Some(value) => query.append_pair(key, value),
                    None => query.append_key_only(key),
                };
            }
        }
        Ok(url)
    }

    fn bundle_url(&self, symbolic_name: &str, suffix: &str) -> Result<Url> {
        self.parse_url(&format!("{}/{}{}", BUNDLES_PATH, symbolic_name, suffix), &[])
    }

    /// Current state of a bundle, `None` if the server does not know it.
    pub async fn bundle_state(&self, symbolic_name: &str) -> Result<Option<BundleState>> {
        let url = self.bundle_url(symbolic_name, ".json")?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let listing: BundleListing = response
            .error_for_status()
            .map_err(|e| Error::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid bundle listing: {}", e)))?;

        Ok(listing
            .data
            .first()
            .map(|entry| BundleState::parse(&entry.state)))
    }

    async fn bundle_action(&self, symbolic_name: &str, action: &'static str) -> Result<()> {
        let url = self.bundle_url(symbolic_name, "")?;
        self.request(Method::POST, url)
            .form(&[("action", action)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Transport(format!("{} of {} failed: {}", action, symbolic_name, e)))?;
        tracing::debug!(bundle = %symbolic_name, action, "Bundle action sent");
        Ok(())
    }

    async fn install_bundle(&self, file: &Path, start: bool) -> Result<()> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "bundle.jar".to_string());

        let form = Form::new()
            .text("action", "install")
            .text("bundlestart", if start { "true" } else { "false" })
            .text("bundlestartlevel", "20")
            .part("bundlefile", Part::bytes(bytes).file_name(file_name));

        let url = self.parse_url(BUNDLES_PATH, &[])?;
        self.request(Method::POST, url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                Error::Transport(format!("Install of {} failed: {}", file.display(), e))
            })?;

        tracing::info!(file = %file.display(), start, "Bundle installed");
        Ok(())
    }

    /// Polls until every bundle satisfies `done` or `timeout` elapses.
    async fn poll_bundles<F>(&self, names: &[String], timeout: Duration, what: &str, done: F) -> Result<()>
    where
        F: Fn(&BundleState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let mut pending = Vec::new();
            for name in names {
                match self.bundle_state(name).await {
                    Ok(Some(state)) if done(&state) => {}
                    Ok(state) => pending.push(format!("{} ({:?})", name, state)),
                    Err(e) => pending.push(format!("{} ({})", name, e)),
                }
            }

            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "Bundles not {} after {:?}: {}",
                    what,
                    timeout,
                    pending.join(", ")
                )));
            }
            tracing::trace!(what, pending = ?pending, "Waiting for bundles");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl HttpClient for ServerClient {
    async fn get(
        &self,
        path: &str,
        params: &[QueryParam],
        expected_status: u16,
    ) -> Result<HttpResponse> {
        let url = self.parse_url(path, params)?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Cannot read response body: {}", e)))?;

        if status != expected_status {
            return Err(Error::UnexpectedStatus {
                path: path.to_string(),
                expected: expected_status,
                actual: status,
            });
        }
        Ok(HttpResponse::new(status, body))
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl AdminClient for ServerClient {
    async fn install_bundles(&self, files: &[PathBuf], start: bool) -> Result<()> {
        for file in files {
            self.install_bundle(file, start).await?;
        }
        Ok(())
    }

    async fn wait_for_bundles_installed(&self, names: &[String], timeout: Duration) -> Result<()> {
        self.poll_bundles(names, timeout, "installed", BundleState::is_installed)
            .await
    }

    async fn wait_for_bundles_started(&self, names: &[String], timeout: Duration) -> Result<()> {
        for name in names {
            let started = matches!(self.bundle_state(name).await?, Some(state) if state.is_started());
            if !started {
                self.bundle_action(name, "start").await?;
            }
        }
        self.poll_bundles(names, timeout, "started", BundleState::is_started)
            .await
    }

    async fn uninstall_bundles(&self, names: &[String]) -> Result<()> {
        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.bundle_action(name, "uninstall").await {
                tracing::warn!(bundle = %name, error = %e, "Failed to uninstall bundle");
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "Failed to uninstall bundles: {}",
                errors.join("; ")
            )))
        }
    }
}
