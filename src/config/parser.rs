use crate::config::{
    ADDITIONAL_BUNDLES_UNINSTALL, ADMIN, BUNDLE_INSTALL_TIMEOUT, DEFAULT_HOSTNAME,
    KEEP_JAR_RUNNING, LEGACY_KEEP_JAR_RUNNING, LEGACY_SERVER_URL, SERVER_HOSTNAME,
    SERVER_READY_DELAY, SERVER_READY_INITIAL_DELAY, SERVER_READY_PATH_PREFIX, SERVER_READY_QUIET_PERIOD,
    SERVER_READY_TIMEOUT, START_BUNDLES_TIMEOUT, TEST_SERVER_PASSWORD, TEST_SERVER_URL,
    TEST_SERVER_USERNAME, TIMEOUT_MULTIPLIER,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Flat string properties driving a setup.
///
/// Keys are kept sorted, so prefix scans (readiness paths, bundle
/// selectors) always come back in ascending key order.
///
/// # JSON format
///
/// ```json
/// {
///   "server.ready.timeout.seconds": "120",
///   "server.ready.path.1": "/index.html:Welcome",
///   "additional.bundles.path": "target/bundles"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Creates an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads properties from a JSON file holding a flat object of strings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not a JSON object of string values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read properties file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses properties from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON properties: {}", e)))
    }

    /// Reads properties from the process environment.
    ///
    /// `SERVER_READY_TIMEOUT_SECONDS` becomes `server.ready.timeout.seconds`.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds properties from environment-style `(NAME, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let values = vars
            .into_iter()
            .map(|(name, value)| (env_name_to_key(name.as_ref()), value.into()))
            .collect();
        Self { values }
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value of `key` unless it is missing or blank.
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// `true` only when the value is exactly `"true"`.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// Like [`is_true`](Self::is_true), falling back to `legacy` only when
    /// `key` is absent.
    pub fn is_true_or_legacy(&self, key: &str, legacy: &str) -> bool {
        match self.get(key) {
            Some(_) => self.is_true(key),
            None => self.is_true(legacy),
        }
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, sorted by key.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.values
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses `key` as a number of seconds, falling back to `default`.
    pub fn parse_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.get_non_blank(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::ConfigInvalid(format!("Property '{}' is not a number: '{}'", key, raw))
            }),
        }
    }

    /// Copies every entry of `other` over this set.
    pub fn merge(&mut self, other: Properties) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn env_name_to_key(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', ".")
}

/// Scales nominal timeouts by a configured factor, so slow build machines
/// can stretch every wait without touching individual settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    multiplier: f64,
}

impl Timeouts {
    pub fn new(multiplier: f64) -> Result<Self> {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "Property '{}' must be a positive number, got {}",
                TIMEOUT_MULTIPLIER, multiplier
            )));
        }
        Ok(Self { multiplier })
    }

    pub fn from_properties(props: &Properties) -> Result<Self> {
        match props.get_non_blank(TIMEOUT_MULTIPLIER) {
            None => Ok(Self::default()),
            Some(raw) => {
                let multiplier = raw.trim().parse::<f64>().map_err(|_| {
                    Error::ConfigInvalid(format!(
                        "Property '{}' is not a number: '{}'",
                        TIMEOUT_MULTIPLIER, raw
                    ))
                })?;
                Self::new(multiplier)
            }
        }
    }

    /// Nominal seconds times the multiplier, truncated.
    pub fn scale_secs(&self, secs: u64) -> u64 {
        (secs as f64 * self.multiplier) as u64
    }

    /// Reads `key` (or `default`) and scales it.
    pub fn secs(&self, props: &Properties, key: &str, default: u64) -> Result<u64> {
        Ok(self.scale_secs(props.parse_u64(key, default)?))
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { multiplier: 1.0 }
    }
}

/// Readiness polling settings, already scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSettings {
    pub timeout_secs: u64,
    pub initial_delay_secs: u64,
    pub delay_secs: u64,
}

impl ReadinessSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            initial_delay_secs: 0,
            delay_secs: 1,
        }
    }
}

/// Bundle installation poll timeouts, already scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleSettings {
    pub install_timeout_secs: u64,
    pub start_timeout_secs: u64,
}

impl BundleSettings {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            install_timeout_secs: 10,
            start_timeout_secs: 30,
        }
    }
}

/// Settings of one setup, resolved once from [`Properties`].
#[derive(Debug, Clone, PartialEq)]
pub struct SetupConfig {
    /// Base URL of a pre-provisioned server, if any.
    pub server_url: Option<String>,
    /// Host used for a launched server.
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub readiness: ReadinessSettings,
    /// Readiness path specifications in key order.
    pub ready_paths: Vec<String>,
    pub quiet_period_secs: u64,
    /// Block after setup instead of returning.
    pub keep_running: bool,
    /// Raw uninstall flag; only honoured for a server launched by this run.
    pub uninstall_bundles: bool,
    pub bundles: BundleSettings,
    pub timeouts: Timeouts,
}

impl SetupConfig {
    /// Resolves every setting, applying defaults and the timeout multiplier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if a numeric property does not parse.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let timeouts = Timeouts::from_properties(props)?;

        let server_url = props
            .get_non_blank(TEST_SERVER_URL)
            .or_else(|| {
                // The legacy alias only applies when the main key is absent
                props
                    .get(TEST_SERVER_URL)
                    .is_none()
                    .then(|| props.get_non_blank(LEGACY_SERVER_URL))
                    .flatten()
            })
            .map(|url| url.trim().to_string());

        let readiness = ReadinessSettings {
            timeout_secs: timeouts.secs(props, SERVER_READY_TIMEOUT, 60)?,
            initial_delay_secs: timeouts.secs(props, SERVER_READY_INITIAL_DELAY, 0)?,
            delay_secs: timeouts.secs(props, SERVER_READY_DELAY, 1)?,
        };

        let bundles = BundleSettings {
            install_timeout_secs: timeouts.secs(props, BUNDLE_INSTALL_TIMEOUT, 10)?,
            start_timeout_secs: timeouts.secs(props, START_BUNDLES_TIMEOUT, 30)?,
        };

        Ok(Self {
            server_url,
            hostname: props
                .get_non_blank(SERVER_HOSTNAME)
                .unwrap_or(DEFAULT_HOSTNAME)
                .to_string(),
            username: props
                .get_non_blank(TEST_SERVER_USERNAME)
                .unwrap_or(ADMIN)
                .to_string(),
            password: props
                .get_non_blank(TEST_SERVER_PASSWORD)
                .unwrap_or(ADMIN)
                .to_string(),
            readiness,
            ready_paths: props
                .with_prefix(SERVER_READY_PATH_PREFIX)
                .map(|(_, v)| v.to_string())
                .collect(),
            quiet_period_secs: timeouts.secs(props, SERVER_READY_QUIET_PERIOD, 0)?,
            keep_running: props.is_true_or_legacy(KEEP_JAR_RUNNING, LEGACY_KEEP_JAR_RUNNING),
            uninstall_bundles: props.is_true(ADDITIONAL_BUNDLES_UNINSTALL),
            bundles,
            timeouts,
        })
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }
}
