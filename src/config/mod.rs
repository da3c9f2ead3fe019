//! Configuration module for server-setup.
//!
//! Settings come from a flat set of string properties, the same way a test
//! run passes them on its command line or through the environment. They can
//! be loaded from a JSON file, from environment variables, or built in code.
//! A [`SetupConfig`] resolves them once into typed settings with defaults.
//!
//! # Examples
//!
//! Loading properties from a file and the environment:
//!
//! ```no_run
//! use server_setup::config::Properties;
//!
//! let mut props = Properties::from_file("server-setup.json").unwrap();
//! props.merge(Properties::from_env());
//! println!("Loaded {} properties", props.len());
//! ```
//!
//! Building properties programmatically:
//!
//! ```
//! use server_setup::config::{Properties, SetupConfig};
//!
//! let props = Properties::new()
//!     .with("test.server.url", "http://localhost:8080")
//!     .with("server.ready.path.1", "/index.html:Welcome");
//!
//! let config = SetupConfig::from_properties(&props).unwrap();
//! assert_eq!(config.username, "admin");
//! assert_eq!(config.ready_paths, vec!["/index.html:Welcome".to_string()]);
//! ```
mod parser;
pub mod validator;

pub use parser::{BundleSettings, Properties, ReadinessSettings, SetupConfig, Timeouts};
pub use validator::validate_properties;

/// Base URL of an externally provisioned server.
pub const TEST_SERVER_URL: &str = "test.server.url";
/// Legacy alias of [`TEST_SERVER_URL`].
pub const LEGACY_SERVER_URL: &str = "launchpad.http.server.url";
pub const TEST_SERVER_USERNAME: &str = "test.server.username";
pub const TEST_SERVER_PASSWORD: &str = "test.server.password";
/// Host name used to build the base URL of a launched server.
pub const SERVER_HOSTNAME: &str = "test.server.hostname";
pub const SERVER_READY_TIMEOUT: &str = "server.ready.timeout.seconds";
pub const SERVER_READY_INITIAL_DELAY: &str = "server.ready.timeout.initial.delay.seconds";
pub const SERVER_READY_DELAY: &str = "server.ready.timeout.delay.seconds";
pub const SERVER_READY_QUIET_PERIOD: &str = "server.ready.quiet.period.seconds";
/// Every property starting with this key is a readiness path specification.
pub const SERVER_READY_PATH_PREFIX: &str = "server.ready.path";
/// Block after setup so that the server stays up for out-of-process tests.
pub const KEEP_JAR_RUNNING: &str = "keep.jar.running";
/// Legacy alias of [`KEEP_JAR_RUNNING`].
pub const LEGACY_KEEP_JAR_RUNNING: &str = "keepJarRunning";
/// Comma separated directories holding additional bundles.
pub const ADDITIONAL_BUNDLES_PATH: &str = "additional.bundles.path";
pub const ADDITIONAL_BUNDLES_UNINSTALL: &str = "additional.bundles.uninstall";
/// Every property starting with this key selects bundles by filename prefix.
pub const BUNDLE_TO_INSTALL_PREFIX: &str = "server.additional.bundle";
/// Legacy selector prefix, used only when no [`BUNDLE_TO_INSTALL_PREFIX`] key is set.
pub const LEGACY_BUNDLE_TO_INSTALL_PREFIX: &str = "sling.additional.bundle";
pub const BUNDLE_INSTALL_TIMEOUT: &str = "bundle.install.timeout.seconds";
pub const START_BUNDLES_TIMEOUT: &str = "start.bundles.timeout.seconds";
/// Factor applied to every timeout and delay.
pub const TIMEOUT_MULTIPLIER: &str = "timeout.multiplier";

/// Default user name and password.
pub const ADMIN: &str = "admin";
pub const DEFAULT_HOSTNAME: &str = "localhost";
