/// Error handling module for server-setup.
///
/// This module defines the error types used throughout the library.
/// Sticky failures (readiness, bundle installation) have their own
/// variants so that a caller can tell a first failure from a repeated one.
///
/// # Example
///
/// ```
/// use server_setup::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Server ready"),
///         Err(Error::ReadinessTimeout { timeout_secs }) => {
///             println!("Server not ready after {} seconds", timeout_secs)
///         }
///         Err(Error::StartupConflict(url)) => println!("Conflicting server at {}", url),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use thiserror::Error;

/// Errors that can occur in the server-setup library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The properties file cannot be read
    /// - The properties JSON is malformed or holds non-string values
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but holds values that cannot be used.
    ///
    /// This error occurs when:
    /// - A numeric property is not a number
    /// - The timeout multiplier is not positive
    /// - A readiness path specification is malformed (validation only)
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Two setups both believe they started the server.
    ///
    /// Carries the base URL of the instance.
    #[error("A server is already started at {0}")]
    StartupConflict(String),

    /// The readiness probe did not succeed before its deadline.
    #[error("Server not ready after {timeout_secs} seconds, giving up")]
    ReadinessTimeout {
        /// Effective timeout that elapsed
        timeout_secs: u64,
    },

    /// A previous readiness check for this instance already failed.
    #[error("Server is not ready according to previous checks (timed out after {timeout_secs} seconds)")]
    ReadinessFailedPreviously {
        /// Timeout of the failed check
        timeout_secs: u64,
    },

    /// Installing or starting additional bundles failed.
    #[error("Could not start all installed bundles: {0}")]
    InstallationFailure(String),

    /// A previous bundle installation for this instance already failed.
    #[error("Bundles could not be installed, cannot run tests")]
    InstallationFailedPreviously,

    /// Error in the HTTP transport.
    ///
    /// This error occurs when:
    /// - The connection is refused or reset
    /// - The response body cannot be read
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a status other than the expected one.
    #[error("Expected status {expected} for {path} but got {actual}")]
    UnexpectedStatus {
        /// Request path
        path: String,
        /// Expected status code
        expected: u16,
        /// Actual status code
        actual: u16,
    },

    /// A response body did not contain the expected content.
    #[error("Content mismatch: {0}")]
    ContentMismatch(String),

    /// Error when locating or spawning the server process.
    #[error("Server process error: {0}")]
    Process(String),

    /// The launcher has already started its process.
    #[error("Already running")]
    AlreadyRunning,

    /// Operation timed out.
    ///
    /// This error occurs when:
    /// - Bundles are not reported installed within the install timeout
    /// - Bundles are not reported active within the start timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Filesystem error while reading bundles or manifests.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error is one of the sticky lifecycle failures that every
    /// later `ensure_ready` call for the instance reports again.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            Error::ReadinessTimeout { .. }
                | Error::ReadinessFailedPreviously { .. }
                | Error::InstallationFailure(_)
                | Error::InstallationFailedPreviously
        )
    }
}

/// Result type for server-setup operations.
pub type Result<T> = std::result::Result<T, Error>;
