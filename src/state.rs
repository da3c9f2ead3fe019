//! Shared, named lifecycle state of one server.
//!
//! Every [`ServerSetup`](crate::ServerSetup) that targets the same instance
//! name holds the same `Arc<InstanceState>`. The state records how far the
//! lifecycle got (started, ready, bundles installed, quiet period) as small
//! one-way state machines, owns the launcher handle, and provides the lock
//! that serialises the guarded steps so concurrent setups do each step once.

use crate::error::{Error, Result};
use crate::launcher::ProcessLauncher;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::Notify;

/// Name of the instance used when none is given.
pub const DEFAULT_INSTANCE_NAME: &str = "default";

/// Whether the server process has been started (or found running).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    NotStarted,
    Started,
}

/// Outcome of the readiness probe. `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPhase {
    Pending,
    Ready,
    /// The probe gave up after `timeout_secs`
    Failed { timeout_secs: u64 },
}

/// Outcome of the additional bundle installation. `Installed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundlePhase {
    Pending,
    Installed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuietPeriod {
    Pending,
    Complete,
}

struct Inner {
    base_url: Option<String>,
    startup: StartupPhase,
    readiness: ReadinessPhase,
    bundles: BundlePhase,
    quiet_period: QuietPeriod,
    startup_info_provided: bool,
    server_info_logged: bool,
}

/// Lifecycle state shared by all setups of one named server instance.
pub struct InstanceState {
    name: String,
    inner: Mutex<Inner>,
    /// Created at most once, started at most once
    launcher: Mutex<Option<Box<dyn ProcessLauncher>>>,
    /// Held while launching, probing, installing or sleeping the quiet period
    steps: tokio::sync::Mutex<()>,
    keep_alive: Notify,
}

impl InstanceState {
    /// Create a fresh, unshared state. Most callers want
    /// [`InstanceRegistry::instance`] instead.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                base_url: None,
                startup: StartupPhase::NotStarted,
                readiness: ReadinessPhase::Pending,
                bundles: BundlePhase::Pending,
                quiet_period: QuietPeriod::Pending,
                startup_info_provided: false,
                server_info_logged: false,
            }),
            launcher: Mutex::new(None),
            steps: tokio::sync::Mutex::new(()),
            keep_alive: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Every transition leaves the state consistent, so a poisoned lock is
    // still safe to use.
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn base_url(&self) -> Option<String> {
        self.inner().base_url.clone()
    }

    /// Sets the base URL unless one is already set. Returns whether this
    /// call stored the value.
    pub fn set_base_url(&self, url: impl Into<String>) -> bool {
        let url = url.into();
        let mut inner = self.inner();
        if let Some(existing) = inner.base_url.as_deref() {
            if existing != url {
                tracing::debug!(instance = %self.name, existing = %existing, ignored = %url, "Base URL already set");
            }
            return false;
        }
        inner.base_url = Some(url);
        true
    }

    pub fn startup(&self) -> StartupPhase {
        self.inner().startup
    }

    pub fn is_started(&self) -> bool {
        self.startup() == StartupPhase::Started
    }

    /// Flips the startup phase to `Started`. Returns `true` only for the
    /// call that performed the flip.
    pub fn try_mark_started(&self) -> bool {
        let mut inner = self.inner();
        match inner.startup {
            StartupPhase::NotStarted => {
                inner.startup = StartupPhase::Started;
                true
            }
            StartupPhase::Started => false,
        }
    }

    fn launcher(&self) -> MutexGuard<'_, Option<Box<dyn ProcessLauncher>>> {
        self.launcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_launcher(&self) -> bool {
        self.launcher().is_some()
    }

    /// Installs a launcher built by `create` if none exists yet, and returns
    /// the port the (possibly pre-existing) launcher listens on.
    pub fn ensure_launcher<F>(&self, create: F) -> Result<u16>
    where
        F: FnOnce() -> Result<Box<dyn ProcessLauncher>>,
    {
        let mut launcher = self.launcher();
        if launcher.is_none() {
            *launcher = Some(create()?);
        }
        launcher
            .as_ref()
            .map(|launcher| launcher.server_port())
            .ok_or_else(|| Error::Process("Launcher was not created".to_string()))
    }

    /// Starts the owned launcher. The launcher itself refuses a second start.
    ///
    /// Only the launcher lock is held while starting, so phase reads and
    /// transitions are never stuck behind a process spawn.
    pub fn start_launcher(&self) -> Result<()> {
        match self.launcher().as_mut() {
            Some(launcher) => launcher.start(),
            None => Err(Error::Process(format!(
                "No launcher configured for instance '{}'",
                self.name
            ))),
        }
    }

    pub fn readiness(&self) -> ReadinessPhase {
        self.inner().readiness
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == ReadinessPhase::Ready
    }

    /// `Pending -> Ready`. Returns whether the transition happened.
    pub fn mark_ready(&self) -> bool {
        let mut inner = self.inner();
        if inner.readiness == ReadinessPhase::Pending {
            inner.readiness = ReadinessPhase::Ready;
            true
        } else {
            false
        }
    }

    /// `Pending -> Failed`. Returns whether the transition happened.
    pub fn mark_ready_failed(&self, timeout_secs: u64) -> bool {
        let mut inner = self.inner();
        if inner.readiness == ReadinessPhase::Pending {
            inner.readiness = ReadinessPhase::Failed { timeout_secs };
            true
        } else {
            false
        }
    }

    pub fn bundles(&self) -> BundlePhase {
        self.inner().bundles
    }

    /// `Pending -> Installed`. Returns whether the transition happened.
    pub fn mark_bundles_installed(&self) -> bool {
        let mut inner = self.inner();
        if inner.bundles == BundlePhase::Pending {
            inner.bundles = BundlePhase::Installed;
            true
        } else {
            false
        }
    }

    /// `Pending -> Failed`. Returns whether the transition happened.
    pub fn mark_bundles_failed(&self) -> bool {
        let mut inner = self.inner();
        if inner.bundles == BundlePhase::Pending {
            inner.bundles = BundlePhase::Failed;
            true
        } else {
            false
        }
    }

    pub fn quiet_period(&self) -> QuietPeriod {
        self.inner().quiet_period
    }

    pub fn mark_quiet_period_complete(&self) {
        self.inner().quiet_period = QuietPeriod::Complete;
    }

    pub fn is_startup_info_provided(&self) -> bool {
        self.inner().startup_info_provided
    }

    pub fn mark_startup_info_provided(&self) {
        self.inner().startup_info_provided = true;
    }

    /// Returns `true` for the first caller only.
    pub fn mark_server_info_logged(&self) -> bool {
        !std::mem::replace(&mut self.inner().server_info_logged, true)
    }

    /// Serialises the guarded lifecycle steps of this instance.
    pub(crate) async fn lock_steps(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.steps.lock().await
    }

    /// Waits until [`release_keep_alive`](Self::release_keep_alive) is called.
    pub async fn wait_for_release(&self) {
        self.keep_alive.notified().await;
    }

    /// Wakes every caller blocked in keep-alive mode on this instance.
    pub fn release_keep_alive(&self) {
        self.keep_alive.notify_waiters();
    }
}

impl fmt::Debug for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_launcher = self.has_launcher();
        let inner = self.inner();
        f.debug_struct("InstanceState")
            .field("name", &self.name)
            .field("base_url", &inner.base_url)
            .field("has_launcher", &has_launcher)
            .field("startup", &inner.startup)
            .field("readiness", &inner.readiness)
            .field("bundles", &inner.bundles)
            .field("quiet_period", &inner.quiet_period)
            .finish()
    }
}

/// Maps instance names to their shared state.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Arc<InstanceState>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, for test suites that do not pass one around.
    pub fn global() -> &'static InstanceRegistry {
        static GLOBAL: OnceLock<InstanceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(InstanceRegistry::new)
    }

    /// Returns the state for `name`, creating it on first access.
    pub fn instance(&self, name: &str) -> Arc<InstanceState> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(instances.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(instance = %name, "Creating instance state");
            Arc::new(InstanceState::new(name))
        }))
    }

    pub fn default_instance(&self) -> Arc<InstanceState> {
        self.instance(DEFAULT_INSTANCE_NAME)
    }

    pub fn len(&self) -> usize {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
