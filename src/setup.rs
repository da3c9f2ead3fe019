//! The lifecycle orchestrator used by each test.
//!
//! A [`ServerSetup`] is cheap and short lived: every test object builds its
//! own from the run's properties, and all of them converge on the shared
//! [`InstanceState`] of their instance name. Calling
//! [`ensure_ready`](ServerSetup::ensure_ready) any number of times, from any
//! number of tasks, starts the server once, probes it once, installs the
//! additional bundles once and waits the quiet period once.

use crate::bundles::{BundleInstaller, discover_bundles};
use crate::client::{AdminClient, HttpClient, ServerClient};
use crate::config::{KEEP_JAR_RUNNING, Properties, SetupConfig, TEST_SERVER_URL};
use crate::error::{Error, Result};
use crate::launcher::{JarLauncher, ProcessLauncher};
use crate::readiness::ReadinessProber;
use crate::state::{BundlePhase, InstanceRegistry, InstanceState, QuietPeriod, ReadinessPhase};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Unique identifier of a setup, used in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetupId(Uuid);

impl SetupId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clients for one server base URL.
pub struct Clients {
    pub http: Arc<dyn HttpClient>,
    pub admin: Arc<dyn AdminClient>,
}

/// Creates the collaborators of a setup.
pub trait Backend: Send + Sync {
    /// Launcher for a server this run starts itself.
    fn create_launcher(&self, props: &Properties) -> Result<Box<dyn ProcessLauncher>>;

    /// Clients talking to the server at `base_url`.
    fn create_clients(&self, base_url: &str, config: &SetupConfig) -> Result<Clients>;
}

/// Runnable jar launcher plus HTTP web console clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBackend;

impl Backend for HttpBackend {
    fn create_launcher(&self, props: &Properties) -> Result<Box<dyn ProcessLauncher>> {
        Ok(Box::new(JarLauncher::from_properties(props)?))
    }

    fn create_clients(&self, base_url: &str, config: &SetupConfig) -> Result<Clients> {
        let client = Arc::new(ServerClient::new(
            base_url,
            &config.username,
            &config.password,
        )?);
        Ok(Clients {
            http: client.clone(),
            admin: client,
        })
    }
}

/// Brings the shared server of an instance up before tests run against it.
pub struct ServerSetup {
    id: SetupId,
    state: Arc<InstanceState>,
    props: Properties,
    config: SetupConfig,
    http: Arc<dyn HttpClient>,
    admin: Arc<dyn AdminClient>,
    uses_remote_server: bool,
    uninstall_bundles: bool,
    started_by_this: AtomicBool,
}

impl ServerSetup {
    /// Resolves the configuration but does not start anything yet; that
    /// happens on demand.
    pub fn new(state: Arc<InstanceState>, props: Properties) -> Result<Self> {
        Self::with_backend(state, props, &HttpBackend)
    }

    /// Setup for the named instance of `registry`.
    pub fn for_instance(registry: &InstanceRegistry, name: &str, props: Properties) -> Result<Self> {
        Self::new(registry.instance(name), props)
    }

    /// Like [`new`](Self::new) with custom collaborators.
    ///
    /// With `test.server.url` set the server counts as started and no
    /// launcher is created. Otherwise the instance's launcher is created on
    /// first use and the base URL is derived from its port.
    #[tracing::instrument(skip_all, fields(instance = %state.name()))]
    pub fn with_backend(
        state: Arc<InstanceState>,
        props: Properties,
        backend: &dyn Backend,
    ) -> Result<Self> {
        let config = SetupConfig::from_properties(&props)?;

        let (uses_remote_server, uninstall_bundles) = match &config.server_url {
            Some(url) => {
                state.set_base_url(url.clone());
                state.try_mark_started();
                // Bundles of a server this run does not own are never uninstalled
                (true, false)
            }
            None => {
                let port = state
                    .ensure_launcher(|| backend.create_launcher(&props))
                    .map_err(|e| {
                        tracing::error!(error = %e, "Launcher setup failed");
                        e
                    })?;
                state.set_base_url(format!("http://{}:{}", config.hostname, port));
                (false, config.uninstall_bundles)
            }
        };

        let base_url = state
            .base_url()
            .ok_or_else(|| Error::Other("Instance has no base URL".to_string()))?;
        let clients = backend.create_clients(&base_url, &config)?;

        if state.mark_server_info_logged() {
            tracing::info!("Server base URL={}", base_url);
        }

        Ok(Self {
            id: SetupId::new(),
            state,
            props,
            config,
            http: clients.http,
            admin: clients.admin,
            uses_remote_server,
            uninstall_bundles,
            started_by_this: AtomicBool::new(false),
        })
    }

    /// Starts the server if needed, waits until it is ready, installs the
    /// additional bundles and waits the quiet period.
    ///
    /// Idempotent and safe to call concurrently. A readiness or installation
    /// failure is sticky: every later call for the instance fails too.
    ///
    /// With `keep.jar.running=true` this does not return until the instance
    /// is released or the process is interrupted.
    #[tracing::instrument(skip(self), fields(setup = %self.id, instance = %self.state.name()))]
    pub async fn ensure_ready(&self) -> Result<()> {
        self.run_lifecycle().await.map_err(|e| {
            tracing::error!(error = %e, sticky = e.is_sticky(), "Server setup failed");
            e
        })
    }

    async fn run_lifecycle(&self) -> Result<()> {
        if self.state.is_started()
            && !self.is_server_started_by_this()
            && !self.state.is_startup_info_provided()
        {
            tracing::info!(
                "{} was set or server already started: not starting server jar ({})",
                TEST_SERVER_URL,
                self.base_url_or_default()
            );
        }

        self.start_server_if_needed().await?;
        self.state.mark_startup_info_provided();
        self.wait_for_server_ready().await?;
        self.install_additional_bundles().await?;
        self.wait_for_quiet_period().await;
        self.block_if_requested().await;
        Ok(())
    }

    async fn start_server_if_needed(&self) -> Result<()> {
        if self.state.is_started() {
            return Ok(());
        }

        let _steps = self.state.lock_steps().await;
        if self.state.is_started() {
            return Ok(());
        }

        self.state.start_launcher()?;
        self.started_by_this.store(true, Ordering::SeqCst);
        if !self.state.try_mark_started() {
            return Err(Error::StartupConflict(self.base_url_or_default()));
        }
        tracing::info!(base_url = %self.base_url_or_default(), "Server started");
        Ok(())
    }

    async fn wait_for_server_ready(&self) -> Result<()> {
        match self.state.readiness() {
            ReadinessPhase::Ready => return Ok(()),
            ReadinessPhase::Failed { timeout_secs } => {
                return Err(Error::ReadinessFailedPreviously { timeout_secs });
            }
            ReadinessPhase::Pending => {}
        }

        let _steps = self.state.lock_steps().await;
        ReadinessProber::new(
            Arc::clone(&self.state),
            Arc::clone(&self.http),
            self.config.readiness,
            self.config.username.clone(),
        )
        .wait_for_ready(&self.config.ready_paths)
        .await
    }

    async fn install_additional_bundles(&self) -> Result<()> {
        match self.state.bundles() {
            BundlePhase::Installed => return Ok(()),
            BundlePhase::Failed => return Err(Error::InstallationFailedPreviously),
            BundlePhase::Pending => {}
        }

        let _steps = self.state.lock_steps().await;
        let files = discover_bundles(&self.props).await?;
        self.installer().install_additional_bundles(&files).await
    }

    fn installer(&self) -> BundleInstaller {
        BundleInstaller::new(
            Arc::clone(&self.state),
            Arc::clone(&self.admin),
            self.config.bundles,
        )
    }

    /// Lets the server settle after start-up and bundle installation.
    async fn wait_for_quiet_period(&self) {
        if self.state.quiet_period() == QuietPeriod::Complete {
            return;
        }

        let _steps = self.state.lock_steps().await;
        if self.state.quiet_period() == QuietPeriod::Complete {
            return;
        }

        let quiet_period = self.config.quiet_period();
        if !quiet_period.is_zero() {
            tracing::info!("Waiting {} seconds as a quiet period", self.config.quiet_period_secs);
            tokio::time::sleep(quiet_period).await;
        }
        self.state.mark_quiet_period_complete();
    }

    async fn block_if_requested(&self) {
        if self.config.keep_running {
            tracing::info!(
                "{} set to true - entering infinite wait so that the server stays up. Kill this process to exit.",
                KEEP_JAR_RUNNING
            );
            self.keep_alive().await;
        }
    }

    /// Blocks until the instance's keep-alive is released. Deliberately has
    /// no timeout; a process blocked here is ended by killing it.
    ///
    /// No signal handler is installed, so Ctrl-C keeps its default effect.
    pub async fn keep_alive(&self) {
        self.state.wait_for_release().await;
        tracing::info!("Keep-alive released");
    }

    /// After-test hook: uninstalls the additional bundles when this run
    /// launched the server and `additional.bundles.uninstall` is set.
    /// Failures are logged only.
    #[tracing::instrument(skip(self), fields(setup = %self.id, instance = %self.state.name()))]
    pub async fn cleanup(&self) {
        if !self.uninstall_bundles {
            return;
        }

        tracing::info!("Uninstalling additional bundles...");
        let result = match discover_bundles(&self.props).await {
            Ok(files) => self.installer().uninstall_bundles(&files).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::info!(error = %e, "Exception while uninstalling additional bundles");
        }
    }

    fn base_url_or_default(&self) -> String {
        self.state.base_url().unwrap_or_default()
    }

    /// Runs the lifecycle and returns the server base URL.
    pub async fn server_base_url(&self) -> Result<String> {
        self.ensure_ready().await?;
        Ok(self.base_url_or_default())
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn password(&self) -> &str {
        &self.config.password
    }

    /// Runs the lifecycle and returns the administration client.
    pub async fn admin_client(&self) -> Result<Arc<dyn AdminClient>> {
        self.ensure_ready().await?;
        Ok(Arc::clone(&self.admin))
    }

    /// The raw HTTP client. Does not run the lifecycle.
    pub fn http_client(&self) -> Arc<dyn HttpClient> {
        Arc::clone(&self.http)
    }

    /// Whether this setup performed the actual server start.
    pub fn is_server_started_by_this(&self) -> bool {
        self.started_by_this.load(Ordering::SeqCst)
    }

    /// Whether the server was provided through `test.server.url`.
    pub fn uses_remote_server(&self) -> bool {
        self.uses_remote_server
    }

    /// Whether [`cleanup`](Self::cleanup) uninstalls bundles.
    pub fn uninstalls_bundles(&self) -> bool {
        self.uninstall_bundles
    }

    pub fn id(&self) -> SetupId {
        self.id
    }

    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<InstanceState> {
        &self.state
    }
}
