#![allow(dead_code)]

use async_trait::async_trait;
use server_setup::client::QueryParam;
use server_setup::config::{Properties, SetupConfig};
use server_setup::error::{Error, Result};
use server_setup::state::InstanceState;
use server_setup::{AdminClient, Backend, Clients, HttpClient, HttpResponse, ProcessLauncher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_PORT: u16 = 4502;

/// Launcher that only counts its starts.
pub struct CountingLauncher {
    port: u16,
    starts: Arc<AtomicUsize>,
    started: bool,
    // Simulates another party starting the server during our own start
    competitor: Option<Arc<InstanceState>>,
}

impl ProcessLauncher for CountingLauncher {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyRunning);
        }
        self.started = true;
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = &self.competitor {
            state.try_mark_started();
        }
        Ok(())
    }

    fn server_port(&self) -> u16 {
        self.port
    }
}

/// Answers every GET with a fixed body, or fails every request.
#[derive(Default)]
pub struct FakeHttp {
    body: Mutex<String>,
    failing: AtomicBool,
    calls: AtomicUsize,
    requests: Mutex<Vec<(String, Vec<QueryParam>)>>,
}

impl FakeHttp {
    pub fn answering(body: &str) -> Self {
        Self {
            body: Mutex::new(body.to_string()),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, Vec<QueryParam>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(
        &self,
        path: &str,
        params: &[QueryParam],
        expected_status: u16,
    ) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((path.to_string(), params.to_vec()));

        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".to_string()));
        }
        Ok(HttpResponse::new(
            expected_status,
            self.body.lock().unwrap().clone(),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("http://localhost:{}{}", TEST_PORT, path)
    }
}

/// Accepts every bundle operation and records uninstalls, or rejects
/// every installation.
#[derive(Default)]
pub struct FakeAdmin {
    failing: bool,
    installs: AtomicUsize,
    uninstalled: Mutex<Vec<String>>,
}

impl FakeAdmin {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdminClient for FakeAdmin {
    async fn install_bundles(&self, _files: &[PathBuf], _start: bool) -> Result<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::Transport("upload rejected".to_string()));
        }
        Ok(())
    }

    fn bundle_symbolic_name(&self, file: &Path) -> Result<String> {
        file.file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Other(format!("No file name in {}", file.display())))
    }

    async fn wait_for_bundles_installed(&self, _names: &[String], _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_bundles_started(&self, _names: &[String], _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn uninstall_bundles(&self, names: &[String]) -> Result<()> {
        self.uninstalled.lock().unwrap().extend_from_slice(names);
        Ok(())
    }
}

/// Hands out counting launchers and shared fake clients.
pub struct FakeBackend {
    pub http: Arc<FakeHttp>,
    pub admin: Arc<FakeAdmin>,
    launchers: AtomicUsize,
    starts: Arc<AtomicUsize>,
    competitor: Option<Arc<InstanceState>>,
}

impl FakeBackend {
    pub fn new(http: FakeHttp) -> Self {
        Self::with_admin(http, FakeAdmin::default())
    }

    pub fn with_admin(http: FakeHttp, admin: FakeAdmin) -> Self {
        Self {
            http: Arc::new(http),
            admin: Arc::new(admin),
            launchers: AtomicUsize::new(0),
            starts: Arc::new(AtomicUsize::new(0)),
            competitor: None,
        }
    }

    /// Launchers created by this backend mark `state` started while
    /// starting, as if another process had won the race.
    pub fn with_competitor(mut self, state: Arc<InstanceState>) -> Self {
        self.competitor = Some(state);
        self
    }

    pub fn launchers_created(&self) -> usize {
        self.launchers.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    fn create_launcher(&self, _props: &Properties) -> Result<Box<dyn ProcessLauncher>> {
        self.launchers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingLauncher {
            port: TEST_PORT,
            starts: Arc::clone(&self.starts),
            started: false,
            competitor: self.competitor.clone(),
        }))
    }

    fn create_clients(&self, _base_url: &str, _config: &SetupConfig) -> Result<Clients> {
        Ok(Clients {
            http: self.http.clone(),
            admin: self.admin.clone(),
        })
    }
}
