//! Additional bundle discovery and installation.
//!
//! Bundles to install are picked from one or more directories by filename
//! prefix selectors, so a test run can ship a folder of archives and choose
//! (and order) the ones it needs purely through properties.

use crate::client::AdminClient;
use crate::config::{
    ADDITIONAL_BUNDLES_PATH, BUNDLE_TO_INSTALL_PREFIX, BundleSettings,
    LEGACY_BUNDLE_TO_INSTALL_PREFIX, Properties,
};
use crate::error::{Error, Result};
use crate::state::{BundlePhase, InstanceState};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Archive extension of candidate bundles.
pub const BUNDLE_EXTENSION: &str = ".jar";

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
const SYMBOLIC_NAME_HEADER: &str = "Bundle-SymbolicName";

/// A bundle archive and its symbolic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub path: PathBuf,
    pub symbolic_name: String,
}

impl BundleFile {
    /// Resolves the symbolic name of `path` through `client`.
    pub fn resolve(client: &dyn AdminClient, path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            symbolic_name: client.bundle_symbolic_name(path)?,
        })
    }
}

/// Returns the `Bundle-SymbolicName` of a bundle archive, without attributes.
pub fn bundle_symbolic_name(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Other(format!("{} is not a valid archive: {}", path.display(), e)))?;
    let mut manifest = String::new();
    archive
        .by_name(MANIFEST_PATH)
        .map_err(|e| Error::Other(format!("No manifest in {}: {}", path.display(), e)))?
        .read_to_string(&mut manifest)?;

    symbolic_name_from_manifest(&manifest).ok_or_else(|| {
        Error::Other(format!(
            "{} header not found in {}",
            SYMBOLIC_NAME_HEADER,
            path.display()
        ))
    })
}

/// Extracts the symbolic name from manifest text.
///
/// Continuation lines (starting with a single space) are joined first, and
/// directives such as `;singleton:=true` are dropped.
pub fn symbolic_name_from_manifest(manifest: &str) -> Option<String> {
    let mut headers: Vec<String> = Vec::new();
    for line in manifest.lines() {
        if let (Some(continued), Some(last)) = (line.strip_prefix(' '), headers.last_mut()) {
            last.push_str(continued);
            continue;
        }
        headers.push(line.to_string());
    }

    headers.iter().find_map(|header| {
        let (name, value) = header.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case(SYMBOLIC_NAME_HEADER) {
            return None;
        }
        let name = value.split(';').next().unwrap_or_default().trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Bundles selected for installation across every configured directory.
///
/// The directory list is comma separated. Unreadable directories are logged
/// and skipped.
pub fn bundles_to_install(props: &Properties) -> Vec<PathBuf> {
    let Some(paths) = props.get(ADDITIONAL_BUNDLES_PATH) else {
        return Vec::new();
    };

    paths
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .flat_map(|path| bundles_in_directory(Path::new(path), props))
        .collect()
}

/// Like [`bundles_to_install`], scanning the directories on the blocking pool.
pub async fn discover_bundles(props: &Properties) -> Result<Vec<PathBuf>> {
    let props = props.clone();
    tokio::task::spawn_blocking(move || bundles_to_install(&props))
        .await
        .map_err(|e| Error::Other(format!("Bundle discovery failed: {}", e)))
}

/// Filename prefixes in ascending key order. The legacy prefix is only
/// consulted when no current selector is set.
fn selectors(props: &Properties) -> Vec<&str> {
    let current: Vec<&str> = props
        .with_prefix(BUNDLE_TO_INSTALL_PREFIX)
        .map(|(_, prefix)| prefix)
        .collect();
    if !current.is_empty() {
        return current;
    }
    props
        .with_prefix(LEGACY_BUNDLE_TO_INSTALL_PREFIX)
        .map(|(_, prefix)| prefix)
        .collect()
}

/// Bundles selected from one directory.
///
/// Selector properties are applied in ascending key order; each appends
/// every archive whose file name starts with its value, in file name order.
/// Overlapping prefixes select a file more than once.
pub fn bundles_in_directory(dir: &Path, props: &Properties) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) if dir.is_dir() => entries,
        _ => {
            tracing::info!(directory = %dir.display(), "Cannot read additional bundles directory, ignored");
            return Vec::new();
        }
    };

    let mut candidates: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(BUNDLE_EXTENSION))
        .collect();
    candidates.sort();

    let candidates = &candidates;
    selectors(props)
        .into_iter()
        .flat_map(move |prefix| {
            candidates
                .iter()
                .filter(move |name| name.starts_with(prefix))
                .map(move |name| dir.join(name))
        })
        .collect()
}

/// Installs and starts the additional bundles of an instance, once.
pub struct BundleInstaller {
    state: Arc<InstanceState>,
    client: Arc<dyn AdminClient>,
    settings: BundleSettings,
}

impl BundleInstaller {
    pub fn new(
        state: Arc<InstanceState>,
        client: Arc<dyn AdminClient>,
        settings: BundleSettings,
    ) -> Self {
        Self {
            state,
            client,
            settings,
        }
    }

    /// Installs `files` without starting them, waits until the server lists
    /// them all, then starts them and waits until all are active.
    ///
    /// A failure is recorded on the instance and reported again on every
    /// later call without contacting the server.
    #[tracing::instrument(skip(self, files), fields(instance = %self.state.name(), count = files.len()))]
    pub async fn install_additional_bundles(&self, files: &[PathBuf]) -> Result<()> {
        match self.state.bundles() {
            BundlePhase::Failed => return Err(Error::InstallationFailedPreviously),
            BundlePhase::Installed => return Ok(()),
            BundlePhase::Pending => {}
        }

        if files.is_empty() {
            tracing::info!(
                "Not installing additional bundles, probably property {} not set",
                ADDITIONAL_BUNDLES_PATH
            );
            self.state.mark_bundles_installed();
            return Ok(());
        }

        match self.install_and_start(files).await {
            Ok(()) => {
                tracing::info!("Additional bundles installed and started");
                self.state.mark_bundles_installed();
                Ok(())
            }
            Err(e) => {
                tracing::info!(error = %e, "Exception while installing additional bundles");
                self.state.mark_bundles_failed();
                Err(Error::InstallationFailure(format!(
                    "{:?}: {}",
                    files.iter().map(|f| f.display().to_string()).collect::<Vec<_>>(),
                    e
                )))
            }
        }
    }

    async fn install_and_start(&self, files: &[PathBuf]) -> Result<()> {
        self.client.install_bundles(files, false).await?;

        let names = self
            .resolve_all(files)
            .await?
            .into_iter()
            .map(|bundle| bundle.map(|b| b.symbolic_name))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(bundles = ?names, "Waiting for bundles to be installed");

        self.client
            .wait_for_bundles_installed(&names, self.settings.install_timeout())
            .await?;
        self.client
            .wait_for_bundles_started(&names, self.settings.start_timeout())
            .await
    }

    /// Reads the manifests of `files` on the blocking pool.
    async fn resolve_all(&self, files: &[PathBuf]) -> Result<Vec<Result<BundleFile>>> {
        let client = Arc::clone(&self.client);
        let files = files.to_vec();
        tokio::task::spawn_blocking(move || {
            files
                .iter()
                .map(|f| BundleFile::resolve(client.as_ref(), f))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Other(format!("Reading bundle manifests failed: {}", e)))
    }

    /// Uninstalls `files`, whatever the installation outcome was.
    pub async fn uninstall_bundles(&self, files: &[PathBuf]) -> Result<()> {
        let names: Vec<String> = self
            .resolve_all(files)
            .await?
            .into_iter()
            .zip(files)
            .filter_map(|(bundle, f)| match bundle {
                Ok(bundle) => Some(bundle.symbolic_name),
                Err(e) => {
                    tracing::info!(file = %f.display(), error = %e, "Cannot determine bundle symbolic name");
                    None
                }
            })
            .collect();

        if names.is_empty() {
            return Ok(());
        }
        self.client.uninstall_bundles(&names).await
    }
}
