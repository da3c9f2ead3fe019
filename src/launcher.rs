// src/launcher.rs
use crate::config::Properties;
use crate::error::{Error, Result};
use async_process::{Child, Command, Stdio};
use regex::Regex;
use std::path::{Path, PathBuf};

pub const JAR_SERVER_PORT: &str = "jar.executor.server.port";
pub const JAR_FOLDER: &str = "jar.executor.jar.folder";
pub const JAR_NAME_REGEXP: &str = "jar.executor.jar.name.regexp";
pub const JAVA_EXECUTABLE: &str = "jar.executor.java.executable";
pub const VM_OPTIONS: &str = "jar.executor.vm.options";
pub const JAR_OPTIONS: &str = "jar.executor.jar.options";
pub const WORK_FOLDER: &str = "jar.executor.work.folder";

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_JAR_FOLDER: &str = "target/dependency";
pub const DEFAULT_JAR_NAME_REGEXP: &str = r".*\.jar$";

/// Starts the server process and reports where it listens.
///
/// A launcher is owned by the [`InstanceState`](crate::state::InstanceState)
/// and started at most once.
pub trait ProcessLauncher: Send {
    /// Start the server process.
    fn start(&mut self) -> Result<()>;

    /// Port the server listens on once started.
    fn server_port(&self) -> u16;
}

/// Status of a launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherStatus {
    /// Not started yet
    Idle,
    /// Process spawned
    Running,
    /// Spawning failed
    Failed,
}

/// Settings of a [`JarLauncher`].
#[derive(Debug, Clone, PartialEq)]
pub struct JarLauncherConfig {
    pub port: u16,
    /// Folder searched for the runnable jar.
    pub jar_folder: PathBuf,
    /// Pattern the jar file name must match; the first match in name order wins.
    pub jar_name_regexp: String,
    pub java_executable: String,
    pub vm_options: Vec<String>,
    pub jar_options: Vec<String>,
    pub work_folder: Option<PathBuf>,
}

impl JarLauncherConfig {
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let port = match props.get_non_blank(JAR_SERVER_PORT) {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::ConfigInvalid(format!(
                    "Property '{}' is not a port number: '{}'",
                    JAR_SERVER_PORT, raw
                ))
            })?,
        };

        let jar_options = match props.get_non_blank(JAR_OPTIONS) {
            Some(opts) => split_options(opts),
            None => vec!["-p".to_string(), port.to_string()],
        };

        Ok(Self {
            port,
            jar_folder: PathBuf::from(props.get_non_blank(JAR_FOLDER).unwrap_or(DEFAULT_JAR_FOLDER)),
            jar_name_regexp: props
                .get_non_blank(JAR_NAME_REGEXP)
                .unwrap_or(DEFAULT_JAR_NAME_REGEXP)
                .to_string(),
            java_executable: props
                .get_non_blank(JAVA_EXECUTABLE)
                .unwrap_or("java")
                .to_string(),
            vm_options: props.get_non_blank(VM_OPTIONS).map(split_options).unwrap_or_default(),
            jar_options,
            work_folder: props.get_non_blank(WORK_FOLDER).map(PathBuf::from),
        })
    }
}

fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

/// Runs the server from a runnable jar with `java -jar`.
pub struct JarLauncher {
    config: JarLauncherConfig,
    child: Option<Child>,
    status: LauncherStatus,
}

impl JarLauncher {
    pub fn new(config: JarLauncherConfig) -> Self {
        Self {
            config,
            child: None,
            status: LauncherStatus::Idle,
        }
    }

    pub fn from_properties(props: &Properties) -> Result<Self> {
        Ok(Self::new(JarLauncherConfig::from_properties(props)?))
    }

    pub fn config(&self) -> &JarLauncherConfig {
        &self.config
    }

    pub fn status(&self) -> LauncherStatus {
        self.status
    }

    /// Locate the runnable jar
    pub fn find_jar(&self) -> Result<PathBuf> {
        find_jar(&self.config.jar_folder, &self.config.jar_name_regexp)
    }

    /// The full command line, program first.
    pub fn command_line(&self, jar: &Path) -> Vec<String> {
        let mut line = vec![self.config.java_executable.clone()];
        line.extend(self.config.vm_options.iter().cloned());
        line.push("-jar".to_string());
        line.push(jar.display().to_string());
        line.extend(self.config.jar_options.iter().cloned());
        line
    }
}

impl ProcessLauncher for JarLauncher {
    fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let jar = match self.find_jar() {
            Ok(jar) => jar,
            Err(e) => {
                self.status = LauncherStatus::Failed;
                return Err(e);
            }
        };
        let line = self.command_line(&jar);
        tracing::info!(command = ?line, port = self.config.port, "Starting server jar");

        let mut command = Command::new(&line[0]);
        command.args(&line[1..]);
        if let Some(dir) = &self.config.work_folder {
            command.current_dir(dir);
        }

        // The server lives as long as this process
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            self.status = LauncherStatus::Failed;
            tracing::error!(error = %e, "Failed to start server jar");
            Error::Process(format!("Failed to start process: {}", e))
        })?;

        self.child = Some(child);
        self.status = LauncherStatus::Running;

        Ok(())
    }

    fn server_port(&self) -> u16 {
        self.config.port
    }
}

fn find_jar(folder: &Path, name_regexp: &str) -> Result<PathBuf> {
    let pattern = Regex::new(name_regexp).map_err(|e| {
        Error::ConfigInvalid(format!("Invalid '{}' pattern: {}", JAR_NAME_REGEXP, e))
    })?;

    let entries = std::fs::read_dir(folder).map_err(|e| {
        Error::Process(format!("Cannot read jar folder {}: {}", folder.display(), e))
    })?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| pattern.is_match(name))
        .collect();
    names.sort();

    names
        .into_iter()
        .next()
        .map(|name| folder.join(name))
        .ok_or_else(|| {
            Error::Process(format!(
                "No file matching '{}' found in {}",
                name_regexp,
                folder.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JarLauncherConfig::from_properties(&Properties::new()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.jar_folder, PathBuf::from(DEFAULT_JAR_FOLDER));
        assert_eq!(config.java_executable, "java");
        assert_eq!(config.jar_options, vec!["-p", "8765"]);
        assert!(config.vm_options.is_empty());
    }

    #[test]
    fn test_invalid_port() {
        let props = Properties::new().with(JAR_SERVER_PORT, "eighty");
        assert!(matches!(
            JarLauncherConfig::from_properties(&props),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_command_line() {
        let props = Properties::new()
            .with(JAR_SERVER_PORT, "4502")
            .with(VM_OPTIONS, "-Xmx512m  -Dfoo=bar")
            .with(JAVA_EXECUTABLE, "/opt/java/bin/java");
        let launcher = JarLauncher::from_properties(&props).unwrap();

        let line = launcher.command_line(Path::new("server.jar"));
        assert_eq!(
            line,
            vec![
                "/opt/java/bin/java",
                "-Xmx512m",
                "-Dfoo=bar",
                "-jar",
                "server.jar",
                "-p",
                "4502"
            ]
        );
    }

    #[test]
    fn test_find_jar_picks_first_match() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["server-2.0.jar", "server-1.0.jar", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let jar = find_jar(dir.path(), r"^server-.*\.jar$").unwrap();
        assert_eq!(jar, dir.path().join("server-1.0.jar"));

        assert!(matches!(
            find_jar(dir.path(), r"^client.*\.jar$"),
            Err(Error::Process(_))
        ));
    }

    #[test]
    fn test_start_without_jar_fails() {
        let dir = tempfile::tempdir().unwrap();
        let props = Properties::new().with(JAR_FOLDER, dir.path().to_string_lossy().to_string());
        let mut launcher = JarLauncher::from_properties(&props).unwrap();

        assert!(launcher.start().is_err());
        assert_eq!(launcher.status(), LauncherStatus::Failed);
    }
}
