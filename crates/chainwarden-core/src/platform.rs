//! Platform capability contract.
//!
//! Everything the daemon needs from the operating system goes through the
//! [`Platform`] trait: trust store changes, system proxy configuration and
//! launching processes in the console user's session. One implementation per
//! OS is selected at process startup and injected into the supervisor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::{BaseDirs, ProjectDirs};
use tokio::process::Child;

use crate::error::{ConfigError, PlatformError};
use crate::logs::LogFile;

/// File name of the daemon's own log.
pub const DAEMON_LOG_NAME: &str = "chainwarden-daemon.log";

/// File name the proxy writes its log to.
pub const PROXY_LOG_NAME: &str = "chainwarden-proxy.log";

/// Marker written once the setup runner completed an install.
pub const SETUP_FINISHED_MARKER: &str = ".setup_finished";

/// Marker written once the proxy CA is in the system trust store.
pub const PROXY_CA_MARKER: &str = ".proxy_ca_installed";

/// Where the proxy CA certificate is downloaded to before installation.
pub const PROXY_CA_CERT_NAME: &str = "proxy-ca.pem";

#[cfg(windows)]
const PROXY_BINARY_NAME: &str = "chainwarden-proxy.exe";
#[cfg(not(windows))]
const PROXY_BINARY_NAME: &str = "chainwarden-proxy";

#[cfg(windows)]
const UI_BINARY_NAME: &str = "chainwarden-ui.exe";
#[cfg(not(windows))]
const UI_BINARY_NAME: &str = "chainwarden-ui";

/// Directories the daemon works in, resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPaths {
    /// Home directory of the user being protected.
    pub home_dir: PathBuf,
    /// Directory for daemon and proxy logs.
    pub log_dir: PathBuf,
    /// Directory for runtime state: markers, address files, CA certificate.
    pub run_dir: PathBuf,
    /// Directory holding the proxy and UI binaries.
    pub binary_dir: PathBuf,
}

impl PlatformPaths {
    /// Creates paths from explicit directories.
    pub fn new(
        home_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        run_dir: impl Into<PathBuf>,
        binary_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            home_dir: home_dir.into(),
            log_dir: log_dir.into(),
            run_dir: run_dir.into(),
            binary_dir: binary_dir.into(),
        }
    }

    /// Per-user layout under the application data directory.
    ///
    /// Binaries are looked up next to the running executable.
    pub fn user_default() -> Result<Self, ConfigError> {
        let base = BaseDirs::new().ok_or(ConfigError::NoDirectories)?;
        let project =
            ProjectDirs::from("", "chainwarden", "Chainwarden").ok_or(ConfigError::NoDirectories)?;

        let binary_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            home_dir: base.home_dir().to_path_buf(),
            log_dir: project.data_dir().join("logs"),
            run_dir: project.data_dir().join("run"),
            binary_dir,
        })
    }

    /// Places every directory under a single root. Used by tests and portable installs.
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join("home"),
            root.join("logs"),
            root.join("run"),
            root.join("bin"),
        )
    }

    /// Creates the log and run directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.run_dir)
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.log_dir.join(DAEMON_LOG_NAME)
    }

    pub fn proxy_log_path(&self) -> PathBuf {
        self.log_dir.join(PROXY_LOG_NAME)
    }

    pub fn setup_marker_path(&self) -> PathBuf {
        self.run_dir.join(SETUP_FINISHED_MARKER)
    }

    pub fn proxy_ca_marker_path(&self) -> PathBuf {
        self.run_dir.join(PROXY_CA_MARKER)
    }

    pub fn proxy_ca_cert_path(&self) -> PathBuf {
        self.run_dir.join(PROXY_CA_CERT_NAME)
    }

    /// File the proxy writes its listening address to.
    pub fn proxy_addr_file(&self) -> PathBuf {
        self.run_dir.join("proxy.addr.txt")
    }

    /// File the proxy writes its meta (health, CA, PAC) address to.
    pub fn meta_addr_file(&self) -> PathBuf {
        self.run_dir.join("meta.addr.txt")
    }

    pub fn proxy_binary_path(&self) -> PathBuf {
        self.binary_dir.join(PROXY_BINARY_NAME)
    }

    pub fn ui_binary_path(&self) -> PathBuf {
        self.binary_dir.join(UI_BINARY_NAME)
    }
}

/// Operating system capabilities consumed by the daemon.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Short name for logs, e.g. `"linux"`.
    fn name(&self) -> &'static str;

    /// Resolved working directories.
    fn paths(&self) -> &PlatformPaths;

    /// Routes system traffic through the given proxy URL.
    async fn set_system_proxy(&self, url: &str) -> Result<(), PlatformError>;

    /// Removes the system proxy configuration.
    async fn unset_system_proxy(&self) -> Result<(), PlatformError>;

    /// Reads the system proxy configuration back and reports whether it
    /// routes through `url`.
    async fn is_system_proxy_set(&self, url: &str) -> Result<bool, PlatformError>;

    /// Adds the certificate at `cert_path` to the system trust store.
    async fn install_proxy_ca(&self, cert_path: &Path) -> Result<(), PlatformError>;

    /// Checks the system trust store for the proxy CA.
    async fn is_proxy_ca_installed(&self) -> bool;

    /// Removes the proxy CA from the system trust store.
    async fn uninstall_proxy_ca(&self) -> Result<(), PlatformError>;

    /// Spawns `binary` inside the interactive user's session.
    async fn run_as_current_user(
        &self,
        binary: &Path,
        args: &[String],
    ) -> Result<Child, PlatformError>;

    /// Opens the daemon log for appending.
    fn log_writer(&self) -> std::io::Result<LogFile> {
        let paths = self.paths();
        std::fs::create_dir_all(&paths.log_dir)?;
        LogFile::open(paths.daemon_log_path())
    }
}
