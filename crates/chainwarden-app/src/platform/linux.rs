//! Linux: distro trust anchors and GNOME proxy settings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{info, warn};

use chainwarden_core::{Platform, PlatformError, PlatformPaths};

use super::{running_as_root, run, spawn, split_proxy_url, wrapped_args, PROXY_CA_FILE_NAME};

/// Trust anchor directories and the command that rebuilds the bundle after a change.
const TRUST_ANCHORS: [(&str, &[&str]); 3] = [
    // Debian, Ubuntu
    ("/usr/local/share/ca-certificates", &["update-ca-certificates"]),
    // Fedora, RHEL
    ("/etc/pki/ca-trust/source/anchors", &["update-ca-trust", "extract"]),
    // Arch
    ("/etc/ca-certificates/trust-source/anchors", &["trust", "extract-compat"]),
];

pub(super) fn system_paths() -> PlatformPaths {
    let home_dir = std::env::var("SUDO_USER")
        .ok()
        .filter(|user| !user.is_empty() && user != "root")
        .map(|user| PathBuf::from("/home").join(user))
        .unwrap_or_else(|| PathBuf::from("/root"));

    let binary_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("/usr/lib/chainwarden"));

    PlatformPaths::new(
        home_dir,
        "/var/log/chainwarden",
        "/var/lib/chainwarden/run",
        binary_dir,
    )
}

pub struct LinuxPlatform {
    paths: PlatformPaths,
}

impl LinuxPlatform {
    pub fn new(paths: PlatformPaths) -> Self {
        Self { paths }
    }

    /// Runs a command with root privileges, prompting through pkexec on a desktop session.
    async fn privileged(&self, args: &[&str]) -> Result<String, PlatformError> {
        if running_as_root() {
            return run(args[0], &args[1..]).await;
        }

        let elevation =
            if std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some() {
                "pkexec"
            } else {
                "sudo"
            };
        run(elevation, args).await
    }

    /// Runs `gsettings` as the desktop user and returns its output.
    async fn gsettings(&self, args: &[&str]) -> Result<String, PlatformError> {
        if running_as_root() {
            let user = console_user().await?;
            let mut sudo_args = vec!["-u", user.as_str(), "gsettings"];
            sudo_args.extend_from_slice(args);
            run("sudo", &sudo_args).await
        } else {
            run("gsettings", args).await
        }
    }
}

/// Strips the quoting `gsettings get` puts around string values.
fn gsettings_value(output: &str) -> &str {
    output.trim().trim_matches('\'')
}

/// The non-root user the daemon acts on behalf of.
async fn console_user() -> Result<String, PlatformError> {
    if let Ok(user) = std::env::var("SUDO_USER") {
        if !user.is_empty() && user != "root" {
            return Ok(user);
        }
    }

    let output = run("logname", std::iter::empty::<&str>())
        .await
        .map_err(|_| PlatformError::NoConsoleUser)?;
    match output.trim() {
        "" | "root" => Err(PlatformError::NoConsoleUser),
        user => Ok(user.to_string()),
    }
}

#[async_trait]
impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn paths(&self) -> &PlatformPaths {
        &self.paths
    }

    async fn set_system_proxy(&self, url: &str) -> Result<(), PlatformError> {
        let (host, port) = split_proxy_url(url)?;
        let port = port.to_string();

        self.gsettings(&["set", "org.gnome.system.proxy", "mode", "manual"])
            .await?;
        for schema in ["org.gnome.system.proxy.http", "org.gnome.system.proxy.https"] {
            self.gsettings(&["set", schema, "host", host.as_str()]).await?;
            self.gsettings(&["set", schema, "port", port.as_str()]).await?;
        }

        info!(%url, "System proxy set");
        Ok(())
    }

    async fn unset_system_proxy(&self) -> Result<(), PlatformError> {
        self.gsettings(&["set", "org.gnome.system.proxy", "mode", "none"])
            .await?;
        info!("System proxy removed");
        Ok(())
    }

    async fn is_system_proxy_set(&self, url: &str) -> Result<bool, PlatformError> {
        let (host, port) = split_proxy_url(url)?;
        let port = port.to_string();

        let mode = self
            .gsettings(&["get", "org.gnome.system.proxy", "mode"])
            .await?;
        if gsettings_value(&mode) != "manual" {
            return Ok(false);
        }

        for schema in ["org.gnome.system.proxy.http", "org.gnome.system.proxy.https"] {
            let set_host = self.gsettings(&["get", schema, "host"]).await?;
            let set_port = self.gsettings(&["get", schema, "port"]).await?;
            if gsettings_value(&set_host) != host || gsettings_value(&set_port) != port {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn install_proxy_ca(&self, cert_path: &Path) -> Result<(), PlatformError> {
        let (dir, update) = TRUST_ANCHORS
            .iter()
            .find(|(dir, _)| Path::new(dir).is_dir())
            .ok_or(PlatformError::Unsupported("no known CA trust anchor directory"))?;

        let dest = Path::new(dir).join(PROXY_CA_FILE_NAME);
        let source = cert_path.to_string_lossy();
        let dest = dest.to_string_lossy();

        self.privileged(&["cp", &*source, &*dest]).await?;
        self.privileged(update).await?;

        info!(anchor = %dest, "Proxy CA added to system trust store");
        Ok(())
    }

    async fn is_proxy_ca_installed(&self) -> bool {
        TRUST_ANCHORS
            .iter()
            .any(|(dir, _)| Path::new(dir).join(PROXY_CA_FILE_NAME).exists())
    }

    async fn uninstall_proxy_ca(&self) -> Result<(), PlatformError> {
        let mut first_error = None;

        for (dir, update) in TRUST_ANCHORS {
            let anchor = Path::new(dir).join(PROXY_CA_FILE_NAME);
            if !anchor.exists() {
                continue;
            }

            let anchor = anchor.to_string_lossy();
            let result = match self.privileged(&["rm", "-f", &*anchor]).await {
                Ok(_) => self.privileged(update).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(%anchor, error = %e, "Failed to remove proxy CA anchor");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn run_as_current_user(
        &self,
        binary: &Path,
        args: &[String],
    ) -> Result<Child, PlatformError> {
        if !running_as_root() {
            return spawn(binary, args);
        }

        let user = console_user().await?;
        spawn("sudo", &wrapped_args(&["-u", user.as_str()], binary, args))
    }
}
