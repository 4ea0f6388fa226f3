//! Operating system implementations of the platform contract.
//!
//! [`current`] returns the implementation for the OS the daemon was built
//! for. Everything here shells out through `tokio::process`; none of the
//! implementations keep state besides the resolved paths.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(any(target_os = "macos", test))]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod macos;
#[cfg(windows)]
mod windows;

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::debug;

use chainwarden_core::{ConfigError, Platform, PlatformError, PlatformPaths};

/// Common name of the root certificate the proxy generates.
pub const PROXY_CA_COMMON_NAME: &str = "Chainwarden Proxy CA";

/// File name the CA is given inside system anchor directories.
pub const PROXY_CA_FILE_NAME: &str = "chainwarden-proxy-ca.crt";

/// Selects the platform implementation for this build target.
#[cfg(target_os = "linux")]
pub fn current(paths: PlatformPaths) -> Result<Arc<dyn Platform>, PlatformError> {
    Ok(Arc::new(linux::LinuxPlatform::new(paths)))
}

/// Selects the platform implementation for this build target.
#[cfg(target_os = "macos")]
pub fn current(paths: PlatformPaths) -> Result<Arc<dyn Platform>, PlatformError> {
    Ok(Arc::new(macos::MacPlatform::new(paths)))
}

/// Selects the platform implementation for this build target.
#[cfg(windows)]
pub fn current(paths: PlatformPaths) -> Result<Arc<dyn Platform>, PlatformError> {
    Ok(Arc::new(windows::WindowsPlatform::new(paths)))
}

/// Selects the platform implementation for this build target.
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub fn current(_paths: PlatformPaths) -> Result<Arc<dyn Platform>, PlatformError> {
    Err(PlatformError::Unsupported(std::env::consts::OS))
}

/// Working directories for this process.
///
/// A daemon running as root uses the system-wide layout; otherwise everything
/// lives under the per-user application data directory.
pub fn default_paths() -> Result<PlatformPaths, ConfigError> {
    if running_as_root() {
        if let Some(paths) = system_paths() {
            return Ok(paths);
        }
    }
    PlatformPaths::user_default()
}

#[cfg(target_os = "linux")]
fn system_paths() -> Option<PlatformPaths> {
    Some(linux::system_paths())
}

#[cfg(target_os = "macos")]
fn system_paths() -> Option<PlatformPaths> {
    Some(macos::system_paths())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn system_paths() -> Option<PlatformPaths> {
    None
}

#[cfg(unix)]
pub(crate) fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub(crate) fn running_as_root() -> bool {
    false
}

#[cfg(windows)]
fn hide_window(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_window(_cmd: &mut Command) {}

/// Runs a command to completion and returns its stdout.
///
/// A non-zero exit becomes [`PlatformError::Command`] carrying stderr.
pub(crate) async fn run<I, S>(program: &str, args: I) -> Result<String, PlatformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    hide_window(&mut cmd);

    debug!(program, "Running command");
    let output = cmd
        .output()
        .await
        .map_err(|e| PlatformError::command(program, e.to_string()))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match stderr.trim() {
        "" => format!("exited with {}", output.status),
        trimmed => trimmed.to_string(),
    };
    Err(PlatformError::command(program, message))
}

/// Spawns a long-running process detached from the daemon's stdio.
pub(crate) fn spawn(program: impl AsRef<OsStr>, args: &[String]) -> Result<Child, PlatformError> {
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    hide_window(&mut cmd);

    cmd.spawn()
        .map_err(|e| PlatformError::command(program.to_string_lossy(), e.to_string()))
}

/// Arguments for launching `binary` through a wrapper such as `sudo -u <user>`.
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn wrapped_args(prefix: &[&str], binary: &Path, args: &[String]) -> Vec<String> {
    prefix
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(binary.to_string_lossy().into_owned()))
        .chain(args.iter().cloned())
        .collect()
}

/// Splits `http://host:port` into its host and port.
pub(crate) fn split_proxy_url(url: &str) -> Result<(String, u16), PlatformError> {
    let invalid = || {
        PlatformError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid proxy url: {url}"),
        ))
    };

    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url)
        .trim_end_matches('/');
    let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
