//! macOS: System keychain trust and per-service `networksetup` proxies.
//!
//! The daemon normally runs as root under launchd. Trust changes must be
//! made from the console user's audit session so the user gets the keychain
//! authorization prompt, hence `launchctl asuser`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Child;
use tracing::{info, warn};

use chainwarden_core::{Platform, PlatformError, PlatformPaths};

use super::{running_as_root, run, spawn, split_proxy_url, wrapped_args, PROXY_CA_COMMON_NAME};

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";
const SUPPORT_DIR: &str = "/Library/Application Support/Chainwarden";
const LOG_DIR: &str = "/Library/Logs/Chainwarden";

static SERVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((\d+)\)\s+(.+)$").expect("valid regex"));
static DEVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Device:\s*(en\d+)").expect("valid regex"));
static SHA1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SHA-1 hash:\s*([A-F0-9]+)").expect("valid regex"));

pub(super) fn system_paths() -> PlatformPaths {
    let home_dir = std::process::Command::new("stat")
        .args(["-f", "%Su %u", "/dev/console"])
        .output()
        .ok()
        .and_then(|out| parse_console_user(&String::from_utf8_lossy(&out.stdout)))
        .map(|(user, _)| PathBuf::from("/Users").join(user))
        .unwrap_or_else(|| PathBuf::from("/var/root"));

    PlatformPaths::new(
        home_dir,
        LOG_DIR,
        Path::new(SUPPORT_DIR).join("run"),
        Path::new(SUPPORT_DIR).join("bin"),
    )
}

/// Parses `stat -f "%Su %u" /dev/console` into the user name and uid.
///
/// `None` when nobody is logged in at the console.
pub(super) fn parse_console_user(output: &str) -> Option<(String, u32)> {
    let mut fields = output.split_whitespace();
    let user = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    if user == "root" || fields.next().is_some() {
        return None;
    }
    Some((user.to_string(), uid))
}

/// Network services backed by a physical `en*` interface, in service order.
pub(super) fn parse_network_services(output: &str) -> Vec<String> {
    let mut services = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines().map(str::trim) {
        // Disabled services are listed with an asterisk instead of an index.
        if line.starts_with('*') || line.starts_with("(*)") {
            current = None;
            continue;
        }
        if let Some(caps) = SERVICE_RE.captures(line) {
            current = Some(caps[2].to_string());
            continue;
        }
        if DEVICE_RE.is_match(line) {
            if let Some(service) = current.take() {
                services.push(service);
            }
        }
    }
    services
}

/// SHA-1 hashes from `security find-certificate -a -Z`.
pub(super) fn parse_sha1_hashes(output: &str) -> Vec<String> {
    SHA1_RE
        .captures_iter(output)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Host and port from `networksetup -getwebproxy`, when the proxy is enabled.
pub(super) fn parse_web_proxy(output: &str) -> Option<(String, u16)> {
    let mut enabled = false;
    let mut server = None;
    let mut port = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Enabled" => enabled = value == "Yes",
            "Server" => server = Some(value.to_string()),
            "Port" => port = value.parse().ok(),
            _ => {}
        }
    }

    if !enabled {
        return None;
    }
    Some((server?, port?))
}

pub struct MacPlatform {
    paths: PlatformPaths,
}

impl MacPlatform {
    pub fn new(paths: PlatformPaths) -> Self {
        Self { paths }
    }

    async fn console_user(&self) -> Result<(String, u32), PlatformError> {
        let output = run("stat", ["-f", "%Su %u", "/dev/console"]).await?;
        parse_console_user(&output).ok_or(PlatformError::NoConsoleUser)
    }

    /// Runs a command inside the console user's audit session.
    async fn run_in_user_session(&self, program: &str, args: &[&str]) -> Result<String, PlatformError> {
        if !running_as_root() {
            return run(program, args).await;
        }

        let (_, uid) = self.console_user().await?;
        let uid = uid.to_string();
        let mut launchctl_args = vec!["asuser", uid.as_str(), program];
        launchctl_args.extend_from_slice(args);
        run("launchctl", &launchctl_args).await
    }

    async fn network_services(&self) -> Result<Vec<String>, PlatformError> {
        let output = run("networksetup", ["-listnetworkserviceorder"]).await?;
        Ok(parse_network_services(&output))
    }
}

#[async_trait]
impl Platform for MacPlatform {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn paths(&self) -> &PlatformPaths {
        &self.paths
    }

    async fn set_system_proxy(&self, url: &str) -> Result<(), PlatformError> {
        let (host, port) = split_proxy_url(url)?;
        let port = port.to_string();

        for service in self.network_services().await? {
            info!(%service, %url, "Setting system proxy");
            let service = service.as_str();
            run("networksetup", ["-setwebproxy", service, host.as_str(), port.as_str()]).await?;
            run("networksetup", ["-setsecurewebproxy", service, host.as_str(), port.as_str()]).await?;
            run("networksetup", ["-setwebproxystate", service, "on"]).await?;
            run("networksetup", ["-setsecurewebproxystate", service, "on"]).await?;
        }
        Ok(())
    }

    async fn unset_system_proxy(&self) -> Result<(), PlatformError> {
        let mut first_error = None;

        for service in self.network_services().await? {
            info!(%service, "Removing system proxy");
            for flag in ["-setwebproxystate", "-setsecurewebproxystate"] {
                if let Err(e) = run("networksetup", [flag, service.as_str(), "off"]).await {
                    warn!(%service, error = %e, "Failed to disable proxy");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn is_system_proxy_set(&self, url: &str) -> Result<bool, PlatformError> {
        let expected = split_proxy_url(url)?;
        let services = self.network_services().await?;
        if services.is_empty() {
            return Ok(false);
        }

        for service in &services {
            for flag in ["-getwebproxy", "-getsecurewebproxy"] {
                let output = run("networksetup", [flag, service.as_str()]).await?;
                if parse_web_proxy(&output).as_ref() != Some(&expected) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn install_proxy_ca(&self, cert_path: &Path) -> Result<(), PlatformError> {
        let cert = cert_path.to_string_lossy();
        self.run_in_user_session(
            "security",
            &["add-trusted-cert", "-d", "-r", "trustRoot", "-k", SYSTEM_KEYCHAIN, &*cert],
        )
        .await?;
        info!("Proxy CA added to the System keychain");
        Ok(())
    }

    async fn is_proxy_ca_installed(&self) -> bool {
        run("security", ["find-certificate", "-c", PROXY_CA_COMMON_NAME, SYSTEM_KEYCHAIN])
            .await
            .is_ok()
    }

    async fn uninstall_proxy_ca(&self) -> Result<(), PlatformError> {
        let output = run(
            "security",
            ["find-certificate", "-a", "-c", PROXY_CA_COMMON_NAME, "-Z", SYSTEM_KEYCHAIN],
        )
        .await?;

        let mut first_error = None;
        for hash in parse_sha1_hashes(&output) {
            let result = self
                .run_in_user_session("security", &["delete-certificate", "-Z", hash.as_str(), SYSTEM_KEYCHAIN])
                .await;
            if let Err(e) = result {
                warn!(%hash, error = %e, "Failed to delete proxy CA");
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

        let (_, uid) = self.console_user().await?;
        let uid = uid.to_string();
        spawn("launchctl", &wrapped_args(&["asuser", uid.as_str()], binary, args))
    }
}
