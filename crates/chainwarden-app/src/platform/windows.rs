//! Windows: `certutil` machine root store and WinINet registry proxy settings.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::info;

use chainwarden_core::{Platform, PlatformError, PlatformPaths};

use super::{run, spawn, split_proxy_url, PROXY_CA_COMMON_NAME};

const INTERNET_SETTINGS: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

pub struct WindowsPlatform {
    paths: PlatformPaths,
}

impl WindowsPlatform {
    pub fn new(paths: PlatformPaths) -> Self {
        Self { paths }
    }
}

async fn set_registry_value(name: &str, kind: &str, data: &str) -> Result<(), PlatformError> {
    // /f overwrites an existing value
    run(
        "reg",
        ["add", INTERNET_SETTINGS, "/v", name, "/t", kind, "/d", data, "/f"],
    )
    .await
    .map(|_| ())
}

async fn query_registry_value(name: &str) -> Result<Option<String>, PlatformError> {
    let output = run("reg", ["query", INTERNET_SETTINGS, "/v", name]).await?;
    Ok(parse_registry_value(&output, name))
}

/// Data of `name` in `reg query` output, e.g. `ProxyEnable    REG_DWORD    0x1`.
fn parse_registry_value(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != name {
            return None;
        }
        fields.next()?;
        let data: Vec<&str> = fields.collect();
        Some(data.join(" "))
    })
}

#[async_trait]
impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn paths(&self) -> &PlatformPaths {
        &self.paths
    }

    async fn set_system_proxy(&self, url: &str) -> Result<(), PlatformError> {
        let (host, port) = split_proxy_url(url)?;
        let server = format!("{host}:{port}");

        set_registry_value("ProxyServer", "REG_SZ", &server).await?;
        set_registry_value("ProxyOverride", "REG_SZ", "<local>").await?;
        set_registry_value("ProxyEnable", "REG_DWORD", "1").await?;

        info!(%server, "System proxy set");
        Ok(())
    }

    async fn unset_system_proxy(&self) -> Result<(), PlatformError> {
        set_registry_value("ProxyEnable", "REG_DWORD", "0").await?;
        info!("System proxy removed");
        Ok(())
    }

    async fn is_system_proxy_set(&self, url: &str) -> Result<bool, PlatformError> {
        let (host, port) = split_proxy_url(url)?;

        let enabled = query_registry_value("ProxyEnable").await?;
        if enabled.as_deref() != Some("0x1") {
            return Ok(false);
        }
        let server = query_registry_value("ProxyServer").await?;
        Ok(server.as_deref() == Some(format!("{host}:{port}").as_str()))
    }

    async fn install_proxy_ca(&self, cert_path: &Path) -> Result<(), PlatformError> {
        let cert = cert_path.to_string_lossy();
        run("certutil", ["-addstore", "Root", &*cert]).await?;
        info!("Proxy CA added to the machine root store");
        Ok(())
    }

    async fn is_proxy_ca_installed(&self) -> bool {
        run("certutil", ["-verifystore", "Root", PROXY_CA_COMMON_NAME])
            .await
            .is_ok()
    }

    async fn uninstall_proxy_ca(&self) -> Result<(), PlatformError> {
        run("certutil", ["-delstore", "Root", PROXY_CA_COMMON_NAME]).await?;
        info!("Proxy CA removed from the machine root store");
        Ok(())
    }

    async fn run_as_current_user(
        &self,
        binary: &Path,
        args: &[String],
    ) -> Result<Child, PlatformError> {
        // The daemon runs in the interactive session; the child inherits it.
        spawn(binary, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_OUTPUT: &str = "\r
HKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Internet Settings\r
    ProxyServer    REG_SZ    127.0.0.1:41000\r
\r
";

    #[test]
    fn reads_registry_value_data() {
        assert_eq!(
            parse_registry_value(QUERY_OUTPUT, "ProxyServer").as_deref(),
            Some("127.0.0.1:41000")
        );
        assert_eq!(parse_registry_value(QUERY_OUTPUT, "ProxyEnable"), None);
    }
}
