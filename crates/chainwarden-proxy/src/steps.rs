//! Setup steps backed by the proxy.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use chainwarden_core::{Platform, SetupStep};

use crate::ca::ProxyCa;
use crate::process::ProxyController;

/// Trusts the proxy's root CA.
pub struct ProxyCaStep {
    ca: ProxyCa,
    proxy: Arc<dyn ProxyController>,
}

impl ProxyCaStep {
    pub fn new(ca: ProxyCa, proxy: Arc<dyn ProxyController>) -> Self {
        Self { ca, proxy }
    }
}

#[async_trait]
impl SetupStep for ProxyCaStep {
    fn install_name(&self) -> &str {
        "Install Proxy CA"
    }

    fn install_description(&self) -> &str {
        "Installs the Chainwarden proxy certificate authority"
    }

    fn uninstall_name(&self) -> &str {
        "Uninstall Proxy CA"
    }

    fn uninstall_description(&self) -> &str {
        "Uninstalls the Chainwarden proxy certificate authority"
    }

    async fn install(&self) -> anyhow::Result<()> {
        if self.ca.is_installed() {
            info!("Proxy CA already installed");
            return Ok(());
        }
        self.ca
            .install(self.proxy.as_ref())
            .await
            .context("failed to install proxy CA")
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        self.ca
            .uninstall()
            .await
            .context("failed to uninstall proxy CA")
    }
}

/// Routes system traffic through the proxy.
///
/// Remembers the URL it applied so [`refresh`](Self::refresh) can follow the
/// proxy to new ports after a restart.
pub struct SystemProxyStep {
    platform: Arc<dyn Platform>,
    proxy: Arc<dyn ProxyController>,
    applied: Mutex<Option<String>>,
}

impl SystemProxyStep {
    pub fn new(platform: Arc<dyn Platform>, proxy: Arc<dyn ProxyController>) -> Self {
        Self {
            platform,
            proxy,
            applied: Mutex::new(None),
        }
    }

    fn current_url(&self) -> anyhow::Result<String> {
        let endpoints = self
            .proxy
            .endpoints()
            .context("proxy addresses are not known")?;
        Ok(endpoints.proxy_http_url())
    }

    /// Sets the system proxy to `url` and reads it back.
    async fn apply(&self, url: &str) -> anyhow::Result<()> {
        self.platform
            .set_system_proxy(url)
            .await
            .with_context(|| format!("failed to set system proxy to {url}"))?;

        let applied = self
            .platform
            .is_system_proxy_set(url)
            .await
            .context("failed to read back system proxy")?;
        if !applied {
            bail!("system proxy does not point at {url} after setting it");
        }

        *self.applied.lock() = Some(url.to_string());
        info!(%url, "System proxy set");
        Ok(())
    }

    /// Re-applies the system proxy if the proxy moved since it was set.
    ///
    /// Returns whether the setting changed. Does nothing while the step is
    /// not installed.
    pub async fn refresh(&self) -> anyhow::Result<bool> {
        let Some(applied) = self.applied.lock().clone() else {
            return Ok(false);
        };
        let url = self.current_url()?;
        if url == applied {
            return Ok(false);
        }

        info!(from = %applied, to = %url, "Proxy moved, updating system proxy");
        self.apply(&url).await?;
        Ok(true)
    }
}

#[async_trait]
impl SetupStep for SystemProxyStep {
    fn install_name(&self) -> &str {
        "Set System Proxy"
    }

    fn install_description(&self) -> &str {
        "Configures the system-level proxy to route traffic through the Chainwarden proxy"
    }

    fn uninstall_name(&self) -> &str {
        "Remove System Proxy"
    }

    fn uninstall_description(&self) -> &str {
        "Removes the system-level proxy configuration that routes traffic through the Chainwarden proxy"
    }

    async fn install(&self) -> anyhow::Result<()> {
        let url = self.current_url()?;
        self.apply(&url).await
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        self.platform
            .unset_system_proxy()
            .await
            .context("failed to unset system proxy")?;
        *self.applied.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePlatform, FakeProxy};
    use chainwarden_core::SetupRunner;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn ca_step_skips_when_marker_present() {
        let temp = tempfile::TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new(temp.path()));
        let ca = ProxyCa::new(platform.clone());
        std::fs::create_dir_all(temp.path().join("run")).unwrap();
        std::fs::File::create(platform.paths().proxy_ca_marker_path()).unwrap();

        let step = ProxyCaStep::new(ca, Arc::new(FakeProxy::stopped()));
        step.install().await.unwrap();

        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn system_proxy_step_needs_endpoints() {
        let temp = tempfile::TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new(temp.path()));
        let step = SystemProxyStep::new(platform.clone(), Arc::new(FakeProxy::stopped()));

        assert!(step.install().await.is_err());
        assert_eq!(platform.proxy_url(), None);
    }

    #[tokio::test]
    async fn runner_installs_ca_then_proxy_and_reverses() {
        let temp = tempfile::TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new(temp.path()));
        let proxy: Arc<dyn ProxyController> = Arc::new(FakeProxy::ready());
        let steps: Vec<Arc<dyn SetupStep>> = vec![
            Arc::new(ProxyCaStep::new(ProxyCa::new(platform.clone()), proxy.clone())),
            Arc::new(SystemProxyStep::new(platform.clone(), proxy)),
        ];
        let runner = SetupRunner::new(steps, platform.paths().setup_marker_path());
        let cancel = CancellationToken::new();

        runner.install(&cancel).await.unwrap();
        assert_eq!(
            platform.calls(),
            vec![
                "install_proxy_ca",
                "is_proxy_ca_installed",
                "set_system_proxy",
                "is_system_proxy_set"
            ]
        );
        assert_eq!(platform.proxy_url().as_deref(), Some("http://127.0.0.1:41000"));

        runner.uninstall(&cancel).await.unwrap();
        assert_eq!(
            &platform.calls()[4..],
            &["unset_system_proxy", "uninstall_proxy_ca"]
        );
        assert!(!runner.is_complete());
    }

    #[tokio::test]
    async fn system_proxy_that_does_not_stick_fails_install() {
        let temp = tempfile::TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new(temp.path()).ignoring_proxy());
        let step = SystemProxyStep::new(platform.clone(), Arc::new(FakeProxy::ready()));

        let err = step.install().await.unwrap_err();

        assert!(err.to_string().contains("does not point at"));
        assert_eq!(platform.calls(), vec!["set_system_proxy", "is_system_proxy_set"]);
    }

    #[tokio::test]
    async fn refresh_follows_the_proxy_to_new_ports() {
        let temp = tempfile::TempDir::new().unwrap();
        let platform = Arc::new(FakePlatform::new(temp.path()));
        let proxy = Arc::new(FakeProxy::ready());
        let step = SystemProxyStep::new(platform.clone(), proxy.clone());

        // Nothing to follow before install.
        assert!(!step.refresh().await.unwrap());
        assert!(platform.calls().is_empty());

        step.install().await.unwrap();
        assert!(!step.refresh().await.unwrap());

        proxy.listen_on(42000);
        assert!(step.refresh().await.unwrap());
        assert_eq!(platform.proxy_url().as_deref(), Some("http://127.0.0.1:42000"));

        step.uninstall().await.unwrap();
        proxy.listen_on(43000);
        assert!(!step.refresh().await.unwrap());
        assert_eq!(platform.proxy_url(), None);
    }
}
