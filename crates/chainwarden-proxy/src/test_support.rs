//! In-memory platform and proxy doubles.

use std::net::SocketAddr;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use chainwarden_core::{Platform, PlatformError, PlatformPaths};

use crate::endpoints::ProxyEndpoints;
use crate::error::{ProxyError, Result};
use crate::process::{ProxyController, ProxyPhase};

pub(crate) struct FakePlatform {
    paths: PlatformPaths,
    trusted: bool,
    applies_proxy: bool,
    calls: Mutex<Vec<String>>,
    proxy_url: Mutex<Option<String>>,
}

impl FakePlatform {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            paths: PlatformPaths::under(root),
            trusted: true,
            applies_proxy: true,
            calls: Mutex::new(Vec::new()),
            proxy_url: Mutex::new(None),
        }
    }

    /// The trust store never reports the CA as installed.
    pub(crate) fn untrusting(mut self) -> Self {
        self.trusted = false;
        self
    }

    /// Setting the system proxy reports success but changes nothing.
    pub(crate) fn ignoring_proxy(mut self) -> Self {
        self.applies_proxy = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn proxy_url(&self) -> Option<String> {
        self.proxy_url.lock().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn paths(&self) -> &PlatformPaths {
        &self.paths
    }

    async fn set_system_proxy(&self, url: &str) -> std::result::Result<(), PlatformError> {
        self.record("set_system_proxy");
        if self.applies_proxy {
            *self.proxy_url.lock() = Some(url.to_string());
        }
        Ok(())
    }

    async fn unset_system_proxy(&self) -> std::result::Result<(), PlatformError> {
        self.record("unset_system_proxy");
        *self.proxy_url.lock() = None;
        Ok(())
    }

    async fn is_system_proxy_set(&self, url: &str) -> std::result::Result<bool, PlatformError> {
        self.record("is_system_proxy_set");
        Ok(self.proxy_url.lock().as_deref() == Some(url))
    }

    async fn install_proxy_ca(&self, _cert_path: &Path) -> std::result::Result<(), PlatformError> {
        self.record("install_proxy_ca");
        Ok(())
    }

    async fn is_proxy_ca_installed(&self) -> bool {
        self.record("is_proxy_ca_installed");
        self.trusted
    }

    async fn uninstall_proxy_ca(&self) -> std::result::Result<(), PlatformError> {
        self.record("uninstall_proxy_ca");
        Ok(())
    }

    async fn run_as_current_user(
        &self,
        _binary: &Path,
        _args: &[String],
    ) -> std::result::Result<Child, PlatformError> {
        Err(PlatformError::Unsupported("run_as_current_user"))
    }
}

pub(crate) struct FakeProxy {
    endpoints: Mutex<Option<ProxyEndpoints>>,
}

impl FakeProxy {
    pub(crate) fn ready() -> Self {
        let proxy = Self::stopped();
        proxy.listen_on(41000);
        proxy
    }

    pub(crate) fn stopped() -> Self {
        Self {
            endpoints: Mutex::new(None),
        }
    }

    /// Moves the proxy to `port` and its meta endpoint to `port + 1`.
    pub(crate) fn listen_on(&self, port: u16) {
        *self.endpoints.lock() = Some(ProxyEndpoints {
            proxy_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            meta_addr: SocketAddr::from(([127, 0, 0, 1], port + 1)),
        });
    }
}

#[async_trait]
impl ProxyController for FakeProxy {
    async fn start(
        &self,
        _cancel: &CancellationToken,
        _ingress_addr: SocketAddr,
    ) -> Result<ProxyEndpoints> {
        self.endpoints().ok_or(ProxyError::NotStarted)
    }

    async fn is_running(&self) -> bool {
        self.endpoints().is_some()
    }

    async fn stop(&self) {}

    fn endpoints(&self) -> Option<ProxyEndpoints> {
        *self.endpoints.lock()
    }

    async fn fetch_ca_certificate(&self, dest: &Path) -> Result<()> {
        self.endpoints().ok_or(ProxyError::NotStarted)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, "-----BEGIN CERTIFICATE-----\n")?;
        Ok(())
    }

    fn phase(&self) -> ProxyPhase {
        if self.endpoints().is_some() {
            ProxyPhase::Ready
        } else {
            ProxyPhase::NotStarted
        }
    }
}
