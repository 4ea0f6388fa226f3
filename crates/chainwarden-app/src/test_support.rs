//! Platform and proxy doubles for supervisor tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use chainwarden_core::{Platform, PlatformError, PlatformPaths};
use chainwarden_proxy::{ProxyController, ProxyEndpoints, ProxyError, ProxyPhase};

/// Records every call; trust store and proxy settings always succeed.
pub(crate) struct FakePlatform {
    paths: PlatformPaths,
    calls: Mutex<Vec<&'static str>>,
    proxy_url: Mutex<Option<String>>,
}

impl FakePlatform {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            paths: PlatformPaths::under(root),
            calls: Mutex::new(Vec::new()),
            proxy_url: Mutex::new(None),
        }
    }

    /// URL the system proxy currently points at.
    pub(crate) fn proxy_url(&self) -> Option<String> {
        self.proxy_url.lock().clone()
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
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

    async fn set_system_proxy(&self, url: &str) -> Result<(), PlatformError> {
        self.record("set_system_proxy");
        *self.proxy_url.lock() = Some(url.to_string());
        Ok(())
    }

    async fn unset_system_proxy(&self) -> Result<(), PlatformError> {
        self.record("unset_system_proxy");
        *self.proxy_url.lock() = None;
        Ok(())
    }

    async fn is_system_proxy_set(&self, url: &str) -> Result<bool, PlatformError> {
        Ok(self.proxy_url.lock().as_deref() == Some(url))
    }

    async fn install_proxy_ca(&self, _cert_path: &Path) -> Result<(), PlatformError> {
        self.record("install_proxy_ca");
        Ok(())
    }

    async fn is_proxy_ca_installed(&self) -> bool {
        true
    }

    async fn uninstall_proxy_ca(&self) -> Result<(), PlatformError> {
        self.record("uninstall_proxy_ca");
        Ok(())
    }

    async fn run_as_current_user(
        &self,
        binary: &Path,
        args: &[String],
    ) -> Result<Child, PlatformError> {
        self.record("run_as_current_user");
        Command::new(binary)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(PlatformError::from)
    }
}

/// A proxy whose health and start outcome are set by the test.
///
/// Every start binds new ports, as a real restart may.
pub(crate) struct ScriptedProxy {
    healthy: AtomicBool,
    heal_on_start: AtomicBool,
    fail_start: AtomicBool,
    starts: Mutex<Vec<Instant>>,
    stops: AtomicUsize,
    health_checks: AtomicUsize,
    endpoints: Mutex<Option<ProxyEndpoints>>,
}

impl ScriptedProxy {
    /// Starts succeed and leave the proxy healthy.
    pub(crate) fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(false),
            heal_on_start: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            starts: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            endpoints: Mutex::new(None),
        }
    }

    /// Starts succeed but health checks never pass.
    pub(crate) fn never_healthy() -> Self {
        let proxy = Self::healthy();
        proxy.heal_on_start.store(false, Ordering::SeqCst);
        proxy
    }

    /// Every start fails.
    pub(crate) fn failing() -> Self {
        let proxy = Self::never_healthy();
        proxy.fail_start.store(true, Ordering::SeqCst);
        proxy
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Whether later starts leave the proxy healthy.
    pub(crate) fn set_heal_on_start(&self, heal: bool) {
        self.heal_on_start.store(heal, Ordering::SeqCst);
    }

    /// Number of health checks made so far.
    pub(crate) fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn starts(&self) -> Vec<Instant> {
        self.starts.lock().clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyController for ScriptedProxy {
    async fn start(
        &self,
        _cancel: &CancellationToken,
        _ingress_addr: SocketAddr,
    ) -> chainwarden_proxy::Result<ProxyEndpoints> {
        let attempt = {
            let mut starts = self.starts.lock();
            starts.push(Instant::now());
            starts.len() as u16
        };
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ProxyError::ExitedEarly("exit status: 1".to_string()));
        }

        let port = 41000 + 2 * attempt;
        let endpoints = ProxyEndpoints {
            proxy_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            meta_addr: SocketAddr::from(([127, 0, 0, 1], port + 1)),
        };
        *self.endpoints.lock() = Some(endpoints);
        if self.heal_on_start.load(Ordering::SeqCst) {
            self.set_healthy(true);
        }
        Ok(endpoints)
    }

    async fn is_running(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_healthy(false);
        *self.endpoints.lock() = None;
    }

    fn endpoints(&self) -> Option<ProxyEndpoints> {
        *self.endpoints.lock()
    }

    async fn fetch_ca_certificate(&self, dest: &Path) -> chainwarden_proxy::Result<()> {
        if self.endpoints.lock().is_none() {
            return Err(ProxyError::NotStarted);
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, "-----BEGIN CERTIFICATE-----\n")?;
        Ok(())
    }

    fn phase(&self) -> ProxyPhase {
        match (self.endpoints.lock().is_some(), self.healthy.load(Ordering::SeqCst)) {
            (false, _) => ProxyPhase::NotStarted,
            (true, true) => ProxyPhase::Healthy,
            (true, false) => ProxyPhase::Degraded,
        }
    }
}
