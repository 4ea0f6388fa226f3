//! Proxy subprocess management.
//!
//! The proxy runs as a child process bound to ephemeral ports. Readiness is
//! detected by polling for the address files it writes; liveness by pinging
//! its meta endpoints. Each instance is tied to a child [`CancellationToken`]
//! whose cancellation kills the process.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chainwarden_core::PlatformPaths;

use crate::endpoints::ProxyEndpoints;
use crate::error::{ProxyError, Result};
use crate::health;

/// How long `stop` waits for the child to exit after killing it.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of the supervised proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyPhase {
    NotStarted,
    Starting,
    Ready,
    Healthy,
    Degraded,
    Stopped,
}

impl fmt::Display for ProxyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyPhase::NotStarted => "not started",
            ProxyPhase::Starting => "starting",
            ProxyPhase::Ready => "ready",
            ProxyPhase::Healthy => "healthy",
            ProxyPhase::Degraded => "degraded",
            ProxyPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Operations the supervisor needs from the proxy.
#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Launches a fresh instance reporting blocks to `ingress_addr` and waits
    /// until it publishes its addresses.
    async fn start(
        &self,
        cancel: &CancellationToken,
        ingress_addr: SocketAddr,
    ) -> Result<ProxyEndpoints>;

    /// One health probe, no retries.
    async fn is_running(&self) -> bool;

    /// Kills the current instance, if any. Safe to call repeatedly.
    async fn stop(&self);

    /// Addresses of the current instance.
    fn endpoints(&self) -> Option<ProxyEndpoints>;

    /// Downloads the proxy's CA certificate to `dest`.
    async fn fetch_ca_certificate(&self, dest: &Path) -> Result<()>;

    fn phase(&self) -> ProxyPhase;
}

/// Where and how to run the proxy binary.
#[derive(Debug, Clone)]
pub struct ProxyProcessConfig {
    pub binary: PathBuf,
    /// Data, secrets and address-file directory.
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_grace: Duration,
}

impl ProxyProcessConfig {
    /// Uses the platform's proxy binary, run directory and proxy log.
    pub fn from_paths(paths: &PlatformPaths) -> Self {
        Self {
            binary: paths.proxy_binary_path(),
            run_dir: paths.run_dir.clone(),
            log_path: paths.proxy_log_path(),
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn args(&self, ingress_addr: SocketAddr) -> Vec<String> {
        let run_dir = self.run_dir.display().to_string();
        vec![
            "--bind".into(),
            "127.0.0.1:0".into(),
            "--meta".into(),
            "127.0.0.1:0".into(),
            "--data".into(),
            run_dir.clone(),
            "--secrets".into(),
            run_dir,
            "--output".into(),
            self.log_path.display().to_string(),
            "--reporting-endpoint".into(),
            format!("http://{ingress_addr}/block"),
        ]
    }
}

struct Instance {
    token: CancellationToken,
    waiter: JoinHandle<()>,
    endpoints: Option<ProxyEndpoints>,
}

/// Runs the proxy binary as a supervised child process.
pub struct ProxyProcessManager {
    config: ProxyProcessConfig,
    client: reqwest::Client,
    instance: Mutex<Option<Instance>>,
    phase: Mutex<ProxyPhase>,
}

impl ProxyProcessManager {
    pub fn new(config: ProxyProcessConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: health::meta_client()?,
            instance: Mutex::new(None),
            phase: Mutex::new(ProxyPhase::NotStarted),
        })
    }

    pub fn config(&self) -> &ProxyProcessConfig {
        &self.config
    }

    fn set_phase(&self, phase: ProxyPhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            debug!(from = %*current, to = %phase, "Proxy phase changed");
            *current = phase;
        }
    }

    async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        exited: &mut oneshot::Receiver<String>,
    ) -> Result<ProxyEndpoints> {
        let deadline = tokio::time::Instant::now() + self.config.ready_timeout;

        loop {
            match ProxyEndpoints::load(&self.config.run_dir) {
                Ok(endpoints) => return Ok(endpoints),
                Err(e) => debug!(error = %e, "Proxy not ready yet"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ProxyError::ReadyTimeout(self.config.ready_timeout));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
                status = &mut *exited => {
                    let status = status.unwrap_or_else(|_| "unknown".to_string());
                    return Err(ProxyError::ExitedEarly(status));
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl ProxyController for ProxyProcessManager {
    async fn start(
        &self,
        cancel: &CancellationToken,
        ingress_addr: SocketAddr,
    ) -> Result<ProxyEndpoints> {
        self.stop().await;
        self.set_phase(ProxyPhase::Starting);

        std::fs::create_dir_all(&self.config.run_dir)?;
        ProxyEndpoints::clear(&self.config.run_dir);

        let mut child = Command::new(&self.config.binary)
            .args(self.config.args(ingress_addr))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                self.set_phase(ProxyPhase::Stopped);
                ProxyError::Spawn {
                    binary: self.config.binary.clone(),
                    source,
                }
            })?;

        let pid = child.id();
        info!(?pid, binary = %self.config.binary.display(), "Proxy started");

        let token = cancel.child_token();
        let (exit_tx, mut exit_rx) = oneshot::channel();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!(?pid, error = %e, "Failed to kill proxy process");
                        }
                        "killed".to_string()
                    }
                    status = child.wait() => {
                        let status = match status {
                            Ok(status) => status.to_string(),
                            Err(e) => e.to_string(),
                        };
                        warn!(?pid, %status, "Proxy process exited");
                        status
                    }
                };
                let _ = exit_tx.send(outcome);
            })
        };

        *self.instance.lock() = Some(Instance {
            token: token.clone(),
            waiter,
            endpoints: None,
        });

        match self.wait_until_ready(&token, &mut exit_rx).await {
            Ok(endpoints) => {
                if let Some(instance) = self.instance.lock().as_mut() {
                    instance.endpoints = Some(endpoints);
                }
                self.set_phase(ProxyPhase::Ready);
                info!(
                    proxy = %endpoints.proxy_addr,
                    meta = %endpoints.meta_addr,
                    "Proxy ready"
                );
                Ok(endpoints)
            }
            Err(e) => {
                warn!(error = %e, "Proxy failed to become ready");
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn is_running(&self) -> bool {
        let Some(endpoints) = self.endpoints() else {
            return false;
        };

        for url in [endpoints.meta_http_url(), endpoints.meta_https_url()] {
            if let Err(e) = health::ping(&self.client, &url).await {
                info!(error = %e, "Proxy not running");
                let mut phase = self.phase.lock();
                if matches!(*phase, ProxyPhase::Ready | ProxyPhase::Healthy) {
                    *phase = ProxyPhase::Degraded;
                }
                return false;
            }
        }

        let mut phase = self.phase.lock();
        if matches!(*phase, ProxyPhase::Ready | ProxyPhase::Degraded) {
            *phase = ProxyPhase::Healthy;
        }
        true
    }

    async fn stop(&self) {
        let instance = self.instance.lock().take();
        if let Some(instance) = instance {
            instance.token.cancel();
            match tokio::time::timeout(self.config.stop_grace, instance.waiter).await {
                Ok(_) => info!("Proxy stopped"),
                Err(_) => warn!(grace = ?self.config.stop_grace, "Proxy did not exit in time"),
            }
            self.set_phase(ProxyPhase::Stopped);
        } else if self.phase() != ProxyPhase::NotStarted {
            self.set_phase(ProxyPhase::Stopped);
        }
    }

    fn endpoints(&self) -> Option<ProxyEndpoints> {
        self.instance.lock().as_ref().and_then(|i| i.endpoints)
    }

    async fn fetch_ca_certificate(&self, dest: &Path) -> Result<()> {
        let endpoints = self.endpoints().ok_or(ProxyError::NotStarted)?;

        let bytes = self
            .client
            .get(endpoints.ca_url())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        info!(path = %dest.display(), "Downloaded proxy CA certificate");
        Ok(())
    }

    fn phase(&self) -> ProxyPhase {
        *self.phase.lock()
    }
}
