//! The daemon supervisor.
//!
//! [`Daemon`] owns every subsystem: the ingress server, the proxy
//! controller, the CA installer, the setup runner, the log workers and the
//! UI process. [`Daemon::start`] runs the control loop until it fails or is
//! cancelled; [`Daemon::stop`] tears everything down exactly once within a
//! deadline.
//!
//! ## Control loop
//!
//! ```text
//! log workers → stale cleanup (first run) → ingress → UI
//!     → proxy + CA → setup install → heartbeat ⟲
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::{interval, interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use chainwarden_core::{DaemonConfig, LogReaper, LogRotator, Platform, SetupRunner, SetupStep};
use chainwarden_proxy::{
    ProxyCa, ProxyCaStep, ProxyController, ProxyState, RetryDecision, RetryPolicy, SystemProxyStep,
};
use chainwarden_server::{IngressConfig, IngressServer, UiLink, UiNotifier};

use crate::ui::UiProcess;

/// Errors that end the daemon.
///
/// Cloneable so every concurrent [`Daemon::stop`] caller gets the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    /// The settings cannot be run with.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The UI notification client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The ingress server had no address after the bind wait.
    #[error("ingress server not bound after {0:?}")]
    IngressNotBound(Duration),

    /// The proxy could not be started.
    #[error("failed to start proxy: {0}")]
    ProxyStart(String),

    /// The proxy CA could not be installed.
    #[error("failed to install proxy CA: {0}")]
    CaInstall(String),

    /// The setup runner failed to install.
    #[error("failed to install setup: {0}")]
    Setup(String),

    /// The proxy stayed unhealthy through every restart attempt.
    #[error("proxy start retry limit reached ({0} attempts), not retrying")]
    ProxyRetriesExhausted(u32),

    /// A daemon task panicked.
    #[error("daemon task failed: {0}")]
    Task(String),

    /// Teardown did not finish before the deadline.
    #[error("timeout waiting for daemon to stop after {0:?}")]
    ShutdownTimeout(Duration),
}

struct Inner {
    config: DaemonConfig,
    platform: Arc<dyn Platform>,
    proxy: Arc<dyn ProxyController>,
    ca: ProxyCa,
    ingress: Arc<IngressServer>,
    notifier: UiNotifier,
    setup: SetupRunner,
    system_proxy: Arc<SystemProxyStep>,
    rotator: Arc<LogRotator>,
    reaper: Arc<LogReaper>,
    ui: UiProcess,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    stopped: OnceCell<Result<(), DaemonError>>,
}

/// Handle on the running daemon. Clones share the same daemon.
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("platform", &self.inner.platform.name())
            .field("proxy", &self.inner.proxy.phase())
            .field("ingress", &self.inner.ingress.addr())
            .finish()
    }
}

impl Daemon {
    /// Wires up every subsystem. Nothing is started until [`start`](Self::start).
    pub fn new(
        config: DaemonConfig,
        platform: Arc<dyn Platform>,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<Self, DaemonError> {
        let settings = &config.settings;
        let paths = &config.paths;
        settings
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let link = UiLink::generate(settings.ui_base_url.as_str());
        let notifier = UiNotifier::new(link).map_err(|e| DaemonError::Client(e.to_string()))?;
        let ingress = IngressServer::new(
            IngressConfig::default().with_require_ui_token(settings.require_ui_token),
            notifier.clone(),
        );

        let ca = ProxyCa::new(platform.clone());
        let system_proxy = Arc::new(SystemProxyStep::new(platform.clone(), proxy.clone()));
        let steps: Vec<Arc<dyn SetupStep>> = vec![
            Arc::new(ProxyCaStep::new(ca.clone(), proxy.clone())),
            system_proxy.clone() as Arc<dyn SetupStep>,
        ];
        let setup = SetupRunner::new(steps, paths.setup_marker_path());

        let rotator = LogRotator::new();
        rotator.add_log_file(paths.daemon_log_path(), settings.log_rotation_size_bytes);

        let reaper = LogReaper::new();
        reaper.add_log_file(paths.daemon_log_path(), settings.log_reaping_age_hours);
        reaper.add_log_file(paths.proxy_log_path(), settings.log_reaping_age_hours);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                platform,
                proxy,
                ca,
                ingress: Arc::new(ingress),
                notifier,
                setup,
                system_proxy,
                rotator: Arc::new(rotator),
                reaper: Arc::new(reaper),
                ui: UiProcess::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                stopped: OnceCell::new(),
            }),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    /// Address of the ingress server once it is bound.
    pub fn ingress_addr(&self) -> Option<SocketAddr> {
        self.inner.ingress.addr()
    }

    fn retry_policy(&self) -> RetryPolicy {
        let settings = &self.inner.config.settings;
        RetryPolicy {
            max_retries: settings.proxy_start_max_retries,
            min_interval: settings.proxy_start_retry_interval(),
        }
    }

    /// Runs the daemon until the control loop fails, `cancel` fires, or
    /// [`stop`](Self::stop) is called.
    ///
    /// A fatal control-loop error is returned after every task has drained.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let inner = &self.inner;
        info!(
            platform = inner.platform.name(),
            home = %inner.config.paths.home_dir.display(),
            "Starting Chainwarden daemon"
        );

        let shutdown = inner.shutdown.clone();
        {
            let shutdown = shutdown.clone();
            inner.tasks.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => shutdown.cancel(),
                    _ = shutdown.cancelled() => {}
                }
            });
        }

        let daemon = self.clone();
        let mut control = inner.tasks.spawn(async move { daemon.run().await });

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Daemon main loop stopped");
            }
            joined = &mut control => {
                let result = joined
                    .map_err(|e| DaemonError::Task(e.to_string()))
                    .and_then(|result| result);
                if let Err(e) = result {
                    error!(error = %e, "Daemon control loop failed");
                    shutdown.cancel();
                    inner.tasks.close();
                    inner.tasks.wait().await;
                    return Err(e);
                }
            }
        }

        inner.tasks.close();
        inner.tasks.wait().await;
        Ok(())
    }

    async fn run(&self) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let cancel = inner.shutdown.clone();

        inner.rotator.start(&inner.tasks, cancel.child_token());
        inner.reaper.start(&inner.tasks, cancel.child_token());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = self.bring_up(&cancel) => result?,
        }

        self.heartbeat_loop(&cancel).await
    }

    /// Startup sequence up to the first heartbeat.
    async fn bring_up(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let settings = &inner.config.settings;
        info!("Daemon is running");

        if !inner.ca.is_installed() {
            info!("First proxy setup, removing any previous setup");
            if let Err(e) = inner.setup.uninstall(cancel).await {
                warn!(error = %e, "Failed to remove previous setup (it may not exist)");
            }
        }

        // The proxy needs the ingress address for its block callbacks.
        let ingress = inner.ingress.clone();
        let token = cancel.child_token();
        inner.tasks.spawn(async move {
            if let Err(e) = ingress.start(token).await {
                error!(error = %e, "Ingress server error");
            }
        });

        let bind_wait = settings.ingress_bind_wait();
        tokio::time::sleep(bind_wait).await;
        let ingress_addr = inner
            .ingress
            .addr()
            .ok_or(DaemonError::IngressNotBound(bind_wait))?;

        if settings.launch_ui {
            self.launch_ui(ingress_addr).await;
        }

        self.start_proxy_and_install_ca().await?;

        inner
            .setup
            .install(cancel)
            .await
            .map_err(|e| DaemonError::Setup(e.to_string()))?;

        Ok(())
    }

    async fn launch_ui(&self, ingress_addr: SocketAddr) {
        let inner = &self.inner;
        let binary = inner.config.paths.ui_binary_path();
        let token = &inner.notifier.link().token;

        if let Err(e) = inner
            .ui
            .launch(inner.platform.as_ref(), &binary, ingress_addr, token)
            .await
        {
            warn!(error = %e, "Failed to launch UI");
        }
    }

    async fn start_proxy_and_install_ca(&self) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let ingress_addr = inner
            .ingress
            .addr()
            .ok_or(DaemonError::IngressNotBound(inner.config.settings.ingress_bind_wait()))?;

        inner
            .proxy
            .start(&inner.shutdown, ingress_addr)
            .await
            .map_err(|e| DaemonError::ProxyStart(e.to_string()))?;

        if !inner.ca.is_installed() {
            inner
                .ca
                .install(inner.proxy.as_ref())
                .await
                .map_err(|e| DaemonError::CaInstall(e.to_string()))?;
        }
        Ok(())
    }

    async fn heartbeat_loop(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        let settings = &self.inner.config.settings;

        let period = settings.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status_log = interval(settings.status_log_interval());
        status_log.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = ProxyState::new();
        let mut status_reported = false;
        // Last heartbeat health check, reused by the status line.
        let mut last_check: Option<bool> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping daemon loop");
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    let running = self.heartbeat(&mut state, &mut status_reported).await?;
                    last_check = Some(running);
                }
                _ = status_log.tick() => {
                    let running = match last_check {
                        Some(running) => running,
                        None => self.inner.proxy.is_running().await,
                    };
                    self.log_status(running);
                }
            }
        }
    }

    /// One heartbeat: health check and UI status. Returns whether the proxy
    /// is running afterwards.
    pub(crate) async fn heartbeat(
        &self,
        state: &mut ProxyState,
        status_reported: &mut bool,
    ) -> Result<bool, DaemonError> {
        let running = self.check_proxy_health(state).await?;

        if state.mark_running(running) || !*status_reported {
            self.inner.notifier.notify_proxy_status(running);
            *status_reported = true;
        }
        Ok(running)
    }

    /// One pass of the restart policy. Returns whether the proxy is running
    /// once the pass is done.
    ///
    /// Healthy proxies are left alone. An unhealthy one is restarted at most
    /// once per retry interval; once the attempt budget is spent the error is
    /// returned and ends the control loop.
    pub(crate) async fn check_proxy_health(
        &self,
        state: &mut ProxyState,
    ) -> Result<bool, DaemonError> {
        if self.inner.proxy.is_running().await {
            return Ok(true);
        }

        let policy = self.retry_policy();
        match state.next_attempt(Instant::now(), &policy) {
            RetryDecision::Exhausted { attempts } => {
                Err(DaemonError::ProxyRetriesExhausted(attempts))
            }
            RetryDecision::Wait { remaining } => {
                info!(
                    retry_in_secs = remaining.as_secs(),
                    "Proxy is not running, waiting for retry interval"
                );
                Ok(false)
            }
            RetryDecision::Attempt { attempt } => {
                warn!(
                    attempt,
                    max = policy.max_retries,
                    "Proxy is not running, starting it"
                );

                if let Err(e) = self.start_proxy_and_install_ca().await {
                    warn!(error = %e, "Failed to restart proxy");
                    return Ok(false);
                }

                if !self.inner.proxy.is_running().await {
                    warn!("Proxy restarted but not healthy, will try again later");
                    return Ok(false);
                }

                info!("Proxy restarted");
                state.record_success();
                // The restarted proxy may listen on new ports.
                if let Err(e) = self.inner.system_proxy.refresh().await {
                    warn!(error = %e, "Failed to update system proxy after restart");
                }
                Ok(true)
            }
        }
    }

    fn log_status(&self, running: bool) {
        let inner = &self.inner;
        let endpoints = inner.proxy.endpoints();

        info!(
            proxy = %inner.proxy.phase(),
            proxy_running = running,
            proxy_addr = ?endpoints.map(|e| e.proxy_addr),
            ingress = ?inner.ingress.addr(),
            blocked_events = inner.ingress.store().len(),
            ui_running = inner.ui.is_running(),
            setup_complete = inner.setup.is_complete(),
            "Daemon status"
        );
    }

    /// Tears the daemon down.
    ///
    /// The teardown body runs once no matter how many callers race here; all
    /// of them receive its result. Each step is bounded by `deadline`, after
    /// which [`DaemonError::ShutdownTimeout`] is returned.
    pub async fn stop(&self, deadline: Duration) -> Result<(), DaemonError> {
        self.inner
            .stopped
            .get_or_init(|| self.teardown(deadline))
            .await
            .clone()
    }

    async fn teardown(&self, deadline: Duration) -> Result<(), DaemonError> {
        let inner = &self.inner;
        let deadline_at = Instant::now() + deadline;
        let mut timed_out = false;
        info!("Stopping Chainwarden daemon");

        inner.ui.kill().await;

        // Teardown proceeds even when the daemon token has already fired.
        let uninstall_cancel = CancellationToken::new();
        match timeout_at(deadline_at, inner.setup.uninstall(&uninstall_cancel)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Error tearing down setup"),
            Err(_) => {
                warn!("Setup teardown did not finish before the deadline");
                timed_out = true;
            }
        }

        if timeout_at(deadline_at, inner.proxy.stop()).await.is_err() {
            warn!("Proxy did not stop before the deadline");
            timed_out = true;
        }

        inner.ingress.stop();
        inner.shutdown.cancel();
        inner.tasks.close();

        if timeout_at(deadline_at, inner.tasks.wait()).await.is_err() {
            timed_out = true;
        }

        if timed_out {
            warn!(?deadline, "Timeout waiting for daemon to stop");
            return Err(DaemonError::ShutdownTimeout(deadline));
        }

        debug!(remaining = ?deadline_at.saturating_duration_since(Instant::now()), "Teardown finished");
        info!("Chainwarden daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePlatform, ScriptedProxy};
    use chainwarden_core::{DaemonSettings, PlatformPaths};
    use std::path::Path;

    fn settings() -> DaemonSettings {
        DaemonSettings {
            heartbeat_interval_secs: 60,
            proxy_start_max_retries: 3,
            proxy_start_retry_interval_secs: 180,
            ingress_bind_wait_ms: 50,
            // Discard port: nothing listens, notifications fail fast.
            ui_base_url: "http://127.0.0.1:9".to_string(),
            launch_ui: false,
            ..DaemonSettings::default()
        }
    }

    fn daemon(
        root: &Path,
        settings: DaemonSettings,
        proxy: ScriptedProxy,
    ) -> (Daemon, Arc<FakePlatform>, Arc<ScriptedProxy>) {
        let platform = Arc::new(FakePlatform::new(root));
        let proxy = Arc::new(proxy);
        let config = DaemonConfig {
            config_path: None,
            log_level: "debug".to_string(),
            paths: PlatformPaths::under(root),
            settings,
        };
        let daemon = Daemon::new(config, platform.clone(), proxy.clone()).unwrap();
        (daemon, platform, proxy)
    }

    /// Serves the ingress on the daemon's tracker and waits for its address.
    async fn bind_ingress(daemon: &Daemon) {
        let ingress = daemon.inner.ingress.clone();
        let token = daemon.inner.shutdown.child_token();
        daemon.inner.tasks.spawn(async move { ingress.start(token).await });

        while daemon.ingress_addr().is_none() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::never_healthy());

        let err = daemon.start(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, DaemonError::ProxyRetriesExhausted(3));

        // Initial start plus one per allowed retry.
        let starts = proxy.starts();
        assert_eq!(starts.len(), 4);
        for pair in starts[1..].windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(180));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_for_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::never_healthy());
        bind_ingress(&daemon).await;

        let mut state = ProxyState::new();
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(state.retry_count, 1);
        assert_eq!(proxy.starts().len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(state.retry_count, 1);
        assert_eq!(proxy.starts().len(), 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(state.retry_count, 2);
        assert_eq!(proxy.starts().len(), 2);

        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn successful_retry_resets_budget() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        bind_ingress(&daemon).await;

        let mut state = ProxyState::new();
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(state.retry_count, 0);
        assert!(state.last_retry.is_none());

        proxy.set_healthy(false);
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(state.retry_count, 0);
        assert_eq!(proxy.starts().len(), 2);

        // Healthy proxies are not touched.
        daemon.check_proxy_health(&mut state).await.unwrap();
        assert_eq!(proxy.starts().len(), 2);

        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_budget_restarts_after_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::never_healthy());
        bind_ingress(&daemon).await;

        let t0 = Instant::now();
        let runner = daemon.clone();
        let cancel = daemon.inner.shutdown.child_token();
        let handle = tokio::spawn(async move { runner.heartbeat_loop(&cancel).await });

        // Two failed attempts, at 60s and 240s.
        tokio::time::sleep_until(t0 + Duration::from_secs(250)).await;
        assert_eq!(proxy.starts().len(), 2);

        // The third attempt, gated until 420s, brings the proxy back.
        proxy.set_heal_on_start(true);
        tokio::time::sleep_until(t0 + Duration::from_secs(400)).await;
        assert_eq!(proxy.starts().len(), 2);
        tokio::time::sleep_until(t0 + Duration::from_secs(430)).await;
        assert_eq!(proxy.starts().len(), 3);

        // It fails again: a fresh budget of three attempts before giving up.
        proxy.set_heal_on_start(false);
        proxy.set_healthy(false);
        let result = handle.await.unwrap();
        assert_eq!(result, Err(DaemonError::ProxyRetriesExhausted(3)));

        let starts = proxy.starts();
        assert_eq!(starts.len(), 6);
        assert_eq!(starts[1] - starts[0], Duration::from_secs(180));
        assert_eq!(starts[2] - starts[1], Duration::from_secs(180));
        // The reset also clears the interval gate: the next heartbeat retries.
        assert_eq!(starts[3] - starts[2], Duration::from_secs(60));
        for pair in starts[3..].windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(180));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_line_reuses_heartbeat_check() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DaemonSettings {
            status_log_interval_secs: 60,
            ..settings()
        };
        let (daemon, _, proxy) = daemon(dir.path(), settings, ScriptedProxy::healthy());
        bind_ingress(&daemon).await;
        daemon.start_proxy_and_install_ca().await.unwrap();
        let before = proxy.health_checks();

        let t0 = Instant::now();
        let runner = daemon.clone();
        let cancel = daemon.inner.shutdown.child_token();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.heartbeat_loop(&cancel).await })
        };

        // Status line at 0s checks once; at 60s heartbeat and status line share one check.
        tokio::time::sleep_until(t0 + Duration::from_secs(61)).await;
        assert_eq!(proxy.health_checks() - before, 2);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Ok(()));
        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_checks_the_proxy_once() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        bind_ingress(&daemon).await;
        daemon.start_proxy_and_install_ca().await.unwrap();

        let before = proxy.health_checks();
        let mut state = ProxyState::new();
        let mut reported = false;
        let running = daemon.heartbeat(&mut state, &mut reported).await.unwrap();

        assert!(running);
        assert!(reported);
        assert_eq!(proxy.health_checks() - before, 1);

        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn restart_moves_system_proxy_to_new_ports() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, platform, proxy) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        bind_ingress(&daemon).await;
        daemon.start_proxy_and_install_ca().await.unwrap();
        daemon
            .inner
            .setup
            .install(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(platform.proxy_url().as_deref(), Some("http://127.0.0.1:41002"));

        proxy.set_healthy(false);
        let mut state = ProxyState::new();
        assert!(daemon.check_proxy_health(&mut state).await.unwrap());

        assert_eq!(platform.proxy_url().as_deref(), Some("http://127.0.0.1:41004"));
        assert_eq!(platform.count("set_system_proxy"), 2);

        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_cleanup_on_clean_machine_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, platform, _) = daemon(dir.path(), settings(), ScriptedProxy::healthy());

        daemon
            .inner
            .setup
            .uninstall(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(platform.calls(), ["unset_system_proxy", "uninstall_proxy_ca"]);
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            config_path: None,
            log_level: "info".to_string(),
            paths: PlatformPaths::under(dir.path()),
            settings: DaemonSettings {
                heartbeat_interval_secs: 0,
                ..settings()
            },
        };

        let err = Daemon::new(
            config,
            Arc::new(FakePlatform::new(dir.path())),
            Arc::new(ScriptedProxy::healthy()),
        )
        .unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[tokio::test]
    async fn failed_restart_keeps_the_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, proxy) = daemon(dir.path(), settings(), ScriptedProxy::failing());
        bind_ingress(&daemon).await;

        let mut state = ProxyState::new();
        daemon.check_proxy_health(&mut state).await.unwrap();

        assert_eq!(state.retry_count, 1);
        assert!(state.last_retry.is_some());
        assert_eq!(proxy.starts().len(), 1);

        daemon.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn start_brings_up_proxy_ca_and_setup() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, platform, proxy) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        let paths = daemon.config().paths.clone();

        let runner = daemon.clone();
        let handle = tokio::spawn(async move { runner.start(CancellationToken::new()).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !paths.setup_marker_path().exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(daemon.ingress_addr().is_some());
        assert_eq!(proxy.starts().len(), 1);
        assert!(paths.proxy_ca_marker_path().exists());

        let calls = platform.calls();
        // No CA marker yet, so stale setup is removed before anything else.
        assert_eq!(calls[0], "unset_system_proxy");
        assert!(calls.contains(&"install_proxy_ca"));
        assert_eq!(calls.last(), Some(&"set_system_proxy"));

        daemon.stop(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap().unwrap();

        assert!(!paths.setup_marker_path().exists());
        assert_eq!(proxy.stops(), 1);
    }

    #[tokio::test]
    async fn proxy_start_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, platform, _) = daemon(dir.path(), settings(), ScriptedProxy::failing());

        let err = daemon.start(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, DaemonError::ProxyStart(_)));
        assert_eq!(platform.count("set_system_proxy"), 0);
        assert!(!daemon.config().paths.setup_marker_path().exists());
    }

    #[tokio::test]
    async fn caller_cancellation_ends_start() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, _) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        let cancel = CancellationToken::new();

        let runner = daemon.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.start(token).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
        assert!(daemon.inner.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn concurrent_stop_runs_teardown_once() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, platform, proxy) = daemon(dir.path(), settings(), ScriptedProxy::healthy());

        let other = daemon.clone();
        let (a, b) = tokio::join!(
            daemon.stop(Duration::from_secs(5)),
            other.stop(Duration::from_secs(5))
        );

        assert_eq!(a, b);
        assert_eq!(a, Ok(()));
        assert_eq!(proxy.stops(), 1);
        assert_eq!(platform.count("unset_system_proxy"), 1);

        assert_eq!(daemon.stop(Duration::from_secs(5)).await, Ok(()));
        assert_eq!(proxy.stops(), 1);
    }

    #[tokio::test]
    async fn stop_reports_timeout_when_a_task_hangs() {
        let dir = tempfile::tempdir().unwrap();
        let (daemon, _, _) = daemon(dir.path(), settings(), ScriptedProxy::healthy());
        daemon.inner.tasks.spawn(std::future::pending::<()>());

        let deadline = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let result = daemon.stop(deadline).await;
        let elapsed = started.elapsed();

        assert_eq!(result, Err(DaemonError::ShutdownTimeout(deadline)));
        assert!(elapsed >= deadline);
        assert!(elapsed < Duration::from_secs(5));

        // Later callers see the same outcome without waiting again.
        assert_eq!(daemon.stop(deadline).await, result);
    }
}
