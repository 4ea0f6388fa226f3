//! Desktop UI child process.
//!
//! The UI is a separate binary launched once at startup in the console
//! user's session. It is told where the ingress server listens and which
//! bearer token to present; the daemon kills it on shutdown.

use std::net::SocketAddr;
use std::path::Path;

use parking_lot::Mutex;
use tokio::process::Child;
use tracing::{info, warn};

use chainwarden_core::{Platform, PlatformError};

/// Handle on the launched UI, if any.
#[derive(Debug, Default)]
pub struct UiProcess {
    child: Mutex<Option<Child>>,
}

impl UiProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command line handed to the UI binary.
    pub fn args(ingress_addr: SocketAddr, token: &str) -> Vec<String> {
        vec![
            "--daemon_url".to_string(),
            format!("http://{ingress_addr}"),
            "--token".to_string(),
            token.to_string(),
        ]
    }

    /// Starts the UI unless its binary is missing.
    ///
    /// Returns `Ok(false)` when there is nothing to launch. A UI left over
    /// from an earlier launch is killed first.
    pub async fn launch(
        &self,
        platform: &dyn Platform,
        binary: &Path,
        ingress_addr: SocketAddr,
        token: &str,
    ) -> Result<bool, PlatformError> {
        if !binary.exists() {
            info!(path = %binary.display(), "UI binary not found, not launching UI");
            return Ok(false);
        }

        self.kill().await;

        let child = platform
            .run_as_current_user(binary, &Self::args(ingress_addr, token))
            .await?;
        info!(pid = ?child.id(), "UI launched");
        *self.child.lock() = Some(child);
        Ok(true)
    }

    /// Whether the launched UI is still alive.
    pub fn is_running(&self) -> bool {
        match self.child.lock().as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kills the UI if it was launched. Safe to call repeatedly.
    pub async fn kill(&self) {
        let child = self.child.lock().take();
        let Some(mut child) = child else {
            return;
        };

        let pid = child.id();
        match child.kill().await {
            Ok(()) => info!(?pid, "UI stopped"),
            Err(e) => warn!(?pid, error = %e, "Failed to kill UI"),
        }
    }
}
