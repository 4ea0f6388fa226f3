//! Proxy CA installation.
//!
//! The proxy generates its own root CA and serves it from the meta `/ca`
//! endpoint. Installing it means downloading the PEM into the run directory,
//! handing it to the platform trust store and leaving a marker file behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use chainwarden_core::Platform;

use crate::error::{ProxyError, Result};
use crate::process::ProxyController;

/// Installs and removes the proxy's root CA.
#[derive(Clone)]
pub struct ProxyCa {
    platform: Arc<dyn Platform>,
    marker: PathBuf,
    cert_path: PathBuf,
}

impl std::fmt::Debug for ProxyCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCa")
            .field("platform", &self.platform.name())
            .field("marker", &self.marker)
            .field("cert_path", &self.cert_path)
            .finish()
    }
}

impl ProxyCa {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let paths = platform.paths();
        let marker = paths.proxy_ca_marker_path();
        let cert_path = paths.proxy_ca_cert_path();
        Self {
            platform,
            marker,
            cert_path,
        }
    }

    /// Whether the install marker is present.
    pub fn is_installed(&self) -> bool {
        self.marker.exists()
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Downloads the CA from the running proxy and trusts it system-wide.
    pub async fn install(&self, proxy: &dyn ProxyController) -> Result<()> {
        info!("Installing proxy CA");
        proxy.fetch_ca_certificate(&self.cert_path).await?;
        self.platform.install_proxy_ca(&self.cert_path).await?;

        if !self.platform.is_proxy_ca_installed().await {
            return Err(ProxyError::CaNotTrusted);
        }

        if let Some(parent) = self.marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::File::create(&self.marker)?;

        info!(cert = %self.cert_path.display(), "Proxy CA installed");
        Ok(())
    }

    /// Removes the CA from the trust store, then the certificate and marker.
    ///
    /// A CA that is neither marked nor trusted is left alone, so removing a
    /// setup that never happened succeeds quietly.
    pub async fn uninstall(&self) -> Result<()> {
        if !self.is_installed() && !self.platform.is_proxy_ca_installed().await {
            debug!("Proxy CA not installed, nothing to remove");
            return Ok(());
        }

        self.platform.uninstall_proxy_ca().await?;

        match std::fs::remove_file(&self.cert_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.cert_path.display(), error = %e, "Failed to remove proxy CA certificate")
            }
        }
        match std::fs::remove_file(&self.marker) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!("Proxy CA uninstalled");
        Ok(())
    }
}
