//! Proxy endpoint discovery.
//!
//! The proxy binds ephemeral ports and writes the resolved addresses to
//! `proxy.addr.txt` and `meta.addr.txt` in the run directory. The meta
//! listener serves `/ping`, `/ca` and `/pac`.

use std::net::SocketAddr;
use std::path::Path;

use crate::error::{ProxyError, Result};

/// File the proxy writes its listening address to.
pub const PROXY_ADDR_FILE: &str = "proxy.addr.txt";

/// File the proxy writes its meta address to.
pub const META_ADDR_FILE: &str = "meta.addr.txt";

/// Addresses published by a running proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyEndpoints {
    pub proxy_addr: SocketAddr,
    pub meta_addr: SocketAddr,
}

impl ProxyEndpoints {
    /// Reads both address files from `run_dir`.
    pub fn load(run_dir: &Path) -> Result<Self> {
        Ok(Self {
            proxy_addr: read_addr_file(&run_dir.join(PROXY_ADDR_FILE))?,
            meta_addr: read_addr_file(&run_dir.join(META_ADDR_FILE))?,
        })
    }

    /// Removes address files left behind by an earlier instance.
    pub fn clear(run_dir: &Path) {
        for name in [PROXY_ADDR_FILE, META_ADDR_FILE] {
            let _ = std::fs::remove_file(run_dir.join(name));
        }
    }

    pub fn proxy_http_url(&self) -> String {
        format!("http://{}", self.proxy_addr)
    }

    pub fn proxy_https_url(&self) -> String {
        format!("https://{}", self.proxy_addr)
    }

    pub fn meta_http_url(&self) -> String {
        format!("http://{}", self.meta_addr)
    }

    pub fn meta_https_url(&self) -> String {
        format!("https://{}", self.meta_addr)
    }

    /// PAC script URL. Served over TLS on `localhost` so the proxy CA applies.
    pub fn meta_pac_url(&self) -> String {
        format!("https://localhost:{}/pac", self.meta_addr.port())
    }

    /// Where the proxy serves its CA certificate.
    pub fn ca_url(&self) -> String {
        format!("{}/ca", self.meta_http_url())
    }
}

fn read_addr_file(path: &Path) -> Result<SocketAddr> {
    let content = std::fs::read_to_string(path).map_err(|e| ProxyError::AddressFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    content
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| ProxyError::AddressFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
