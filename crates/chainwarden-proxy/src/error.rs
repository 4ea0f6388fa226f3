//! Error types for proxy supervision.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use chainwarden_core::PlatformError;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The proxy binary could not be launched.
    #[error("Failed to spawn proxy {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An address file is missing or does not hold a socket address.
    #[error("Address file {path} not ready: {reason}")]
    AddressFile { path: PathBuf, reason: String },

    /// The proxy did not publish its addresses in time.
    #[error("Proxy not ready after {0:?}")]
    ReadyTimeout(Duration),

    /// The proxy exited before it became ready.
    #[error("Proxy exited before becoming ready: {0}")]
    ExitedEarly(String),

    /// Startup was cancelled.
    #[error("Proxy start cancelled")]
    Cancelled,

    /// The health endpoint did not answer as expected.
    #[error("Proxy unhealthy: {0}")]
    Unhealthy(String),

    /// No proxy instance has been started.
    #[error("Proxy not started")]
    NotStarted,

    /// The proxy CA was installed but the trust store does not report it.
    #[error("Proxy CA not found in trust store after install")]
    CaNotTrusted,

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform operation failed.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
