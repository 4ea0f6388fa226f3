//! Chainwarden Proxy - supervision of the intercepting proxy subprocess.
//!
//! The proxy itself is a separate binary. This crate launches it, discovers
//! the addresses it binds, probes its health, installs its root CA and keeps
//! the restart bookkeeping the daemon's heartbeat uses.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted → Starting → Ready → Healthy ⇄ Degraded → Stopped
//!                 │
//!                 └─ address files appear in the run dir → Ready
//! ```

mod ca;
mod endpoints;
mod error;
pub mod health;
mod process;
mod state;
mod steps;

#[cfg(test)]
mod test_support;

pub use ca::ProxyCa;
pub use endpoints::{ProxyEndpoints, META_ADDR_FILE, PROXY_ADDR_FILE};
pub use error::{ProxyError, Result};
pub use process::{ProxyController, ProxyPhase, ProxyProcessConfig, ProxyProcessManager, STOP_GRACE};
pub use state::{ProxyState, RetryDecision, RetryPolicy};
pub use steps::{ProxyCaStep, SystemProxyStep};
