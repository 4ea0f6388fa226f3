//! Chainwarden - package-manager security daemon.
//!
//! This crate is the daemon itself: the supervisor that starts and watches
//! the intercepting proxy, the ingress server and the desktop UI, plus the
//! per-OS [`Platform`](chainwarden_core::Platform) implementations and
//! logging setup used by the `chainwarden` binary.

pub mod daemon;
pub mod logging;
pub mod platform;
pub mod ui;

#[cfg(test)]
mod test_support;

pub use daemon::{Daemon, DaemonError};
pub use ui::UiProcess;
