//! Chainwarden Core - platform contract, settings, setup steps and log maintenance.
//!
//! This crate holds the pieces of the Chainwarden daemon that do not depend on
//! the proxy or the HTTP stack: the [`Platform`] capability trait implemented
//! once per operating system, the daemon settings, the ordered setup step
//! runner and the background log rotation and reaping workers.

pub mod error;
pub mod logs;
pub mod platform;
pub mod settings;
pub mod setup;

pub use error::{ConfigError, PlatformError, SetupError};
pub use logs::{LogFile, LogFileSpec, LogReaper, LogRotator};
pub use platform::{Platform, PlatformPaths};
pub use settings::{DaemonConfig, DaemonSettings};
pub use setup::{SetupMode, SetupRunner, SetupStep};
