//! Error types for the core crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`Platform`](crate::Platform) implementation.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// An external command failed or could not be spawned.
    #[error("{program} failed: {message}")]
    Command {
        /// The program that was run.
        program: String,
        /// Captured stderr or spawn error.
        message: String,
    },

    /// The operation is not available on this operating system.
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// No interactive user is logged in on the console.
    #[error("no interactive console user")]
    NoConsoleUser,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Builds a [`PlatformError::Command`] from a program name and message.
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }
}

/// Errors loading the daemon settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`DaemonSettings`](crate::DaemonSettings).
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A setting holds a value the daemon cannot run with.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// No usable home directory could be determined.
    #[error("could not determine platform directories")]
    NoDirectories,
}

/// Errors from the setup step runner.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A step failed; later steps were not executed.
    #[error("{name:?} failed: {source}")]
    Step {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The run was cancelled between steps.
    #[error("setup cancelled")]
    Cancelled,

    /// The completion marker could not be written.
    #[error("failed to create setup finished marker: {0}")]
    Marker(#[source] std::io::Error),
}
