//! Daemon settings and configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::platform::PlatformPaths;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Default interval between consolidated status lines in seconds.
pub const DEFAULT_STATUS_LOG_INTERVAL_SECS: u64 = 3600;

/// Default number of proxy restart attempts before giving up.
pub const DEFAULT_PROXY_START_MAX_RETRIES: u32 = 20;

/// Default minimum spacing between proxy restart attempts in seconds.
pub const DEFAULT_PROXY_START_RETRY_INTERVAL_SECS: u64 = 180;

/// Default log rotation threshold (10 MiB).
pub const DEFAULT_LOG_ROTATION_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Default base URL of the desktop UI.
pub const DEFAULT_UI_BASE_URL: &str = "http://127.0.0.1:9876";

/// Tunables read from the optional JSON settings file.
///
/// Every field has a default, so an empty object `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub heartbeat_interval_secs: u64,
    pub status_log_interval_secs: u64,
    pub proxy_start_max_retries: u32,
    pub proxy_start_retry_interval_secs: u64,
    pub proxy_ready_timeout_secs: u64,
    pub proxy_ready_poll_interval_ms: u64,
    pub ingress_bind_wait_ms: u64,
    pub log_rotation_size_bytes: u64,
    pub log_reaping_age_hours: u64,
    pub shutdown_timeout_secs: u64,
    pub ui_base_url: String,
    /// Whether `/v1/*` ingress routes require the UI bearer token.
    pub require_ui_token: bool,
    /// Whether to launch the desktop UI once the ingress server is up.
    pub launch_ui: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            status_log_interval_secs: DEFAULT_STATUS_LOG_INTERVAL_SECS,
            proxy_start_max_retries: DEFAULT_PROXY_START_MAX_RETRIES,
            proxy_start_retry_interval_secs: DEFAULT_PROXY_START_RETRY_INTERVAL_SECS,
            proxy_ready_timeout_secs: 30,
            proxy_ready_poll_interval_ms: 100,
            ingress_bind_wait_ms: 100,
            log_rotation_size_bytes: DEFAULT_LOG_ROTATION_SIZE_BYTES,
            log_reaping_age_hours: 24,
            shutdown_timeout_secs: 30,
            ui_base_url: DEFAULT_UI_BASE_URL.to_string(),
            require_ui_token: true,
            launch_ui: true,
        }
    }
}

impl DaemonSettings {
    /// Loads settings from `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values the timers cannot run with.
    ///
    /// Tokio intervals panic on a zero period, and a zero readiness poll
    /// would spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("status_log_interval_secs", self.status_log_interval_secs),
            ("proxy_ready_poll_interval_ms", self.proxy_ready_poll_interval_ms),
        ];
        for (field, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs)
    }

    pub fn proxy_start_retry_interval(&self) -> Duration {
        Duration::from_secs(self.proxy_start_retry_interval_secs)
    }

    pub fn proxy_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_ready_timeout_secs)
    }

    pub fn proxy_ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.proxy_ready_poll_interval_ms)
    }

    pub fn ingress_bind_wait(&self) -> Duration {
        Duration::from_millis(self.ingress_bind_wait_ms)
    }

    pub fn log_reaping_age(&self) -> Duration {
        Duration::from_secs(self.log_reaping_age_hours * 3600)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Immutable daemon configuration assembled at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Settings file the tunables were read from, if any.
    pub config_path: Option<PathBuf>,
    /// Log level requested on the command line.
    pub log_level: String,
    /// Directories supplied by the platform.
    pub paths: PlatformPaths,
    pub settings: DaemonSettings,
}

impl DaemonConfig {
    /// Reads the settings file (if any) and combines it with the platform paths.
    pub fn load(
        config_path: Option<PathBuf>,
        log_level: impl Into<String>,
        paths: PlatformPaths,
    ) -> Result<Self, ConfigError> {
        let settings = DaemonSettings::load(config_path.as_deref())?;
        Ok(Self {
            config_path,
            log_level: log_level.into(),
            paths,
            settings,
        })
    }
}
