use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{LogFileSpec, CHECK_INTERVAL, ROTATION_SUFFIX_FORMAT};

/// Renames log files that exceed their size threshold.
pub struct LogRotator {
    files: RwLock<Vec<LogFileSpec>>,
    interval: Duration,
}

impl Default for LogRotator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogRotator {
    pub fn new() -> Self {
        Self::with_interval(CHECK_INTERVAL)
    }

    /// Creates a rotator that checks every `interval` instead of hourly.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            files: RwLock::new(Vec::new()),
            interval,
        }
    }

    /// Registers `path` for rotation once it grows beyond `max_bytes`.
    pub fn add_log_file(&self, path: impl Into<PathBuf>, max_bytes: u64) {
        self.files.write().push(LogFileSpec {
            path: path.into(),
            threshold: max_bytes,
        });
    }

    /// Spawns the rotation loop on `tracker` until `cancel` fires.
    pub fn start(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let rotator = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(rotator.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => rotator.check_files(Utc::now()),
                }
            }
            debug!("Log rotator stopped");
        });
    }

    /// Rotates every registered file that is over its threshold.
    pub fn check_files(&self, now: DateTime<Utc>) {
        let files = self.files.read().clone();
        for spec in &files {
            rotate_if_needed(spec, now);
        }
    }
}

fn rotate_if_needed(spec: &LogFileSpec, now: DateTime<Utc>) {
    let size = match std::fs::metadata(&spec.path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %spec.path.display(), "Log file not present, skipping rotation");
            return;
        }
        Err(e) => {
            warn!(path = %spec.path.display(), error = %e, "Failed to stat log file");
            return;
        }
    };

    if size <= spec.threshold {
        return;
    }

    let target = rotated_path(&spec.path, now);
    match std::fs::rename(&spec.path, &target) {
        Ok(()) => info!(
            from = %spec.path.display(),
            to = %target.display(),
            size,
            "Rotated log file"
        ),
        Err(e) => warn!(path = %spec.path.display(), error = %e, "Failed to rotate log file"),
    }
}

/// `<dir>/<stem>.<UTC suffix><ext>` for the given log path.
pub(crate) fn rotated_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = now.format(ROTATION_SUFFIX_FORMAT);
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{suffix}"),
    };
    path.with_file_name(name)
}
