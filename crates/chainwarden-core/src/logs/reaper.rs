use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{LogFileSpec, CHECK_INTERVAL, ROTATION_SUFFIX_FORMAT};

/// Deletes rotated log files older than their age threshold.
pub struct LogReaper {
    files: RwLock<Vec<LogFileSpec>>,
    interval: Duration,
}

impl Default for LogReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl LogReaper {
    pub fn new() -> Self {
        Self::with_interval(CHECK_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            files: RwLock::new(Vec::new()),
            interval,
        }
    }

    /// Registers the rotated siblings of `path` for deletion after `max_age_hours`.
    pub fn add_log_file(&self, path: impl Into<PathBuf>, max_age_hours: u64) {
        self.files.write().push(LogFileSpec {
            path: path.into(),
            threshold: max_age_hours,
        });
    }

    /// Spawns the reaping loop on `tracker` until `cancel` fires.
    pub fn start(self: &Arc<Self>, tracker: &TaskTracker, cancel: CancellationToken) {
        let reaper = Arc::clone(self);
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(reaper.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => reaper.check_files(Utc::now()),
                }
            }
            debug!("Log reaper stopped");
        });
    }

    pub fn check_files(&self, now: DateTime<Utc>) {
        let files = self.files.read().clone();
        for spec in &files {
            reap_siblings(spec, now);
        }
    }
}

fn reap_siblings(spec: &LogFileSpec, now: DateTime<Utc>) {
    let Some(dir) = spec.path.parent() else {
        return;
    };
    let max_age = i64::try_from(spec.threshold)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::MAX);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list log directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(suffix) = rotation_suffix(&spec.path, &name) else {
            continue;
        };

        let Some(rotated_at) = parse_suffix(suffix) else {
            debug!(file = %name, "Skipping log file with unrecognised suffix");
            continue;
        };

        if now - rotated_at <= max_age {
            continue;
        }

        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Deleted old log file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
        }
    }
}

/// Extracts the timestamp part of a rotated sibling of `base`.
///
/// Matches both `<file_name>.<suffix>` and `<stem>.<suffix><ext>`. The live
/// log itself never matches.
fn rotation_suffix<'a>(base: &Path, candidate: &'a str) -> Option<&'a str> {
    let file_name = base.file_name()?.to_string_lossy();
    if candidate == file_name {
        return None;
    }

    if let Some(rest) = candidate.strip_prefix(&format!("{file_name}.")) {
        return Some(rest);
    }

    let stem = base.file_stem()?.to_string_lossy();
    let rest = candidate.strip_prefix(&format!("{stem}."))?;
    match base.extension() {
        Some(ext) => rest.strip_suffix(&format!(".{}", ext.to_string_lossy())),
        None => Some(rest),
    }
}

fn parse_suffix(suffix: &str) -> Option<DateTime<Utc>> {
    let with_minutes = format!("{suffix}:00");
    NaiveDateTime::parse_from_str(&with_minutes, &format!("{ROTATION_SUFFIX_FORMAT}:%M"))
        .ok()
        .map(|naive| naive.and_utc())
}
