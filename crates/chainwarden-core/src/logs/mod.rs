//! Background log maintenance.
//!
//! [`LogRotator`] renames logs that grew past a size threshold and
//! [`LogReaper`] deletes rotated logs older than an age threshold. Both check
//! once at startup and then hourly, and never return I/O errors to the caller.

mod reaper;
mod rotator;
mod writer;

use std::path::PathBuf;
use std::time::Duration;

pub use reaper::LogReaper;
pub use rotator::LogRotator;
pub use writer::LogFile;

/// How often both workers check their files.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// UTC timestamp format used for rotated file suffixes.
pub const ROTATION_SUFFIX_FORMAT: &str = "%Y-%m-%d-%H";

/// A log file registered with a maintenance worker.
///
/// The threshold is a size in bytes for the rotator and an age in hours for
/// the reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileSpec {
    pub path: PathBuf,
    pub threshold: u64,
}
