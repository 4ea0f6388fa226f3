//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chainwarden_core::LogFile;

/// Filter used when `RUST_LOG` is unset: `level` for our crates, warnings elsewhere.
pub fn default_directives(level: &str) -> String {
    format!("chainwarden={level},warn")
}

/// Installs the global subscriber: stdout plus, when available, the daemon log.
///
/// The returned guard flushes the file writer and must live as long as the
/// process.
pub fn init_logging(level: &str, log_file: Option<LogFile>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let Some(log_file) = log_file else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("File logging unavailable, using console only");
        return None;
    };

    let path = log_file.path().to_path_buf();
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging to {:?}", path);
    Some(guard)
}
