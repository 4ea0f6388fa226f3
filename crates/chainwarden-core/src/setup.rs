//! Ordered install/uninstall steps.
//!
//! The runner executes a fixed list of [`SetupStep`]s: in registration order
//! for install and in reverse for uninstall. The first failing step aborts the
//! run. A zero-byte marker file records that an install completed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SetupError;

/// A reversible system change performed during setup.
#[async_trait]
pub trait SetupStep: Send + Sync {
    fn install_name(&self) -> &str;
    fn install_description(&self) -> &str;
    fn uninstall_name(&self) -> &str;
    fn uninstall_description(&self) -> &str;

    async fn install(&self) -> anyhow::Result<()>;
    async fn uninstall(&self) -> anyhow::Result<()>;
}

/// Direction of a setup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupMode {
    Install,
    Uninstall,
}

impl fmt::Display for SetupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupMode::Install => write!(f, "install"),
            SetupMode::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Runs registered setup steps and tracks completion with a marker file.
pub struct SetupRunner {
    steps: Vec<Arc<dyn SetupStep>>,
    marker: PathBuf,
}

impl SetupRunner {
    /// Creates a runner over `steps`, recording completion at `marker`.
    pub fn new(steps: Vec<Arc<dyn SetupStep>>, marker: impl Into<PathBuf>) -> Self {
        Self {
            steps,
            marker: marker.into(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Whether a previous install run completed.
    pub fn is_complete(&self) -> bool {
        self.marker.exists()
    }

    pub async fn install(&self, cancel: &CancellationToken) -> Result<(), SetupError> {
        self.run(SetupMode::Install, cancel).await
    }

    pub async fn uninstall(&self, cancel: &CancellationToken) -> Result<(), SetupError> {
        self.run(SetupMode::Uninstall, cancel).await
    }

    /// Executes every step for `mode`, stopping at the first failure.
    pub async fn run(&self, mode: SetupMode, cancel: &CancellationToken) -> Result<(), SetupError> {
        let total = self.steps.len();
        let mut ordered: Vec<&Arc<dyn SetupStep>> = self.steps.iter().collect();
        if mode == SetupMode::Uninstall {
            ordered.reverse();
        }

        info!(%mode, steps = total, "Running setup");

        for (index, step) in ordered.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SetupError::Cancelled);
            }

            let (name, description) = match mode {
                SetupMode::Install => (step.install_name(), step.install_description()),
                SetupMode::Uninstall => (step.uninstall_name(), step.uninstall_description()),
            };
            info!("[{}/{}] {}", index + 1, total, name);
            debug!("{}", description);

            let result = match mode {
                SetupMode::Install => step.install().await,
                SetupMode::Uninstall => step.uninstall().await,
            };
            result.map_err(|source| SetupError::Step {
                name: name.to_string(),
                source,
            })?;
        }

        match mode {
            SetupMode::Install => self.write_marker()?,
            SetupMode::Uninstall => self.remove_marker()?,
        }

        info!(%mode, "Setup finished");
        Ok(())
    }

    fn write_marker(&self) -> Result<(), SetupError> {
        if let Some(parent) = self.marker.parent() {
            std::fs::create_dir_all(parent).map_err(SetupError::Marker)?;
        }
        std::fs::File::create(&self.marker).map_err(SetupError::Marker)?;
        Ok(())
    }

    fn remove_marker(&self) -> Result<(), SetupError> {
        match std::fs::remove_file(&self.marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SetupError::Marker(e)),
        }
    }
}
