//! Per-process session context
//!
//! Everything the controller and the control surface share lives here and is
//! passed explicitly: the server connection, the staged filter library, the
//! published suppressor state and the configuration.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::StagingError;
use crate::pulse::AudioServer;
use crate::reconciler::SuppressorState;
use crate::staging::{LibraryStager, StagedArtifact};

pub struct Session {
    server: Arc<dyn AudioServer>,
    stager: LibraryStager,
    artifact: Mutex<Option<StagedArtifact>>,
    suppressor: watch::Receiver<SuppressorState>,
    config: Arc<AppConfig>,
}

impl Session {
    pub fn new(
        server: Arc<dyn AudioServer>,
        stager: LibraryStager,
        suppressor: watch::Receiver<SuppressorState>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            server,
            stager,
            artifact: Mutex::new(None),
            suppressor,
            config,
        }
    }

    pub fn server(&self) -> &dyn AudioServer {
        self.server.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Last state published by the reconciler
    pub fn suppressor_state(&self) -> SuppressorState {
        *self.suppressor.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SuppressorState> {
        self.suppressor.clone()
    }

    /// Path of the staged filter library, staging it first if needed.
    ///
    /// Re-stages when the file vanished (e.g. a temp cleaner removed it).
    pub fn ensure_artifact(&self) -> Result<PathBuf, StagingError> {
        let mut artifact = self.artifact.lock();
        if let Some(staged) = artifact.as_ref() {
            if staged.is_present() {
                return Ok(staged.path().to_path_buf());
            }
            warn!(
                "Staged filter library {} disappeared, staging it again",
                staged.path().display()
            );
        }

        let staged = self.stager.stage()?;
        let path = staged.path().to_path_buf();
        // Replacing drops (and deletes) the previous artifact
        *artifact = Some(staged);
        Ok(path)
    }

    /// Path of the currently staged library, if any
    pub fn artifact_path(&self) -> Option<PathBuf> {
        self.artifact
            .lock()
            .as_ref()
            .map(|staged| staged.path().to_path_buf())
    }

    /// Delete the staged library now instead of at drop
    pub fn release_artifact(&self) {
        if let Some(staged) = self.artifact.lock().take() {
            if staged.unstage() {
                info!("Released staged filter library");
            }
        }
    }

    /// Session over `server` staging a fake library into `dir`
    #[cfg(test)]
    pub fn for_tests(server: Arc<dyn AudioServer>, dir: &std::path::Path) -> Self {
        let (_tx, rx) = watch::channel(SuppressorState::Unloaded);
        Self::new(
            server,
            LibraryStager::with_bytes(b"\x7fELF test filter".to_vec()).in_dir(dir),
            rx,
            Arc::new(AppConfig::default()),
        )
    }
}
