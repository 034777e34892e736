//! Staging of the embedded noise-suppression library
//!
//! The audio server loads LADSPA plugins by path, so the bundled library is
//! written to a uniquely named file in the temp directory and removed again
//! when the [`StagedArtifact`] is dropped.

use rust_embed::RustEmbed;
use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::StagingError;

/// File name of the filter library inside `assets/`
pub const ARTIFACT_NAME: &str = "librnnoise_ladspa.so";

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

/// Writes the filter library to disk on demand
#[derive(Clone)]
pub struct LibraryStager {
    bytes: Option<Cow<'static, [u8]>>,
    dir: Option<PathBuf>,
}

impl LibraryStager {
    /// Stager for the library embedded at build time
    pub fn embedded() -> Self {
        Self {
            bytes: Assets::get(ARTIFACT_NAME).map(|file| file.data),
            dir: None,
        }
    }

    /// Stager for arbitrary library bytes
    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(Cow::Owned(bytes.into())),
            dir: None,
        }
    }

    /// Stager for a build that carries no library
    pub fn without_artifact() -> Self {
        Self {
            bytes: None,
            dir: None,
        }
    }

    /// Stage into `dir` instead of the system temp directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn has_artifact(&self) -> bool {
        self.bytes.is_some()
    }

    /// Write the library to a fresh, uniquely named file
    pub fn stage(&self) -> Result<StagedArtifact, StagingError> {
        let bytes = self
            .bytes
            .as_deref()
            .ok_or_else(|| StagingError::MissingArtifact(ARTIFACT_NAME.to_string()))?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("librnnoise-").suffix(".so");
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        file.write_all(bytes)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        info!("Wrote temp filter library to: {}", path.display());
        Ok(StagedArtifact {
            path,
            removed: false,
        })
    }
}

/// The staged library file; deleted when dropped
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    removed: bool,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is still on disk (temp cleaners may remove it)
    pub fn is_present(&self) -> bool {
        !self.removed && self.path.is_file()
    }

    /// Delete the file now. Returns `false` if deletion failed (logged only).
    pub fn unstage(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        if self.removed {
            return true;
        }
        self.removed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted temp filter library: {}", self.path.display());
                true
            }
            Err(e) => {
                warn!(
                    "Couldn't delete temp filter library {}: {}",
                    self.path.display(),
                    e
                );
                false
            }
        }
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}
