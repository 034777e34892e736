//! Where hushline keeps its files.
//!
//! - **Config**: `$XDG_CONFIG_HOME/hushline/config.yaml` unless overridden
//!   with `--config`.
//! - **Log**: one file per run in the temp directory,
//!   `hushline-<YYYYMMDDHHMMSS>.log`.
//! - **Staged filter library**: temp directory, managed by
//!   [`crate::staging`].

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Application name used for directories and file prefixes
pub const APP_NAME: &str = "hushline";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Directory holding the per-run log files
    pub logs_dir: PathBuf,
    /// File name of this run's log
    pub log_file: String,
}

impl AppPaths {
    /// Resolve paths for this run.
    ///
    /// Called before logging is initialized.
    pub fn detect(config_override: Option<&Path>) -> Self {
        let config = match config_override {
            Some(path) => path.to_path_buf(),
            None => default_config_dir().join("config.yaml"),
        };

        Self {
            config,
            logs_dir: std::env::temp_dir(),
            log_file: log_file_name(Local::now()),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join(&self.log_file)
    }
}

fn default_config_dir() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(APP_NAME),
        None => {
            eprintln!("[paths] WARNING: no config directory found, using current directory");
            PathBuf::from(".")
        }
    }
}

/// Log file name for a run started at `started`
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("{}-{}.log", APP_NAME, started.format("%Y%m%d%H%M%S"))
}
