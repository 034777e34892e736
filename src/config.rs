//! Configuration management for hushline
//!
//! A small YAML file read once at startup. Every section and field has a
//! default, so an empty or partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

/// Highest accepted voice activation threshold (percent)
pub const MAX_THRESHOLD: u8 = 95;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Log level used when neither `RUST_LOG` nor `--log-level` is given
    pub log_level: String,
    /// Fallback re-derive interval of the state reconciler
    pub reconcile_interval_ms: u64,
    pub pactl: PactlConfig,
    pub filter: FilterConfig,
    pub elevation: ElevationConfig,
}

/// How to reach the audio server
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PactlConfig {
    /// `pactl` executable (name on `PATH` or absolute path)
    pub binary: String,
    /// Upper bound for a single query or graph edit
    pub timeout_ms: u64,
}

/// Noise-suppression filter parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Voice activation threshold in percent, 0-95
    pub threshold: u8,
}

/// Memory-lock elevation settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ElevationConfig {
    /// Ask for an unlimited memlock limit before loading the filter
    pub enabled: bool,
    /// Authorization agent that re-runs this binary in helper role
    pub program: String,
    /// Give up waiting for the agent after this long
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconcile_interval_ms: default_reconcile_interval(),
            pactl: PactlConfig::default(),
            filter: FilterConfig::default(),
            elevation: ElevationConfig::default(),
        }
    }
}

impl Default for PactlConfig {
    fn default() -> Self {
        Self {
            binary: default_pactl_binary(),
            timeout_ms: default_pactl_timeout(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            threshold: MAX_THRESHOLD,
        }
    }
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_elevation_program(),
            timeout_secs: default_elevation_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Write the default configuration if `path` does not exist yet.
    ///
    /// Returns `true` if a file was created.
    pub async fn initialize_if_missing(path: &Path) -> Result<bool> {
        if fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        AppConfig::default().save(path).await?;
        info!("Created default config at {}", path.display());
        Ok(true)
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.filter.threshold > MAX_THRESHOLD {
            anyhow::bail!(
                "filter.threshold {} is out of range (must be 0-{})",
                self.filter.threshold,
                MAX_THRESHOLD
            );
        }
        if self.reconcile_interval_ms == 0 {
            anyhow::bail!("reconcile_interval_ms must be greater than 0");
        }
        if self.pactl.binary.trim().is_empty() {
            anyhow::bail!("pactl.binary cannot be empty");
        }
        if self.pactl.timeout_ms == 0 {
            anyhow::bail!("pactl.timeout_ms must be greater than 0");
        }
        if self.elevation.enabled {
            if self.elevation.program.trim().is_empty() {
                anyhow::bail!("elevation.program cannot be empty while elevation is enabled");
            }
            if self.elevation.timeout_secs == 0 {
                anyhow::bail!("elevation.timeout_secs must be greater than 0");
            }
        }
        if tracing_subscriber::EnvFilter::try_new(&self.log_level).is_err() {
            anyhow::bail!("log_level '{}' is not a valid filter", self.log_level);
        }

        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_reconcile_interval() -> u64 { 2000 }
fn default_pactl_binary() -> String { "pactl".to_string() }
fn default_pactl_timeout() -> u64 { 5000 }
fn default_elevation_program() -> String { "pkexec".to_string() }
fn default_elevation_timeout() -> u64 { 60 }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "filter:\n  threshold: 60\npactl:\n  timeout_ms: 250\n").unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.filter.threshold, 60);
        assert_eq!(config.pactl.timeout_ms, 250);
        assert_eq!(config.pactl.binary, "pactl");
        assert!(config.elevation.enabled);
        assert_eq!(config.elevation.program, "pkexec");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();

        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_out_of_range_threshold_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "filter:\n  threshold: 99\n").unwrap();

        let err = AppConfig::load(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains("threshold"));
    }

    #[tokio::test]
    async fn test_malformed_yaml_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "filter: [unclosed\n").unwrap();

        assert!(AppConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_initialize_if_missing_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        assert!(AppConfig::initialize_if_missing(&path).await.unwrap());
        assert!(!AppConfig::initialize_if_missing(&path).await.unwrap());
        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_save_round_trip_keeps_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = AppConfig::default();
        config.elevation.enabled = false;
        config.elevation.program = String::new();
        config.log_level = "hushline=debug".to_string();
        config.save(&path).await.unwrap();

        assert_eq!(AppConfig::load(&path).await.unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = AppConfig {
            reconcile_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ignores_program_when_elevation_disabled() {
        let mut config = AppConfig::default();
        config.elevation.program = String::new();
        assert!(config.validate().is_err());
        config.elevation.enabled = false;
        assert!(config.validate().is_ok());
    }
}
