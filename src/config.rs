//! Converter configuration
//!
//! Stored in ~/.config/retex/settings.json. Command-line flags override
//! whatever is loaded from disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default wait for a single VTFCmd invocation
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

fn default_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("retex")
}

/// Settings shared by every conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Explicit VTFCmd location (None = search PATH)
    #[serde(default)]
    pub vtf_tool: Option<PathBuf>,

    /// Where editable PNG/JSON pairs are written
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Seconds before an external tool call is killed
    #[serde(default = "default_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            vtf_tool: None,
            work_dir: default_work_dir(),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

impl ConverterConfig {
    /// Get the config directory path (~/.config/retex)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("retex");

        Ok(config_dir)
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::try_load(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!("Could not load settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Try to load settings from `path`; a missing file gives defaults
    pub fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(config)
    }

    /// Save settings to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::paths::ensure_parent_dirs(path)
            .with_context(|| format!("Failed to create parent of {:?}", path))?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Check the configuration before any conversion starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tool) = &self.vtf_tool {
            if !tool.exists() {
                return Err(ConfigError::ToolNotFound(tool.clone()));
            }
        }

        if self.work_dir.exists() && !self.work_dir.is_dir() {
            return Err(ConfigError::WorkDirNotDirectory(self.work_dir.clone()));
        }

        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("VTFCmd not found: {0}")]
    ToolNotFound(PathBuf),

    #[error("Work directory is not a directory: {0}")]
    WorkDirNotDirectory(PathBuf),

    #[error("Tool timeout must be at least one second")]
    ZeroTimeout,
}
