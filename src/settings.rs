//! Persistent user settings
//!
//! Stored in ~/.config/exnavy/settings.json. Command-line flags override
//! whatever is loaded here.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// User settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Default directory for downloaded models
    #[serde(default)]
    pub downloads_dir: String,

    /// Default directory repositories are cloned into
    #[serde(default)]
    pub repos_dir: String,

    /// `Authorization` header sent to Hugging Face
    #[serde(default)]
    pub auth_header: String,

    /// Parallel jobs for batch operations (None = one per core)
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl Settings {
    /// Get the config directory path (~/.config/exnavy)
    pub fn config_dir() -> Result<PathBuf, SettingsError> {
        Ok(dirs::config_dir()
            .ok_or(SettingsError::NoConfigDir)?
            .join("exnavy"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf, SettingsError> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|p| Self::load_from(&p)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Reject values that would break downstream commands
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.jobs == Some(0) {
            return Err(SettingsError::Invalid {
                field: "jobs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.auth_header.contains(['\r', '\n']) {
            return Err(SettingsError::Invalid {
                field: "auth_header",
                reason: "must be a single line".to_string(),
            });
        }
        Ok(())
    }

    /// Auth header, if one is configured
    pub fn auth_header(&self) -> Option<&str> {
        Some(self.auth_header.as_str()).filter(|h| !h.is_empty())
    }

    /// Downloads directory, falling back to the current directory
    pub fn downloads_dir(&self) -> PathBuf {
        if self.downloads_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.downloads_dir)
        }
    }
}
