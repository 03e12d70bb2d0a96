use crate::error::{MergyError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "mergy.toml";

fn default_min_confidence() -> f64 {
    0.7
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Minimum match confidence in [0, 1] below which folder pairs are
    /// not considered related
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Whether directory walks follow symbolic links
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            follow_symlinks: false,
            portable_mode: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let exists = path.exists();

    let mut config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| MergyError::Config(e.to_string()))?
    } else {
        AppConfig::default()
    };

    config.portable_mode = portable;

    Ok(LoadedConfig {
        config,
        path,
        exists,
        portable,
    })
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config).map_err(|e| MergyError::Config(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool)> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "mergy-tools", "mergy")
        .ok_or_else(|| MergyError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert!((config.min_confidence - 0.7).abs() < f64::EPSILON);
        assert!(!config.follow_symlinks);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AppConfig {
            min_confidence: 0.85,
            follow_symlinks: true,
            portable_mode: false,
        };
        let data = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&data).unwrap();
        assert!((parsed.min_confidence - 0.85).abs() < f64::EPSILON);
        assert!(parsed.follow_symlinks);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: AppConfig = toml::from_str("").unwrap();
        assert!((parsed.min_confidence - 0.7).abs() < f64::EPSILON);
    }
}
