//! Configuration file support for resus.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/resus/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

/// Where the active session, event log and exports live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Fixed pathways: triage, pathway selection, ordered steps
    #[default]
    Pathway,
    /// Letter-by-letter primary survey with threat rules
    Survey,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub default: EngineKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Also write the event log as CSV on export
    #[serde(default)]
    pub csv: bool,

    /// List the patient context in the audit header
    #[serde(default = "default_include_patient")]
    pub include_patient: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            csv: false,
            include_patient: default_include_patient(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("resus")
}

fn default_include_patient() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("resus").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.default, EngineKind::Pathway);
        assert!(!config.export.csv);
        assert!(config.export.include_patient);
        assert!(config.data.data_dir.ends_with("resus"));
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[engine]
default = "survey"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default, EngineKind::Survey);
        assert!(config.export.include_patient); // default
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.export.csv = true;
        config.data.data_dir = dir.path().join("data");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.export.csv);
        assert_eq!(loaded.data.data_dir, dir.path().join("data"));
    }

    #[test]
    fn test_rejects_unknown_engine() {
        let result: std::result::Result<Config, _> = toml::from_str("[engine]\ndefault = \"magic\"\n");
        assert!(result.is_err());
    }
}
