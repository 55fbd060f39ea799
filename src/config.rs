//! Application configuration.
//!
//! Read from `<config dir>/birdkb/config.json`. The data directory is
//! resolved in priority order: command-line flag, `BIRDKB_DATA_DIR`,
//! the config file, then the platform data directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::Deserialize;

const APP_NAME: &str = "birdkb";
const CONFIG_FILE: &str = "config.json";
pub const DATA_DIR_ENV: &str = "BIRDKB_DATA_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the knowledge-base tables.
    pub data_dir: Option<PathBuf>,
    /// Exported classifier, relative to the data directory unless absolute.
    pub model_file: PathBuf,
    /// Exported label encoder, relative to the data directory unless absolute.
    pub label_encoder_file: PathBuf,
    /// Port for the HTTP API.
    pub port: u16,
    /// Start with the default bird features when no registry is stored.
    pub seed_default_features: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            model_file: PathBuf::from("model.json"),
            label_encoder_file: PathBuf::from("label_encoder.json"),
            port: 17020,
            seed_default_features: true,
        }
    }
}

impl AppConfig {
    /// Load `config.json`, falling back to defaults when it is absent or unreadable.
    pub fn load() -> Self {
        match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Resolve the data directory.
    pub fn resolve_data_dir(&self, cli_arg: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = cli_arg {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(DATA_DIR_ENV) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        if let Some(path) = &self.data_dir {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("", "", APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn model_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.model_file)
    }

    pub fn label_encoder_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.label_encoder_file)
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
