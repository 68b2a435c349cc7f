//! Initialize the configuration directory: create ~/.scout and a default config.json.
//!
//! The written config carries no secrets; they come from env vars or are filled in by hand.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Default config rendered as pretty JSON (every key present, secrets null).
pub fn default_config_json() -> Result<String> {
    serde_json::to_string_pretty(&Config::default()).context("serializing default config")
}

/// Create the config directory and a default `config.json` if missing.
/// An existing config file is left untouched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if config_path.exists() {
        log::info!("config already exists at {}, leaving it", config_path.display());
    } else {
        std::fs::write(config_path, default_config_json()?)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}
