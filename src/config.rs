// src/config.rs

//! Configuration loading utilities.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load and validate configuration from a TOML file.
///
/// A missing file falls back to defaults; a file that exists but does not
/// parse is an error.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = if path.exists() {
        log::info!("Loading config from {}", path.display());
        Config::load(path)?
    } else {
        log::warn!("Config file {} not found. Using defaults.", path.display());
        Config::default()
    };

    config.validate()?;
    Ok(config)
}
