// src/config.rs

//! Configuration loading utilities.
//!
//! Composes the TOML file, environment overrides and validation into the
//! single configuration a run reads at startup.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Falls back to defaults if the file cannot be loaded; the merged result
/// must still validate.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit variable lookup.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        Config::load_or_default(path)
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Config::default()
    };
    config.apply_env_from(lookup);
    config.validate()?;
    Ok(config)
}
