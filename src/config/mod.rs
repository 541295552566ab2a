// Configuration module for bsread-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    ConfigLoader::validate(&config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut RecorderConfig) {
    if let Ok(key_expr) = std::env::var("STREAM_KEY_EXPR") {
        config.stream.key_expr = key_expr;
    }

    if let Ok(output_path) = std::env::var("WRITER_OUTPUT_PATH") {
        config.storage.filesystem.base_path = output_path;
    }

    if let Ok(url) = std::env::var("DISPATCHER_URL") {
        config.dispatcher.url = Some(url);
    }
}
