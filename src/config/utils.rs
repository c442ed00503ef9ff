/// Configuration utilities - loading and validation
///
/// Configuration is passed explicitly to the components that need it; there is
/// no global instance. Missing files fall back to defaults, malformed files are
/// an error.
use super::schemas::Config;
use crate::logger::{self, LogTag};
use std::path::Path;

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/interval_pool.toml";

/// Load configuration from the default path
pub fn load_config() -> Result<Config, String> {
    load_config_from_path(CONFIG_FILE_PATH)
}

/// Load configuration from a specific file path
///
/// Uses default values when the file does not exist.
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<Config, String> {
    let path = path.as_ref();
    if !path.exists() {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    load_config_from_str(&contents)
        .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))
}

/// Parse and validate configuration from TOML text
pub fn load_config_from_str(contents: &str) -> Result<Config, String> {
    let config = toml::from_str::<Config>(contents).map_err(|e| e.to_string())?;
    config.pool.validate()?;
    Ok(config)
}

/// Serialize configuration to TOML (for writing a starter file)
pub fn config_to_toml(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))
}
