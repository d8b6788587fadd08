//! Autoloop Configuration
//!
//! Loads and saves the engine configuration from `~/.autoloop/autoloop.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_config, LoopConfig};

/// Config file name within the autoloop directory.
const CONFIG_FILENAME: &str = "autoloop.json";

/// Returns the autoloop home directory: `~/.autoloop`.
pub fn get_autoloop_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".autoloop")
}

/// Returns the full path to the config file: `~/.autoloop/autoloop.json`.
pub fn get_config_path() -> PathBuf {
    get_autoloop_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk.
///
/// Reads `~/.autoloop/autoloop.json` and merges missing fields with
/// defaults. Returns `None` if the config file does not exist or cannot
/// be parsed.
pub fn load_config() -> Option<LoopConfig> {
    let config_path = get_config_path();
    if !config_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&config_path).ok()?;
    let mut config: LoopConfig = serde_json::from_str(&contents).ok()?;

    // Merge defaults for unset fields
    let defaults = default_config();

    if config.api_url.is_empty() {
        config.api_url = defaults.api_url;
    }
    if config.log_dir.is_empty() {
        config.log_dir = defaults.log_dir;
    }
    if config.compress_at_chars == 0 {
        config.compress_at_chars = defaults.compress_at_chars;
    }
    if config.max_context_chars == 0 {
        config.max_context_chars = defaults.max_context_chars;
    }
    if config.port == 0 {
        config.port = defaults.port;
    }

    Some(config)
}

/// Save the config to disk at `~/.autoloop/autoloop.json`.
///
/// Creates the autoloop directory with mode 0o700 if it does not exist.
pub fn save_config(config: &LoopConfig) -> Result<()> {
    let dir = get_autoloop_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create autoloop directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
///
/// If the path starts with `~`, the tilde is replaced with the user's
/// home directory. Otherwise the path is returned as-is.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}
