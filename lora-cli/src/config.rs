//! Configuration discovery for lora-bridge.

use anyhow::{Context, Result};
use lorabridge_relay::BridgeConfig;
use std::path::{Path, PathBuf};

/// File name looked up in the platform config directory.
pub const CONFIG_FILE: &str = "lora-bridge.toml";

/// Load the bridge configuration.
///
/// An explicit path must exist. Without one, the platform config directory
/// is tried, and built-in defaults apply if nothing is there.
pub fn load(explicit: Option<&Path>) -> Result<BridgeConfig> {
    if let Some(path) = explicit {
        return BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "using config from config directory");
            BridgeConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        _ => {
            tracing::debug!("no config file, using defaults");
            Ok(BridgeConfig::default())
        }
    }
}

/// Platform config location, e.g. `~/.config/lora-bridge/lora-bridge.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "lorabridge", "lora-bridge")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
