//! Initialize the configuration directory: create ~/.tether with a default config and an
//! empty preferences file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with every default spelled out, if missing.
/// - Writes `prefs.json` with `{}`, if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config::config_dir(config_path);
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    let prefs = config::prefs_path(config_path);
    if !prefs.exists() {
        std::fs::write(&prefs, b"{}")
            .with_context(|| format!("writing preferences to {}", prefs.display()))?;
        log::info!("created preferences at {}", prefs.display());
    }

    Ok(config_dir.to_path_buf())
}
