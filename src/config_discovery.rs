use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::StagecacheConfig;
use crate::xdg;

/// Project configuration file name.
pub const CONFIG_FILE_NAME: &str = "stagecache.toml";

/// Find `stagecache.toml` in `start_dir` or any parent, falling back to the
/// user configuration file.
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Ok(Some(config_path));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    let global_config = xdg::user_config_file();
    if global_config.exists() {
        return Ok(Some(global_config));
    }

    Ok(None)
}

/// Load configuration from `explicit_path`, or discover it from the current
/// directory. `Ok(None)` when there is none.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<Option<StagecacheConfig>> {
    if let Some(config_path) = explicit_path {
        return Ok(Some(StagecacheConfig::from_file(config_path)?));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;

    match discover_config(&current_dir)? {
        Some(discovered_path) => Ok(Some(StagecacheConfig::from_file(&discovered_path)?)),
        None => Ok(None),
    }
}
