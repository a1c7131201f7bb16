pub mod cache;
pub mod config;

use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::StagecacheConfig;
use crate::config_discovery::load_config_with_discovery;

/// Explicit or discovered configuration, defaults when there is none.
pub fn load_config(explicit_path: Option<&Path>) -> Result<StagecacheConfig> {
    match load_config_with_discovery(explicit_path)? {
        Some(config) => {
            debug!("Using configuration with cache dir {}", config.cache.dir);
            Ok(config)
        }
        None => {
            warn!("No configuration file found, using defaults");
            Ok(StagecacheConfig::default())
        }
    }
}
