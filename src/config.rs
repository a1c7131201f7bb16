use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheOptions;
use crate::flow::{ChainOptions, DEFAULT_CONTENT_KEY};
use crate::hashing::DEFAULT_MAX_DEPTH;
use crate::xdg;

/// Complete stagecache configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StagecacheConfig {
    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub chain: ChainSection,
}

/// `[cache]`: where and how `PickleCache` stores entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Cache directory path
    pub dir: String,

    /// Context field whose value keys entries
    pub data_key: String,

    /// Always recompute, overwriting existing entries
    pub force: bool,

    /// Persist results
    pub save: bool,

    /// Recursion limit of the structural hasher
    pub max_depth: usize,

    /// Octal mode for created cache directories, e.g. "777"
    pub dir_mode: String,

    /// Hasher debug output: 0 silent, 1 digests, 2 every node
    pub debug_level: u8,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: xdg::cache_dir().to_string_lossy().into_owned(),
            data_key: DEFAULT_CONTENT_KEY.to_string(),
            force: false,
            save: true,
            max_depth: DEFAULT_MAX_DEPTH,
            dir_mode: "777".to_string(),
            debug_level: 0,
        }
    }
}

impl CacheSection {
    pub fn dir_mode_bits(&self) -> Result<u32> {
        let mode = u32::from_str_radix(self.dir_mode.trim_start_matches("0o"), 8)
            .with_context(|| format!("cache.dir_mode is not an octal mode: {}", self.dir_mode))?;
        if mode > 0o7777 {
            anyhow::bail!("cache.dir_mode out of range: {}", self.dir_mode);
        }
        Ok(mode)
    }

    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

/// `[chain]`: assembly options shared by `Chain` and `CachingChain`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Verify declared requirements when stages are added
    pub check: bool,

    /// Skip the requirement check for the first stage
    pub ignore_first_requirements: bool,

    /// Content key field rewritten by `CachingChain`
    pub id_key: String,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            check: false,
            ignore_first_requirements: true,
            id_key: DEFAULT_CONTENT_KEY.to_string(),
        }
    }
}

impl From<&CacheSection> for CacheOptions {
    /// An invalid `dir_mode` falls back to the default mode; run
    /// [`StagecacheConfig::validate`] to reject it instead.
    fn from(section: &CacheSection) -> Self {
        let defaults = CacheOptions::default();
        Self {
            force: section.force,
            save: section.save,
            max_depth: section.max_depth,
            dir_mode: section.dir_mode_bits().unwrap_or(defaults.dir_mode),
            debug_level: section.debug_level,
        }
    }
}

impl From<&ChainSection> for ChainOptions {
    fn from(section: &ChainSection) -> Self {
        Self {
            name: None,
            check: section.check,
            ignore_first_requirements: section.ignore_first_requirements,
        }
    }
}

impl StagecacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: StagecacheConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Example configuration with every option documented
    pub fn example() -> String {
        r#"# stagecache configuration
# Place as stagecache.toml in your project (discovered by walking up from the
# working directory) or at ~/.config/stagecache/config.toml.

[cache]
# Directory holding cache entries (shared directories are fine)
dir = ".stagecache"

# Context field whose value keys cache entries
data_key = "id"

# Recompute even when an entry exists
force = false

# Persist results (false = read-only cache)
save = true

# Recursion limit when fingerprinting stage configuration
max_depth = 10

# Octal mode for cache directories created by stagecache
dir_mode = "777"

# Hasher debug output: 0 silent, 1 digests, 2 every visited node
debug_level = 0

[chain]
# Verify that every stage's requirements are provided upstream
check = false

# The first stage reads raw input; do not check its requirements
ignore_first_requirements = true

# Content key rewritten as it flows through a caching chain
id_key = "id"
"#
        .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.dir.is_empty() {
            anyhow::bail!("cache.dir must be set");
        }

        if self.cache.data_key.is_empty() {
            anyhow::bail!("cache.data_key must not be empty");
        }

        self.cache.dir_mode_bits()?;

        if self.cache.max_depth == 0 {
            anyhow::bail!("cache.max_depth must be at least 1");
        }

        if self.cache.debug_level > 2 {
            anyhow::bail!("cache.debug_level must be 0, 1 or 2");
        }

        if self.chain.id_key.is_empty() {
            anyhow::bail!("chain.id_key must not be empty");
        }

        Ok(())
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::from(&self.cache)
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions::from(&self.chain)
    }
}
