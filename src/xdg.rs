//! XDG Base Directory support
//!
//! - `$XDG_CACHE_HOME/stagecache/` (default: `~/.cache/stagecache/`): default cache directory
//! - `$XDG_CONFIG_HOME/stagecache/` (default: `~/.config/stagecache/`): user configuration

use std::path::PathBuf;

/// Default cache directory for pipeline results.
///
/// Respects `XDG_CACHE_HOME`, then the platform cache directory, then
/// `$HOME/.cache`.
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join("stagecache")
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join("stagecache")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".cache").join("stagecache")
    } else {
        PathBuf::from(".stagecache")
    }
}

/// User configuration directory.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join("stagecache")
    } else if let Some(config) = dirs::config_dir() {
        config.join("stagecache")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join("stagecache")
    } else {
        PathBuf::from(".stagecache-config")
    }
}

/// `config.toml` inside [`config_dir`].
pub fn user_config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_cache_dir_respects_xdg_env() {
        std::env::set_var("XDG_CACHE_HOME", "/tmp/test-cache");
        let dir = cache_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-cache/stagecache"));
        std::env::remove_var("XDG_CACHE_HOME");
    }

    #[test]
    #[serial]
    fn test_user_config_file_respects_xdg_env() {
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        let file = user_config_file();
        assert_eq!(file, PathBuf::from("/tmp/test-config/stagecache/config.toml"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }
}
