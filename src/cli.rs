use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// stagecache - inspect and maintain pipeline result caches
///
/// Pipelines built on the stagecache library store one entry per
/// (input, stage configuration) pair. This tool lists, verifies and cleans
/// those entries.
#[derive(Parser, Debug)]
#[command(name = "stagecache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and maintain pipeline result caches", long_about = None)]
pub struct Cli {
    /// Config file path (default: discover stagecache.toml)
    #[arg(short = 'c', long, global = true, env = "STAGECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage cache entries
    Cache(CacheArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,

    /// Cache directory (overrides the configuration)
    #[arg(long, env = "STAGECACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cache entries
    List {
        /// Decode entries and show their contents summary
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print one entry as JSON
    Show {
        /// Entry file name or path
        entry: String,
    },

    /// Show cache statistics
    Stats,

    /// Decode every entry and report corrupted ones
    Verify {
        /// Delete corrupted entries
        #[arg(long)]
        prune: bool,
    },

    /// Delete every entry
    Clean,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: PathBuf,
    },
    /// Print an example config file
    Generate,
    /// Show effective configuration
    Show,
}
