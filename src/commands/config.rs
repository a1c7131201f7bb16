use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::cli::ConfigCommands;
use crate::config::StagecacheConfig;

pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Generate => generate(),
        ConfigCommands::Show => show(config_path),
    }
}

fn validate(path: &Path) -> Result<()> {
    info!("Validating config file: {}", path.display());

    let config = StagecacheConfig::from_file(path)?;
    config.validate()?;

    println!("✓ Configuration file is valid: {}", path.display());
    println!("\nSummary:");
    println!("  - Cache directory: {}", config.cache.dir);
    println!("  - Content key: {}", config.cache.data_key);
    println!("  - Force: {}, save: {}", config.cache.force, config.cache.save);
    println!("  - Directory mode: {}", config.cache.dir_mode);
    println!("  - Chain id key: {}", config.chain.id_key);

    Ok(())
}

fn generate() -> Result<()> {
    println!("{}", StagecacheConfig::example());
    Ok(())
}

fn show(config_path: Option<&Path>) -> Result<()> {
    info!("Showing effective configuration");

    let config = super::load_config(config_path)?;

    println!("Effective Configuration:\n");
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
