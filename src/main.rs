use anyhow::Result;
use clap::Parser;

use stagecache::cli::{Cli, Commands};
use stagecache::{commands, logging};

fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Cache(args) => commands::cache::cache(&args, config_path),
        Commands::Config(args) => commands::config::run(args.command, config_path),
    }
}
