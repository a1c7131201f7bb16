/// `stagecache cache` command implementation
///
/// Maintains a cache directory written by `PickleCache` (list, show, stats,
/// verify, clean).
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::entry::{self, EntryError};
use crate::cli::{CacheArgs, CacheCommands};
use crate::cli_utils::{human_bytes, stagecache_prefix};

pub fn cache(args: &CacheArgs, config_path: Option<&Path>) -> Result<()> {
    let cache_dir = match &args.cache_dir {
        Some(dir) => dir.clone(),
        None => super::load_config(config_path)?.cache.dir_path(),
    };

    match &args.command {
        CacheCommands::List { verbose } => list(&cache_dir, *verbose),
        CacheCommands::Show { entry } => show(&cache_dir, entry),
        CacheCommands::Stats => stats(&cache_dir),
        CacheCommands::Verify { prune } => verify(&cache_dir, *prune),
        CacheCommands::Clean => clean(&cache_dir),
    }
}

fn entries(cache_dir: &Path) -> Result<Vec<PathBuf>> {
    entry::list_entries(cache_dir)
        .with_context(|| format!("Failed to list cache directory: {}", cache_dir.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List cache entries
fn list(cache_dir: &Path, verbose: bool) -> Result<()> {
    let entries = entries(cache_dir)?;

    if entries.is_empty() {
        println!("No cache entries in {}", cache_dir.display());
        return Ok(());
    }

    println!("Cache entries in {} ({}):", cache_dir.display(), entries.len());
    println!();

    for path in &entries {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to stat cache entry: {}", path.display()))?;
        let modified = metadata
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  {}  {:>10}  {}",
            file_name(path),
            human_bytes(metadata.len()),
            modified
        );

        if verbose {
            match entry::read_entry(path) {
                Ok(record) => {
                    println!(
                        "      keys: {}, stopped: {}",
                        record.data.len(),
                        record.stopped
                    );
                    println!("      chain: {}", record.chain_repr);
                }
                Err(e) => println!("      unreadable: {}", e),
            }
        }
    }

    Ok(())
}

/// Print one entry as pretty JSON
fn show(cache_dir: &Path, name: &str) -> Result<()> {
    let given = PathBuf::from(name);
    let path = if given.is_file() {
        given
    } else {
        cache_dir.join(name)
    };

    let record = entry::read_entry(&path)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Show cache statistics
fn stats(cache_dir: &Path) -> Result<()> {
    let entries = entries(cache_dir)?;

    let mut total_bytes = 0u64;
    let mut stopped = 0usize;
    let mut corrupted = 0usize;

    for path in &entries {
        total_bytes += fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match entry::read_entry(path) {
            Ok(record) if record.stopped => stopped += 1,
            Ok(_) => {}
            Err(_) => corrupted += 1,
        }
    }

    println!("Cache Statistics:");
    println!();
    println!("  Directory: {}", cache_dir.display());
    println!("  Total entries: {}", entries.len());
    println!("  Total size: {}", human_bytes(total_bytes));
    println!("  Stopped entries: {}", stopped);
    println!("  Corrupted entries: {}", corrupted);

    Ok(())
}

/// Decode every entry; report or delete corrupted ones
fn verify(cache_dir: &Path, prune: bool) -> Result<()> {
    let entries = entries(cache_dir)?;
    let mut corrupted = Vec::new();

    for path in &entries {
        match entry::read_entry(path) {
            Ok(_) => {}
            Err(e @ EntryError::Corrupted { .. }) => {
                println!("{} corrupted: {} ({})", stagecache_prefix(), file_name(path), e);
                corrupted.push(path.clone());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if corrupted.is_empty() {
        println!(
            "{} All {} entries are valid.",
            stagecache_prefix(),
            entries.len()
        );
        return Ok(());
    }

    if !prune {
        anyhow::bail!(
            "{} of {} entries are corrupted (rerun with --prune to delete them)",
            corrupted.len(),
            entries.len()
        );
    }

    for path in &corrupted {
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete cache entry: {}", path.display()))?;
    }
    println!(
        "{} Deleted {} corrupted entries.",
        stagecache_prefix(),
        corrupted.len()
    );

    Ok(())
}

/// Delete every entry
fn clean(cache_dir: &Path) -> Result<()> {
    let entries = entries(cache_dir)?;

    println!("{} Cleaning {}...", stagecache_prefix(), cache_dir.display());
    for path in &entries {
        fs::remove_file(path)
            .with_context(|| format!("Failed to delete cache entry: {}", path.display()))?;
    }
    println!("{} Removed {} entries.", stagecache_prefix(), entries.len());

    Ok(())
}
