//! Cache management CLI commands.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use texfetch::cache::DiskImageCache;
use texfetch::config::{format_size, ConfigFile};
use tokio::runtime::Runtime;

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk cache statistics
    Stats,
    /// Clear the disk cache, removing every cached image
    Clear,
}

/// Run a cache subcommand against `dir`, or the configured directory.
pub fn run(action: CacheAction, dir: Option<PathBuf>) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let cache_dir = dir.unwrap_or_else(|| config.cache.directory.clone());

    match action {
        CacheAction::Stats => {
            let usage = runtime()?.block_on(stats(&cache_dir))?;
            println!("Disk cache: {}", cache_dir.display());
            println!("  Entries: {}", usage.0);
            println!("  Size:    {}", format_size(usage.1 as usize));
            println!(
                "  Memory cache limit: {}",
                format_size(config.cache.memory_size)
            );
            Ok(())
        }
        CacheAction::Clear => {
            println!("Clearing disk cache at: {}", cache_dir.display());
            let removed = runtime()?.block_on(clear(&cache_dir))?;
            println!("Deleted {} entries", removed);
            Ok(())
        }
    }
}

async fn stats(dir: &Path) -> Result<(u64, u64), CliError> {
    let cache = DiskImageCache::open(dir)?;
    let usage = cache.usage().await?;
    Ok((usage.entries, usage.bytes))
}

async fn clear(dir: &Path) -> Result<u64, CliError> {
    let cache = DiskImageCache::open(dir)?;
    Ok(cache.clear().await?)
}

/// Throwaway current-thread runtime for the async cache calls.
fn runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}
