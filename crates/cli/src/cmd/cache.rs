//! `b cache`: manage the git clone cache.

use anyhow::{Context, Result};
use b_lib::gitcache::GitCache;
use b_lib::process::SystemRunner;
use clap::Subcommand;

use super::{Shared, cache_root};
use crate::output::{self, format_bytes};

#[derive(Subcommand)]
pub enum CacheCommands {
  /// Remove all cached repositories
  Clean,
  /// Print the cache directory path
  Path,
  /// Print the cache size on disk
  Size,
}

pub fn run(shared: &Shared, command: CacheCommands) -> Result<()> {
  let cache = GitCache::new(cache_root(), SystemRunner);

  match command {
    CacheCommands::Path => {
      println!("{}", cache.root().display());
      Ok(())
    }
    CacheCommands::Size => {
      let size = cache.size().context("reading cache")?;
      println!("{}", format_bytes(size));
      Ok(())
    }
    CacheCommands::Clean => {
      let freed = cache.clean().context("removing cache")?;
      if freed == 0 {
        if !shared.quiet {
          println!("Cache is already clean (nothing to remove)");
        }
      } else if !shared.quiet {
        output::print_success(&format!(
          "Removed {} ({} freed)",
          cache.root().display(),
          format_bytes(freed)
        ));
      }
      Ok(())
    }
  }
}
