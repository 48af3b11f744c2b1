//! `b list`: show configured binaries and envs with their versions.

use std::sync::Arc;

use anyhow::Result;
use b_lib::cancel::CancelToken;
use b_lib::gitcache::GitCache;
use b_lib::install::{Installer, NullSink};
use b_lib::lock::Lock;
use b_lib::orchestrate::display_name;
use b_lib::process::SystemRunner;
use b_lib::provider::{Http, Registry};

use super::{Shared, cache_root, runtime};
use crate::output::{short_commit, symbols};

pub fn run(shared: &Shared, local: bool) -> Result<()> {
  let project = shared.load_project()?;
  let lock = Lock::read(&project.root)?;

  if project.manifest.is_empty() {
    if !shared.quiet {
      println!("Nothing configured in {}", project.manifest_path.display());
    }
    return Ok(());
  }

  let registry = Registry::standard();
  let http = Http::new();
  let cache = Arc::new(GitCache::new(cache_root(), SystemRunner));
  let cancel = CancelToken::new();
  let rt = runtime()?;

  if !project.manifest.binaries.is_empty() {
    println!("Binaries:");
  }
  for spec in &project.manifest.binaries {
    let name = display_name(spec);
    let installed = project.bin_dir.join(&name).is_file();
    let locked = lock.find_binary(&name).map(|e| e.version.clone());

    let latest = if local {
      None
    } else {
      let installer = Installer {
        registry: &registry,
        http: &http,
        runner: cache.runner(),
        cache: &cache,
        bin_dir: &project.bin_dir,
        picker: None,
        sink: &NullSink,
      };
      rt.block_on(installer.latest_version(spec, &cancel)).ok()
    };

    let mark = if installed { symbols::SUCCESS } else { symbols::ERROR };
    let mut line = format!("  {} {:<28} {:<14}", mark, name, locked.as_deref().unwrap_or("-"));
    if let Some(latest) = latest {
      line.push_str(&format!(" latest: {}", latest));
    }
    println!("{}", line);
  }

  if !project.manifest.envs.is_empty() {
    println!("Envs:");
  }
  for env in &project.manifest.envs {
    let entry = lock.find_env(&env.ref_base, &env.label);
    let commit = entry.map(|e| e.commit.clone()).unwrap_or_default();
    let files = entry.map(|e| e.files.len()).unwrap_or(0);
    println!(
      "  {} {:<40} {:<14} {} file(s)",
      if entry.is_some() { symbols::SUCCESS } else { symbols::INFO },
      env.key,
      short_commit(&commit),
      files
    );
  }

  Ok(())
}
