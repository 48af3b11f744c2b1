//! `b version`: tool version, with an optional staleness check.

use std::sync::Arc;

use anyhow::{Result, bail};
use b_lib::cancel::CancelToken;
use b_lib::gitcache::GitCache;
use b_lib::install::{BinaryKind, Installer, NullSink};
use b_lib::orchestrate::display_name;
use b_lib::preset::VersionProbe;
use b_lib::process::{CmdOutput, SystemRunner};
use b_lib::provider::{Http, Registry};

use super::{Shared, cache_root, runtime, tool_version};
use crate::output::symbols;

pub fn run(shared: &Shared, check: bool) -> Result<()> {
  if !check {
    println!("b {}", tool_version());
    return Ok(());
  }

  let project = shared.load_project()?;
  let registry = Registry::standard();
  let http = Http::new();
  let cache = Arc::new(GitCache::new(cache_root(), SystemRunner));
  let cancel = CancelToken::new();
  let rt = runtime()?;

  let mut stale = 0;
  for spec in &project.manifest.binaries {
    let name = display_name(spec);
    let path = project.bin_dir.join(&name);
    if !path.is_file() {
      stale += 1;
      if !shared.quiet {
        println!("  {:<28} {} not installed", name, symbols::ERROR);
      }
      continue;
    }

    let installer = Installer {
      registry: &registry,
      http: &http,
      runner: cache.runner(),
      cache: &cache,
      bin_dir: &project.bin_dir,
      picker: None,
      sink: &NullSink,
    };

    let wanted = match &spec.version {
      Some(version) => version.clone(),
      None => match rt.block_on(installer.latest_version(spec, &cancel)) {
        Ok(latest) => latest,
        Err(e) => {
          if !shared.quiet {
            println!("  {:<28} ? {}", name, e);
          }
          continue;
        }
      },
    };

    let local = local_version(spec, &path);
    let ok = local.as_deref() == Some(wanted.as_str());
    if !ok {
      stale += 1;
    }
    if !shared.quiet {
      println!(
        "  {:<28} {} {} (wanted {})",
        name,
        if ok { symbols::SUCCESS } else { symbols::WARNING },
        local.as_deref().unwrap_or("unknown"),
        wanted
      );
    }
  }

  if stale > 0 {
    bail!("{} binar(ies) out of date", stale);
  }
  Ok(())
}

/// Probe the installed binary for its version, when the preset knows how.
fn local_version(spec: &b_lib::manifest::BinarySpec, path: &std::path::Path) -> Option<String> {
  let BinaryKind::Preset(def) = BinaryKind::classify(spec).ok()? else {
    return None;
  };
  let probe: VersionProbe = def.probe?;

  let output = std::process::Command::new(path).args(probe.args).output().ok()?;
  probe.extract(&CmdOutput {
    status: output.status.code().unwrap_or(-1),
    stdout: output.stdout,
    stderr: output.stderr,
  })
}
