//! `b install` / `b update`: the install/update pipeline.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use b_lib::cancel::CancelToken;
use b_lib::gitcache::GitCache;
use b_lib::lock::Lock;
use b_lib::manifest::{BinarySpec, EnvSpec, Strategy};
use b_lib::orchestrate::{BinaryStatus, EnvReport, Orchestrator, dest_collisions};
use b_lib::process::SystemRunner;

use super::{Shared, cache_root, parse_name_arg, runtime, tool_version};
use crate::output::{self, short_commit, symbols};
use crate::progress::IndicatifSink;
use crate::prompts::{AssetPrompt, ConflictPrompt, stdout_is_tty};

pub struct PipelineOptions {
  pub force: bool,
  pub strategy: Option<Strategy>,
}

pub fn run(shared: &Shared, names: Vec<String>, force: bool) -> Result<()> {
  run_pipeline(shared, names, PipelineOptions { force, strategy: None })
}

/// Select the binaries and envs named on the command line (or everything).
fn select(
  manifest: &b_lib::manifest::Manifest,
  names: &[String],
) -> Result<(Vec<BinarySpec>, Vec<EnvSpec>)> {
  if names.is_empty() {
    return Ok((manifest.binaries.clone(), manifest.envs.clone()));
  }

  let mut binaries = Vec::new();
  let mut envs = Vec::new();
  for arg in names {
    let (name, version) = parse_name_arg(arg);

    if let Some(env) = manifest.find_env(name) {
      envs.push(env.clone());
      continue;
    }
    if let Some(binary) = manifest.find_binary(name) {
      let mut spec = binary.clone();
      if let Some(version) = version {
        spec.version = Some(version.to_string());
      }
      binaries.push(spec);
      continue;
    }
    return Err(anyhow!("unknown binary or env: {}", name));
  }
  Ok((binaries, envs))
}

pub fn run_pipeline(shared: &Shared, names: Vec<String>, opts: PipelineOptions) -> Result<()> {
  let project = shared.load_project()?;
  let (binaries, mut envs) = select(&project.manifest, &names)?;

  if binaries.is_empty() && envs.is_empty() {
    if !shared.quiet {
      println!("No binaries or envs to install");
    }
    return Ok(());
  }

  if let Some(strategy) = opts.strategy {
    for env in &mut envs {
      env.strategy = strategy;
    }
  }

  let mut lock = Lock::read(&project.root)?;

  let cache = Arc::new(GitCache::new(cache_root(), SystemRunner));
  let mut orchestrator = Orchestrator::new(cache, project.bin_dir.clone(), project.root.clone());
  orchestrator.sink = Arc::new(IndicatifSink::new(shared.quiet));

  let interactive = stdout_is_tty();
  if interactive {
    orchestrator.picker = Some(Arc::new(AssetPrompt));
  }
  // Prompt on drift unless the user explicitly chose a non-default
  // strategy for this run.
  if interactive && matches!(opts.strategy, None | Some(Strategy::Replace)) && !envs.is_empty() {
    let ref_bases = envs.iter().map(|e| e.ref_base.clone()).collect();
    orchestrator.resolver = Some(Arc::new(ConflictPrompt::new(
      ref_bases,
      project.root.clone(),
      cache_root(),
    )));
  }

  let cancel = CancelToken::new();
  let rt = runtime()?;

  let (bin_reports, env_reports) = rt.block_on(async {
    let watcher = {
      let cancel = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          cancel.cancel();
        }
      })
    };

    let bin_reports = orchestrator.install_binaries(&binaries, opts.force, &mut lock, &cancel).await;
    let env_reports = orchestrator.sync_envs(&envs, &mut lock, &cancel).await;

    watcher.abort();
    (bin_reports, env_reports)
  });

  let mut failures = 0;
  failures += report_binaries(shared, &bin_reports);
  failures += report_envs(shared, &env_reports);

  let changed = bin_reports.iter().any(|r| matches!(r, BinaryStatus::Installed(_)))
    || env_reports
      .iter()
      .any(|r| matches!(&r.result, Ok(result) if !result.skipped));
  if changed {
    lock.write(&project.root, tool_version())?;
  }

  for collision in dest_collisions(&lock) {
    output::print_warning(&format!(
      "{} is written by both {} ({}) and {} ({})",
      collision.dest, collision.first.0, collision.first.1, collision.second.0, collision.second.1
    ));
    eprintln!("    Hint: use 'dest' or 'ignore' in b.yaml to resolve");
  }

  if cancel.is_cancelled() {
    bail!("cancelled");
  }
  if failures > 0 {
    bail!("{} artifact(s) failed", failures);
  }
  Ok(())
}

fn report_binaries(shared: &Shared, reports: &[BinaryStatus]) -> usize {
  let mut failures = 0;
  for report in reports {
    match report {
      BinaryStatus::Installed(outcome) => {
        if !shared.quiet {
          output::print_success(&format!("{} {} installed", outcome.name, outcome.version));
        }
      }
      BinaryStatus::UpToDate { name, version } => {
        if !shared.quiet {
          println!("  {:<40} {} ({})", name, "up to date", version);
        }
      }
      BinaryStatus::Failed { name, error } => {
        failures += 1;
        output::print_error(&format!("{}: {}", name, error));
      }
    }
  }
  failures
}

fn report_envs(shared: &Shared, reports: &[EnvReport]) -> usize {
  let mut failures = 0;
  for report in reports {
    match &report.result {
      Ok(result) if result.skipped => {
        if !shared.quiet {
          println!("  {:<40} {}", report.key, result.message);
        }
      }
      Ok(result) => {
        if !shared.quiet {
          println!(
            "  {:<40} {} {} {} ({})",
            report.key,
            short_commit(&result.previous_commit),
            symbols::ARROW,
            short_commit(&result.commit),
            result.message
          );
          for file in &result.files {
            let status = file.status.as_deref().unwrap_or("replaced");
            println!("{}", output::file_status_line(&file.dest, status));
          }
        }
        if result.conflicts > 0 {
          output::print_warning(&format!(
            "{} file(s) have merge conflicts — resolve manually",
            result.conflicts
          ));
        }
      }
      Err(error) => {
        failures += 1;
        output::print_error(&format!("{}: {}", report.key, error));
      }
    }
  }
  failures
}
