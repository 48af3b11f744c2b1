//! `b verify`: check every managed artifact against b.lock.

use anyhow::{Result, bail};
use b_lib::lock::Lock;
use b_lib::verify::{VerifyReason, verify};

use super::Shared;
use crate::output::{self, symbols};

pub fn run(shared: &Shared) -> Result<()> {
  let project = shared.load_project_or_default()?;
  let lock = Lock::read(&project.root)?;

  if lock.binaries.is_empty() && lock.envs.is_empty() {
    if !shared.quiet {
      println!("No entries in b.lock — nothing to verify.");
    }
    return Ok(());
  }

  let report = verify(&lock, &project.bin_dir, &project.root);

  for failure in &report.failures {
    let annotation = match &failure.reason {
      VerifyReason::Missing => "missing".to_string(),
      VerifyReason::HashMismatch { .. } => "sha256 mismatch (local changes)".to_string(),
      VerifyReason::Unreadable { error } => error.clone(),
    };
    println!("  {:<40} {} {}", failure.target, symbols::ERROR, annotation);
  }

  if !report.is_clean() {
    bail!("{} artifact(s) differ from lock", report.failures.len());
  }

  if !shared.quiet {
    output::print_success(&format!("All {} artifact(s) verified", report.checked));
  }
  Ok(())
}
