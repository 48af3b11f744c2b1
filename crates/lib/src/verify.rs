//! Checksum audit: re-hash every lock entry against its on-disk file.
//!
//! Verification continues past mismatches and reports them all; the
//! command layer exits non-zero when any are found. The lock itself is
//! never modified.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::lock::{Lock, sha256_file};

/// Why one artifact failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReason {
  Missing,
  HashMismatch { expected: String, actual: String },
  Unreadable { error: String },
}

/// One failed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFailure {
  /// Lock entry the file belongs to (binary name, or `ref#label`).
  pub owner: String,
  /// Workspace- or bin-relative name shown to the user.
  pub target: String,
  pub path: PathBuf,
  pub reason: VerifyReason,
}

/// Result of a verify run.
#[derive(Debug, Default)]
pub struct VerifyReport {
  pub checked: usize,
  pub failures: Vec<VerifyFailure>,
}

impl VerifyReport {
  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}

fn check(report: &mut VerifyReport, owner: &str, target: &str, path: &Path, expected: &str) {
  report.checked += 1;

  if !path.is_file() {
    report.failures.push(VerifyFailure {
      owner: owner.to_string(),
      target: target.to_string(),
      path: path.to_path_buf(),
      reason: VerifyReason::Missing,
    });
    return;
  }

  match sha256_file(path) {
    Ok(actual) if actual == expected => {
      debug!(target = %target, "verified");
    }
    Ok(actual) => report.failures.push(VerifyFailure {
      owner: owner.to_string(),
      target: target.to_string(),
      path: path.to_path_buf(),
      reason: VerifyReason::HashMismatch {
        expected: expected.to_string(),
        actual,
      },
    }),
    Err(e) => report.failures.push(VerifyFailure {
      owner: owner.to_string(),
      target: target.to_string(),
      path: path.to_path_buf(),
      reason: VerifyReason::Unreadable { error: e.to_string() },
    }),
  }
}

/// Verify every lock entry against the filesystem.
///
/// Binaries resolve against `bin_dir`, env files against `workspace`.
pub fn verify(lock: &Lock, bin_dir: &Path, workspace: &Path) -> VerifyReport {
  let mut report = VerifyReport::default();

  for entry in &lock.binaries {
    let path = bin_dir.join(&entry.name);
    check(&mut report, &entry.name, &entry.name, &path, &entry.sha256);
  }

  for env in &lock.envs {
    let owner = if env.label.is_empty() {
      env.ref_.clone()
    } else {
      format!("{}#{}", env.ref_, env.label)
    };
    for file in &env.files {
      let path = if Path::new(&file.dest).is_absolute() {
        PathBuf::from(&file.dest)
      } else {
        workspace.join(&file.dest)
      };
      check(&mut report, &owner, &file.dest, &path, &file.sha256);
    }
  }

  report
}
