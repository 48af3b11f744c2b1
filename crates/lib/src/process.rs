//! Process-runner port.
//!
//! All external tool invocations (`git`, `go`, container runtimes) go
//! through [`Runner`] so the engines can be tested with scripted outputs
//! instead of real subprocesses.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use tracing::debug;

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, Default)]
pub struct CmdOutput {
  /// Exit code; -1 when the process was killed by a signal.
  pub status: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl CmdOutput {
  pub fn success(&self) -> bool {
    self.status == 0
  }

  pub fn stdout_str(&self) -> String {
    String::from_utf8_lossy(&self.stdout).into_owned()
  }

  pub fn stderr_str(&self) -> String {
    String::from_utf8_lossy(&self.stderr).into_owned()
  }
}

/// Executes a named program with arguments, capturing output.
///
/// Implementations must not use a shell; arguments are passed verbatim.
pub trait Runner: Send + Sync {
  fn run(
    &self,
    program: &str,
    args: &[String],
    envs: &BTreeMap<String, String>,
  ) -> impl std::future::Future<Output = io::Result<CmdOutput>> + Send;
}

/// Runner backed by real subprocesses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
  async fn run(&self, program: &str, args: &[String], envs: &BTreeMap<String, String>) -> io::Result<CmdOutput> {
    debug!(program = %program, args = ?args, "spawning process");

    let mut command = tokio::process::Command::new(program);
    command.args(args);
    for (key, value) in envs {
      command.env(key, value);
    }

    let output = command.output().await?;

    Ok(CmdOutput {
      status: output.status.code().unwrap_or(-1),
      stdout: output.stdout,
      stderr: output.stderr,
    })
  }
}

/// Search `$PATH` for an executable, returning its full path.
pub fn lookup_path(program: &str) -> Option<PathBuf> {
  let path = std::env::var_os("PATH")?;
  for dir in std::env::split_paths(&path) {
    let candidate = dir.join(program);
    if candidate.is_file() {
      return Some(candidate);
    }
    #[cfg(windows)]
    {
      let exe = dir.join(format!("{}.exe", program));
      if exe.is_file() {
        return Some(exe);
      }
    }
  }
  None
}

/// Convenience: run with no extra environment.
pub async fn run_plain<R: Runner>(runner: &R, program: &str, args: &[String]) -> io::Result<CmdOutput> {
  runner.run(program, args, &BTreeMap::new()).await
}

/// Build an argument vector from string literals.
pub fn argv(args: &[&str]) -> Vec<String> {
  args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cmd_output_success() {
    let ok = CmdOutput {
      status: 0,
      stdout: b"out".to_vec(),
      stderr: Vec::new(),
    };
    assert!(ok.success());
    assert_eq!(ok.stdout_str(), "out");

    let fail = CmdOutput {
      status: 1,
      ..Default::default()
    };
    assert!(!fail.success());
  }

  #[test]
  fn argv_builds_owned_vector() {
    assert_eq!(argv(&["-C", "dir"]), vec!["-C".to_string(), "dir".to_string()]);
  }

  #[cfg(unix)]
  #[test]
  fn lookup_path_finds_sh() {
    // /bin/sh exists on any Unix we support.
    assert!(lookup_path("sh").is_some());
    assert!(lookup_path("definitely-not-a-real-binary-name").is_none());
  }
}
