//! Subcommand implementations and shared project context.

pub mod cache;
pub mod init;
pub mod install;
pub mod list;
pub mod update;
pub mod verify;
pub mod version;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use b_lib::manifest::Manifest;
use b_lib::paths;

/// Global flags shared by every subcommand.
pub struct Shared {
  pub config: Option<String>,
  pub quiet: bool,
}

/// A located project: manifest plus the directories derived from it.
pub struct Project {
  pub manifest: Manifest,
  pub manifest_path: PathBuf,
  /// Directory holding b.lock; dest paths resolve relative to it.
  pub root: PathBuf,
  pub bin_dir: PathBuf,
}

impl Shared {
  /// Locate and parse the project manifest.
  pub fn load_project(&self) -> Result<Project> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;

    let explicit = self.config.as_ref().map(PathBuf::from);
    let discovered = if explicit.is_none() { paths::find_manifest(&cwd) } else { None };

    let manifest_path = explicit
      .clone()
      .or_else(|| discovered.clone())
      .ok_or_else(|| anyhow!("no b.yaml configuration found (searched {} and parents)", cwd.display()))?;

    let manifest = Manifest::load(&manifest_path)
      .with_context(|| format!("loading manifest {}", manifest_path.display()))?;

    let root = paths::lock_dir(explicit.as_deref(), discovered.as_deref(), &cwd);
    let bin_dir = paths::bin_dir(explicit.as_deref(), discovered.as_deref(), &cwd);

    Ok(Project {
      manifest,
      manifest_path,
      root,
      bin_dir,
    })
  }

  /// Like [`load_project`], but a missing manifest yields an empty project
  /// rooted in the working directory. A manifest that exists but fails to
  /// parse is still an error.
  pub fn load_project_or_default(&self) -> Result<Project> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    if self.config.is_some() || paths::find_manifest(&cwd).is_some() {
      return self.load_project();
    }
    Ok(Project {
      manifest: Manifest::default(),
      manifest_path: cwd.join("b.yaml"),
      root: paths::lock_dir(None, None, &cwd),
      bin_dir: paths::bin_dir(None, None, &cwd),
    })
  }
}

/// Build the async runtime used by network-bound commands.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("failed to create async runtime")
}

/// Split a CLI argument like `jq@1.7.1` into name and optional version.
pub fn parse_name_arg(arg: &str) -> (&str, Option<&str>) {
  match arg.rsplit_once('@') {
    Some((name, version)) if !name.is_empty() => (name, Some(version)),
    _ => (arg, None),
  }
}

/// The tool version recorded in lock writes.
pub fn tool_version() -> &'static str {
  env!("CARGO_PKG_VERSION")
}

/// The cache root, honoring `$XDG_CACHE_HOME`.
pub fn cache_root() -> PathBuf {
  paths::default_cache_root()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_arg_splits_version() {
    assert_eq!(parse_name_arg("jq@1.7.1"), ("jq", Some("1.7.1")));
    assert_eq!(parse_name_arg("jq"), ("jq", None));
    assert_eq!(
      parse_name_arg("github.com/org/tool@v2"),
      ("github.com/org/tool", Some("v2"))
    );
  }
}
