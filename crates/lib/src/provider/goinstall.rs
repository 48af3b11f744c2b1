//! `go://` provider: compile binaries from source with the host Go
//! toolchain.
//!
//! `go install <module>@<version>` runs with `GOBIN` pointed at a private
//! temp directory; the compiled binary is then moved into the destination
//! with mode 0755.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use super::ProviderError;
use crate::cancel::CancelToken;
use crate::process::{Runner, argv, lookup_path};
use crate::refspec::{Ref, Scheme};

#[derive(Debug, Default)]
pub struct GoProvider;

impl GoProvider {
  pub fn matches(&self, r: &Ref) -> bool {
    r.scheme == Some(Scheme::Go)
  }

  /// Compile the module and place the binary into `dest_dir`.
  ///
  /// Returns the installed path.
  pub async fn install<R: Runner>(
    &self,
    runner: &R,
    r: &Ref,
    version: &str,
    dest_dir: &Path,
    cancel: &CancelToken,
  ) -> Result<PathBuf, ProviderError> {
    cancel.check()?;

    if lookup_path("go").is_none() {
      return Err(ProviderError::ToolMissing {
        tool: "go".to_string(),
        context: "the go:// provider",
      });
    }

    let module = &r.host_path;
    let version = if version.is_empty() { "latest" } else { version };
    let install_arg = format!("{}@{}", module, version);

    let gobin = tempfile::tempdir()?;
    let mut envs: BTreeMap<String, String> = std::env::vars().collect();
    envs.insert("GOBIN".to_string(), gobin.path().to_string_lossy().into_owned());

    info!(module = %install_arg, "go install");
    let output = runner.run("go", &argv(&["install", &install_arg]), &envs).await?;
    if !output.success() {
      return Err(ProviderError::Command {
        context: format!("go install {}", install_arg),
        detail: output.stderr_str().trim().to_string(),
      });
    }

    // The compiled binary is named after the last module path segment; if
    // it isn't, accept a single entry in GOBIN.
    let mut name = r.binary_name();
    let mut compiled = gobin.path().join(&name);
    if !compiled.is_file() {
      let entries: Vec<_> = std::fs::read_dir(gobin.path())?.collect::<Result<_, _>>()?;
      match entries.as_slice() {
        [only] => {
          compiled = only.path();
          name = only.file_name().to_string_lossy().into_owned();
        }
        _ => {
          return Err(ProviderError::Command {
            context: format!("go install {}", install_arg),
            detail: format!("compiled binary {:?} not found in GOBIN", name),
          });
        }
      }
    }

    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(&name);
    // Read and rewrite: a rename would fail across filesystems.
    let data = std::fs::read(&compiled)?;
    write_executable(&dest, &data)?;

    Ok(dest)
  }
}

/// Write `data` to `path` with mode 0755.
pub(crate) fn write_executable(path: &Path, data: &[u8]) -> std::io::Result<()> {
  std::fs::write(path, data)?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_go_scheme_only() {
    let go = GoProvider;
    assert!(go.matches(&Ref::parse("go://github.com/jrhouston/tfk8s")));
    assert!(!go.matches(&Ref::parse("github.com/jrhouston/tfk8s")));
    assert!(!go.matches(&Ref::parse("docker://a/b")));
  }

  #[cfg(unix)]
  #[test]
  fn write_executable_sets_mode() {
    use std::os::unix::fs::PermissionsExt;
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("tool");
    write_executable(&path, b"#!/bin/sh\n").unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
  }
}
