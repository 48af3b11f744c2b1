//! `b init`: write a starter b.yaml.

use std::path::Path;

use anyhow::{Result, bail};
use b_lib::consts::{DEFAULT_BIN_DIR, MANIFEST_FILENAME};

use super::Shared;
use crate::output;

const TEMPLATE: &str = "\
# Managed binaries and env files. See `b --help`.
binaries:
  jq:
  # github.com/derailed/k9s:
  #   version: v0.32.5

# envs:
#   github.com/org/infra:
#     version: v2.0
#     files:
#       manifests/base/**:
";

const GITIGNORE: &str = "*\n!b.yaml\n!b.lock\n!.gitignore\n";

pub fn run(shared: &Shared) -> Result<()> {
  let cwd = std::env::current_dir()?;
  let bin_dir = cwd.join(DEFAULT_BIN_DIR);
  let manifest = bin_dir.join(MANIFEST_FILENAME);

  if manifest.exists() {
    bail!("{} already exists", manifest.display());
  }

  std::fs::create_dir_all(&bin_dir)?;
  std::fs::write(&manifest, TEMPLATE)?;
  write_if_absent(&bin_dir.join(".gitignore"), GITIGNORE)?;

  if !shared.quiet {
    output::print_success(&format!("Wrote {}", manifest.display()));
    println!("  Edit it, then run: b install");
  }
  Ok(())
}

fn write_if_absent(path: &Path, content: &str) -> std::io::Result<()> {
  if path.exists() {
    return Ok(());
  }
  std::fs::write(path, content)
}
