//! Installation-root and manifest discovery.
//!
//! Precedence for the binary installation directory:
//! explicit config path > discovered config > `$PATH_BIN` > `$PATH_BASE` >
//! `<git-root>/.bin` > `<cwd>/.bin`.

use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, DEFAULT_BIN_DIR, MANIFEST_FILENAME};

/// The user's home directory, from `$HOME` (or `%USERPROFILE%`).
pub fn home_dir() -> Option<PathBuf> {
  #[cfg(windows)]
  let var = "USERPROFILE";
  #[cfg(not(windows))]
  let var = "HOME";
  std::env::var_os(var).map(PathBuf::from)
}

/// Default git cache root: `$XDG_CACHE_HOME/b/repos` (or `~/.cache/b/repos`).
pub fn default_cache_root() -> PathBuf {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(|| PathBuf::from(".cache"));
  cache_home.join(APP_NAME).join("repos")
}

/// Find the project manifest by walking up from `start`, checking
/// `.bin/b.yaml` then `b.yaml` in each directory.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
  let mut dir = start.to_path_buf();
  loop {
    let nested = dir.join(DEFAULT_BIN_DIR).join(MANIFEST_FILENAME);
    if nested.is_file() {
      return Some(nested);
    }
    let plain = dir.join(MANIFEST_FILENAME);
    if plain.is_file() {
      return Some(plain);
    }
    if !dir.pop() {
      return None;
    }
  }
}

/// Find the enclosing git repository root (the directory containing `.git`).
pub fn git_root(start: &Path) -> Option<PathBuf> {
  let mut dir = start.to_path_buf();
  loop {
    if dir.join(".git").exists() {
      return Some(dir);
    }
    if !dir.pop() {
      return None;
    }
  }
}

/// Resolve the binary installation directory.
///
/// `config_path` is the explicit `--config` value; `discovered` is the
/// manifest path found by [`find_manifest`]. Either implies installing next
/// to the manifest.
pub fn bin_dir(config_path: Option<&Path>, discovered: Option<&Path>, cwd: &Path) -> PathBuf {
  if let Some(config) = config_path.or(discovered)
    && let Some(parent) = config.parent()
  {
    // b.yaml inside .bin/ installs into .bin; a bare b.yaml gets a .bin
    // sibling.
    if parent.file_name().is_some_and(|n| n == DEFAULT_BIN_DIR) {
      return parent.to_path_buf();
    }
    return parent.join(DEFAULT_BIN_DIR);
  }
  if let Some(path) = std::env::var_os("PATH_BIN").filter(|v| !v.is_empty()) {
    return PathBuf::from(path);
  }
  if let Some(path) = std::env::var_os("PATH_BASE").filter(|v| !v.is_empty()) {
    return PathBuf::from(path);
  }
  if let Some(root) = git_root(cwd) {
    return root.join(DEFAULT_BIN_DIR);
  }
  cwd.join(DEFAULT_BIN_DIR)
}

/// The directory holding the lockfile: next to the manifest when one is
/// known, otherwise the binary directory.
pub fn lock_dir(config_path: Option<&Path>, discovered: Option<&Path>, cwd: &Path) -> PathBuf {
  if let Some(config) = config_path.or(discovered)
    && let Some(parent) = config.parent()
  {
    return parent.to_path_buf();
  }
  bin_dir(config_path, discovered, cwd)
}
