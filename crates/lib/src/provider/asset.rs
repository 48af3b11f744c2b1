//! Release-asset scoring and selection.
//!
//! Given a release's assets and the host OS/architecture, filter out
//! non-binaries, require an OS and an architecture alias to appear as a
//! word in the filename, then rank what's left. Word matches are bounded
//! by non-alphanumeric characters so `arm` inside `charm` does not count.

use globset::GlobBuilder;

use super::{Asset, ProviderError};

/// OS aliases keyed by the go-style OS name.
fn os_aliases(os: &str) -> &'static [&'static str] {
  match os {
    "linux" => &["linux", "Linux", "linux-gnu"],
    "darwin" => &["darwin", "Darwin", "macOS", "macos", "osx", "OSX", "apple"],
    "windows" => &["windows", "Windows", "win", "win64", "win32"],
    _ => &[],
  }
}

/// Architecture aliases keyed by the go-style arch name.
fn arch_aliases(arch: &str) -> &'static [&'static str] {
  match arch {
    "amd64" => &["amd64", "x86_64", "x64", "64bit", "64-bit"],
    "arm64" => &["arm64", "aarch64", "armv8"],
    "386" => &["386", "i386", "i686", "x86", "32bit", "32-bit"],
    "arm" => &["armv7", "armv6", "arm"],
    _ => &[],
  }
}

/// Filename suffixes that are never the binary itself.
const IGNORE_EXTENSIONS: &[&str] = &[
  ".sha256",
  ".sha256sum",
  ".sha512",
  ".sha512sum",
  ".sig",
  ".asc",
  ".pem",
  ".txt",
  ".md",
  ".json",
  ".sbom",
  ".spdx",
  ".deb",
  ".rpm",
  ".msi",
  ".pkg",
  ".apk",
];

/// Archive suffixes the extractor understands.
const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".zip"];

/// Host OS in go naming (`linux`, `darwin`, `windows`).
pub fn host_os() -> &'static str {
  if cfg!(target_os = "macos") {
    "darwin"
  } else if cfg!(target_os = "windows") {
    "windows"
  } else {
    "linux"
  }
}

/// Host architecture in go naming (`amd64`, `arm64`, …).
pub fn host_arch() -> &'static str {
  if cfg!(target_arch = "x86_64") {
    "amd64"
  } else if cfg!(target_arch = "aarch64") {
    "arm64"
  } else if cfg!(target_arch = "x86") {
    "386"
  } else if cfg!(target_arch = "arm") {
    "arm"
  } else {
    "amd64"
  }
}

/// An asset with its selection score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scored {
  pub asset: Asset,
  pub score: i32,
}

/// Breaks score ties interactively. Returns the index of the chosen
/// candidate, or `None` to decline.
pub trait AssetPicker: Send + Sync {
  fn pick(&self, candidates: &[Scored]) -> Option<usize>;
}

fn is_alphanumeric(c: u8) -> bool {
  c.is_ascii_alphanumeric()
}

/// True when `word` occurs in `name` bounded by non-alphanumerics.
fn contains_word(name: &str, word: &str) -> bool {
  if word.is_empty() {
    return false;
  }
  let name_bytes = name.as_bytes();
  let mut offset = 0;
  while let Some(idx) = name[offset..].find(word) {
    let abs = offset + idx;
    let end = abs + word.len();
    let left_ok = abs == 0 || !is_alphanumeric(name_bytes[abs - 1]);
    let right_ok = end >= name.len() || !is_alphanumeric(name_bytes[end]);
    if left_ok && right_ok {
      return true;
    }
    offset = abs + 1;
  }
  false
}

fn has_suffix_in(lower: &str, suffixes: &[&str]) -> bool {
  suffixes.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_archive_name(name: &str) -> bool {
  has_suffix_in(&name.to_lowercase(), ARCHIVE_EXTENSIONS)
}

/// Filter and score release assets for the given platform.
///
/// `filter` is an optional user-supplied glob over the raw filename; an
/// invalid glob is an error, not an empty result. Output is sorted by
/// descending score, stable within equal scores.
pub fn score_assets(
  assets: &[Asset],
  repo_name: &str,
  os: &str,
  arch: &str,
  filter: Option<&str>,
) -> Result<Vec<Scored>, ProviderError> {
  let filter_matcher = match filter {
    Some(pattern) => Some(
      GlobBuilder::new(pattern)
        .build()
        .map_err(|source| ProviderError::InvalidFilter {
          pattern: pattern.to_string(),
          source,
        })?
        .compile_matcher(),
    ),
    None => None,
  };

  let os_names = os_aliases(os);
  let arch_names = arch_aliases(arch);
  let repo_lower = repo_name.to_lowercase();

  let mut scored = Vec::new();
  for asset in assets {
    let lower = asset.name.to_lowercase();

    if has_suffix_in(&lower, IGNORE_EXTENSIONS) {
      continue;
    }

    let os_match = os_names
      .iter()
      .chain(std::iter::once(&os))
      .any(|alias| contains_word(&lower, &alias.to_lowercase()));
    if !os_match {
      continue;
    }

    let arch_match = arch_names
      .iter()
      .chain(std::iter::once(&arch))
      .any(|alias| contains_word(&lower, &alias.to_lowercase()));
    if !arch_match {
      continue;
    }

    if let Some(matcher) = &filter_matcher
      && !matcher.is_match(&asset.name)
    {
      continue;
    }

    let mut score = 10;
    if is_archive_name(&lower) {
      score += 5;
    }
    if !repo_lower.is_empty() && contains_word(&lower, &repo_lower) {
      score += 3;
    }
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
      score += 1;
    }

    scored.push(Scored {
      asset: asset.clone(),
      score,
    });
  }

  scored.sort_by(|a, b| b.score.cmp(&a.score));
  Ok(scored)
}

/// Select the best asset for the platform.
///
/// A unique highest score wins outright. A tie goes to the picker; with no
/// picker installed the tie is an error naming the candidates, and a picker
/// that declines falls back to the first candidate in stable order.
pub fn select_asset(
  assets: &[Asset],
  repo_name: &str,
  os: &str,
  arch: &str,
  filter: Option<&str>,
  picker: Option<&dyn AssetPicker>,
) -> Result<Asset, ProviderError> {
  let scored = score_assets(assets, repo_name, os, arch, filter)?;

  if scored.is_empty() {
    return Err(ProviderError::NoAsset {
      os: os.to_string(),
      arch: arch.to_string(),
      total: assets.len(),
      filter: filter.map(str::to_string),
    });
  }

  let top = scored[0].score;
  let tied: Vec<&Scored> = scored.iter().take_while(|s| s.score == top).collect();
  if tied.len() == 1 {
    return Ok(tied[0].asset.clone());
  }

  match picker {
    Some(picker) => {
      let candidates: Vec<Scored> = tied.iter().map(|s| (*s).clone()).collect();
      match picker.pick(&candidates) {
        Some(i) if i < candidates.len() => Ok(candidates[i].asset.clone()),
        _ => Ok(candidates[0].asset.clone()),
      }
    }
    None => Err(ProviderError::AmbiguousAsset {
      candidates: tied.iter().map(|s| s.asset.name.clone()).collect(),
    }),
  }
}
