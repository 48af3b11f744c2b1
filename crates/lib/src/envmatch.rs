//! Glob matching against a repository tree.
//!
//! Takes the flat file list of a repo at one commit (from `git ls-tree`),
//! a mapping of glob pattern → config, and a global ignore set. Produces a
//! deterministic, deduplicated list of `(source, dest, glob)` triples:
//!
//! - Globs are visited in lexicographic key order; a path is claimed by the
//!   first glob that accepts it.
//! - A path is rejected when any global or per-glob ignore pattern matches
//!   either the full path or the basename.
//! - Output is sorted by destination path.
//!
//! `**` crosses directory separators; `*`, `?`, and `[set]` do not.

use std::collections::{BTreeMap, HashSet};

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

/// Per-glob configuration from the manifest `files` map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobConfig {
  /// Destination prefix replacing the glob prefix. `None` preserves the
  /// upstream layout.
  pub dest: Option<String>,
  /// Ignore patterns additive to the env-global set.
  pub ignore: Vec<String>,
}

/// A single matched file with its computed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
  /// Path in the upstream repository.
  pub source: String,
  /// Workspace-relative destination path.
  pub dest: String,
  /// The glob key that claimed this file.
  pub glob: String,
}

#[derive(Debug, Error)]
pub enum MatchError {
  #[error("invalid glob pattern {pattern:?}: {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("path traversal rejected: {dest:?} (from {source_path:?})")]
  Traversal { dest: String, source_path: String },
}

fn compile(pattern: &str) -> Result<GlobMatcher, MatchError> {
  GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map(|g| g.compile_matcher())
    .map_err(|source| MatchError::Pattern {
      pattern: pattern.to_string(),
      source,
    })
}

/// The longest leading substring of a glob containing no wildcard, cut at
/// the last `/`, or the whole pattern when it is a literal path.
pub fn glob_prefix(pattern: &str) -> &str {
  match pattern.find(['*', '?', '[']) {
    Some(i) => match pattern[..i].rfind('/') {
      Some(j) => &pattern[..j + 1],
      None => "",
    },
    None => pattern,
  }
}

/// Destination path for a matched source under a glob.
fn compute_dest(source: &str, prefix: &str, dest: Option<&str>) -> String {
  let Some(dest) = dest else {
    return source.to_string();
  };
  let dest = dest.trim_end_matches('/');

  let mut relative = source.strip_prefix(prefix).unwrap_or(source);
  if relative.is_empty() {
    // Literal glob: the prefix is the whole source; keep the basename.
    relative = source.rsplit('/').next().unwrap_or(source);
  }
  format!("{}/{}", dest, relative)
}

fn has_dotdot_segment(path: &str) -> bool {
  path.split('/').any(|seg| seg == "..")
}

struct IgnoreSet {
  matchers: Vec<GlobMatcher>,
}

impl IgnoreSet {
  fn compile(patterns: impl Iterator<Item = impl AsRef<str>>) -> Result<Self, MatchError> {
    let mut matchers = Vec::new();
    for pattern in patterns {
      matchers.push(compile(pattern.as_ref())?);
    }
    Ok(IgnoreSet { matchers })
  }

  /// Ignore patterns match the full path or just the basename.
  fn is_ignored(&self, path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    self
      .matchers
      .iter()
      .any(|m| m.is_match(path) || m.is_match(basename))
  }
}

/// Match `tree` against `globs`, honoring ignore patterns.
///
/// The result lists each source path at most once and is sorted by `dest`;
/// it is insensitive to the order of `tree`.
pub fn match_globs(
  tree: &[String],
  globs: &BTreeMap<String, GlobConfig>,
  global_ignore: &[String],
) -> Result<Vec<MatchedFile>, MatchError> {
  let global = IgnoreSet::compile(global_ignore.iter())?;

  let mut seen: HashSet<&str> = HashSet::new();
  let mut result = Vec::new();

  for (pattern, cfg) in globs {
    let matcher = compile(pattern)?;
    let local = IgnoreSet::compile(cfg.ignore.iter())?;
    let prefix = glob_prefix(pattern);

    for path in tree {
      if seen.contains(path.as_str()) || !matcher.is_match(path) {
        continue;
      }
      if global.is_ignored(path) || local.is_ignored(path) {
        continue;
      }

      let dest = compute_dest(path, prefix, cfg.dest.as_deref());
      if has_dotdot_segment(&dest) {
        return Err(MatchError::Traversal {
          dest,
          source_path: path.clone(),
        });
      }

      seen.insert(path);
      result.push(MatchedFile {
        source: path.clone(),
        dest,
        glob: pattern.clone(),
      });
    }
  }

  result.sort_by(|a, b| a.dest.cmp(&b.dest));
  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|s| s.to_string()).collect()
  }

  fn globs(entries: &[(&str, GlobConfig)]) -> BTreeMap<String, GlobConfig> {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
  }

  fn dest_glob(dest: &str) -> GlobConfig {
    GlobConfig {
      dest: Some(dest.to_string()),
      ignore: Vec::new(),
    }
  }

  #[test]
  fn prefix_of_recursive_glob() {
    assert_eq!(glob_prefix("manifests/hetzner/**"), "manifests/hetzner/");
    assert_eq!(glob_prefix("**/*.yaml"), "");
    assert_eq!(glob_prefix("configs/ingress.yaml"), "configs/ingress.yaml");
    assert_eq!(glob_prefix("a/b*/c"), "a/");
  }

  #[test]
  fn preserve_layout_without_dest() {
    let matched = match_globs(
      &tree(&["manifests/base/a.yaml", "manifests/base/sub/b.yaml", "README.md"]),
      &globs(&[("manifests/base/**", GlobConfig::default())]),
      &[],
    )
    .unwrap();

    assert_eq!(matched.len(), 2);
    assert_eq!(matched[0].source, "manifests/base/a.yaml");
    assert_eq!(matched[0].dest, "manifests/base/a.yaml");
    assert_eq!(matched[1].dest, "manifests/base/sub/b.yaml");
  }

  #[test]
  fn dest_strips_glob_prefix() {
    let matched = match_globs(
      &tree(&["manifests/hetzner/deploy.yaml", "manifests/hetzner/sub/x.yaml"]),
      &globs(&[("manifests/hetzner/**", dest_glob("hetzner"))]),
      &[],
    )
    .unwrap();

    assert_eq!(matched[0].dest, "hetzner/deploy.yaml");
    assert_eq!(matched[1].dest, "hetzner/sub/x.yaml");
  }

  #[test]
  fn literal_glob_uses_basename() {
    let matched = match_globs(
      &tree(&["configs/ingress.yaml"]),
      &globs(&[("configs/ingress.yaml", dest_glob("config/"))]),
      &[],
    )
    .unwrap();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].dest, "config/ingress.yaml");
  }

  #[test]
  fn single_star_does_not_cross_separator() {
    let matched = match_globs(
      &tree(&["a/x.yaml", "a/b/y.yaml"]),
      &globs(&[("a/*.yaml", GlobConfig::default())]),
      &[],
    )
    .unwrap();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].source, "a/x.yaml");
  }

  #[test]
  fn first_glob_in_key_order_claims_path() {
    let matched = match_globs(
      &tree(&["dir/file.yaml"]),
      &globs(&[
        ("dir/**", dest_glob("first")),
        ("dir/file.yaml", dest_glob("second")),
      ]),
      &[],
    )
    .unwrap();

    // "dir/**" sorts before "dir/file.yaml" and wins; no duplicate output.
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].glob, "dir/**");
    assert_eq!(matched[0].dest, "first/file.yaml");
  }

  #[test]
  fn global_ignore_matches_basename() {
    let matched = match_globs(
      &tree(&["docs/README.md", "docs/guide.yaml"]),
      &globs(&[("docs/**", GlobConfig::default())]),
      &["*.md".to_string()],
    )
    .unwrap();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].source, "docs/guide.yaml");
  }

  #[test]
  fn per_glob_ignore_is_additive() {
    let matched = match_globs(
      &tree(&["cfg/a.yaml", "cfg/a.bak"]),
      &globs(&[(
        "cfg/**",
        GlobConfig {
          dest: None,
          ignore: vec!["*.bak".to_string()],
        },
      )]),
      &[],
    )
    .unwrap();

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].source, "cfg/a.yaml");
  }

  #[test]
  fn output_sorted_by_dest_and_tree_order_insensitive() {
    let forward = tree(&["z/1.yaml", "a/2.yaml", "m/3.yaml"]);
    let mut reversed = forward.clone();
    reversed.reverse();

    let g = globs(&[("**/*.yaml", GlobConfig::default())]);
    let a = match_globs(&forward, &g, &[]).unwrap();
    let b = match_globs(&reversed, &g, &[]).unwrap();

    assert_eq!(a, b);
    assert_eq!(a[0].dest, "a/2.yaml");
    assert_eq!(a[2].dest, "z/1.yaml");
  }

  #[test]
  fn traversal_in_dest_rejected() {
    let err = match_globs(
      &tree(&["cfg/a.yaml"]),
      &globs(&[("cfg/**", dest_glob(".."))]),
      &[],
    )
    .unwrap_err();

    assert!(matches!(err, MatchError::Traversal { .. }));
  }

  #[test]
  fn invalid_pattern_is_error() {
    let err = match_globs(
      &tree(&["a.yaml"]),
      &globs(&[("[unclosed", GlobConfig::default())]),
      &[],
    )
    .unwrap_err();

    assert!(matches!(err, MatchError::Pattern { .. }));
  }

  #[test]
  fn trailing_slash_in_dest_discarded() {
    assert_eq!(
      compute_dest("a/b/c.yaml", "a/", Some("out/")),
      "out/b/c.yaml".to_string()
    );
  }
}
