//! Project manifest (`b.yaml`) parsing.
//!
//! ```yaml
//! binaries:
//!   jq:                                  # preset by name
//!   github.com/derailed/k9s:             # provider ref
//!     version: v0.32.5
//!   argsh:
//!     alias: argsh-test
//!     asset: "argsh-so-*"
//! envs:
//!   github.com/org/infra#monitoring:
//!     version: v2.0
//!     strategy: merge
//!     ignore: ["*.md"]
//!     files:
//!       manifests/base/**:               # preserve layout
//!       manifests/hetzner/**: /hetzner   # string shorthand for dest
//!       configs/ingress.yaml:
//!         dest: /config
//!         ignore: ["*.bak"]
//! ```
//!
//! A `binaries:` key containing `/` or `://` is a provider ref; anything
//! else must be a known preset name (checked later, at resolution).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::envmatch::GlobConfig;
use crate::refspec::{self, Ref};

/// Per-file reconciliation policy applied during env sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
  /// Overwrite local files with upstream content.
  #[default]
  Replace,
  /// Keep local files untouched.
  Client,
  /// Three-way merge local edits with upstream changes.
  Merge,
}

impl Strategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Strategy::Replace => "replace",
      Strategy::Client => "client",
      Strategy::Merge => "merge",
    }
  }
}

impl std::str::FromStr for Strategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "replace" => Ok(Strategy::Replace),
      "client" => Ok(Strategy::Client),
      "merge" => Ok(Strategy::Merge),
      other => Err(format!("invalid strategy {:?}: must be replace, client, or merge", other)),
    }
  }
}

/// One `binaries:` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
  /// The manifest key: a preset name or a provider ref.
  pub key: String,
  pub version: Option<String>,
  /// Install a preset under a different file name.
  pub alias: Option<String>,
  /// Explicit target file path, overriding the bin dir.
  pub file: Option<String>,
  /// Glob narrowing release-asset candidates.
  pub asset: Option<String>,
}

impl BinarySpec {
  /// True when the key is a provider ref rather than a preset name.
  pub fn is_provider_ref(&self) -> bool {
    refspec::is_provider_ref(&self.key)
  }

  pub fn parsed_ref(&self) -> Ref {
    let mut r = Ref::parse(&self.key);
    if r.version.is_none() {
      r.version = self.version.clone();
    }
    r
  }
}

/// One `envs:` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSpec {
  /// The full manifest key, label included (`github.com/org/infra#monitoring`).
  pub key: String,
  /// Repo ref with version and label stripped.
  pub ref_base: String,
  /// Fragment label; empty when absent.
  pub label: String,
  /// Requested tag/branch; empty resolves HEAD.
  pub version: String,
  /// Global ignore patterns for this env.
  pub ignore: Vec<String>,
  pub strategy: Strategy,
  /// Glob pattern → per-glob config, in lexicographic key order.
  pub files: BTreeMap<String, GlobConfig>,
}

/// The parsed manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
  pub binaries: Vec<BinarySpec>,
  pub envs: Vec<EnvSpec>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

// Raw deserialization shapes. The manifest maps keys to optional bodies, so
// every value position tolerates null.

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
  #[serde(default)]
  binaries: BTreeMap<String, Option<RawBinary>>,
  #[serde(default)]
  envs: BTreeMap<String, Option<RawEnv>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBinary {
  version: Option<String>,
  alias: Option<String>,
  file: Option<String>,
  asset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnv {
  version: Option<String>,
  #[serde(default)]
  ignore: Vec<String>,
  strategy: Option<Strategy>,
  #[serde(default)]
  files: BTreeMap<String, Option<RawGlob>>,
}

/// A glob value: string shorthand for `dest`, or the full form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawGlob {
  Dest(String),
  Full {
    dest: Option<String>,
    #[serde(default)]
    ignore: Vec<String>,
  },
}

impl From<Option<RawGlob>> for GlobConfig {
  fn from(raw: Option<RawGlob>) -> Self {
    match raw {
      None => GlobConfig::default(),
      Some(RawGlob::Dest(dest)) => GlobConfig {
        dest: Some(dest),
        ignore: Vec::new(),
      },
      Some(RawGlob::Full { dest, ignore }) => GlobConfig { dest, ignore },
    }
  }
}

impl Manifest {
  /// Parse manifest YAML.
  pub fn parse(content: &str, path: &Path) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = serde_yaml::from_str(content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(Manifest::from_raw(raw))
  }

  /// Load and parse the manifest at `path`.
  pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Manifest::parse(&content, path)
  }

  fn from_raw(raw: RawManifest) -> Manifest {
    let binaries = raw
      .binaries
      .into_iter()
      .map(|(key, body)| {
        let body = body.unwrap_or_default();
        BinarySpec {
          key,
          version: body.version,
          alias: body.alias,
          file: body.file,
          asset: body.asset,
        }
      })
      .collect();

    let envs = raw
      .envs
      .into_iter()
      .map(|(key, body)| {
        let body = body.unwrap_or_default();
        let parsed = Ref::parse(&key);
        EnvSpec {
          ref_base: parsed.base(),
          label: parsed.label_str().to_string(),
          // A version in the key (`repo@v2`) and the `version:` field are
          // equivalent; the field wins when both are present.
          version: body.version.or(parsed.version).unwrap_or_default(),
          key,
          ignore: body.ignore,
          strategy: body.strategy.unwrap_or_default(),
          files: body.files.into_iter().map(|(glob, v)| (glob, v.into())).collect(),
        }
      })
      .collect();

    Manifest { binaries, envs }
  }

  pub fn find_env(&self, key: &str) -> Option<&EnvSpec> {
    self.envs.iter().find(|e| e.key == key || e.ref_base == key)
  }

  pub fn find_binary(&self, key: &str) -> Option<&BinarySpec> {
    self.binaries.iter().find(|b| b.key == key)
  }

  pub fn is_empty(&self) -> bool {
    self.binaries.is_empty() && self.envs.is_empty()
  }
}
