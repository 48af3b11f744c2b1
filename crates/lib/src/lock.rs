//! Lockfile management.
//!
//! The lockfile (`b.lock`) pins every managed artifact, binaries and env
//! files alike, to an exact version, source, and SHA-256 digest. It lives next
//! to the manifest and is rewritten as a whole after every mutating run.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "tool": { "b": "0.4.0" },
//!   "timestamp": "2026-08-02T10:00:00Z",
//!   "binaries": [
//!     { "name": "jq", "version": "v1.7.1", "sha256": "…", "source": "github.com/jqlang/jq", "preset": true }
//!   ],
//!   "envs": [
//!     {
//!       "ref": "github.com/org/infra",
//!       "version": "v2.0",
//!       "commit": "…40 hex…",
//!       "files": [ { "path": "manifests/base/a.yaml", "dest": "manifests/base/a.yaml", "sha256": "…", "mode": "644" } ]
//!     }
//!   ]
//! }
//! ```

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::{LOCK_FILENAME, LOCK_VERSION};

/// Writer metadata recorded in the lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
  pub b: String,
}

/// A single binary pinned in the lock. Unique by `name`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinEntry {
  pub name: String,
  pub version: String,
  pub sha256: String,
  pub source: String,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub preset: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub asset: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
}

/// A single env pinned in the lock. Unique by `(ref, label)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvEntry {
  #[serde(rename = "ref")]
  pub ref_: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub label: String,
  pub version: String,
  pub commit: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub previous_commit: String,
  pub files: Vec<LockedFile>,
}

/// One synced file inside an env entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockedFile {
  /// Path in the upstream repository.
  pub path: String,
  /// Workspace-relative destination.
  pub dest: String,
  pub sha256: String,
  /// File mode as an octal string: "644" or "755".
  pub mode: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
}

/// The top-level `b.lock` structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
  pub version: u32,
  #[serde(default)]
  pub tool: ToolInfo,
  #[serde(default)]
  pub timestamp: String,
  #[serde(default)]
  pub binaries: Vec<BinEntry>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub envs: Vec<EnvEntry>,
}

impl Default for Lock {
  fn default() -> Self {
    Lock {
      version: LOCK_VERSION,
      tool: ToolInfo::default(),
      timestamp: String::new(),
      binaries: Vec::new(),
      envs: Vec::new(),
    }
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),
}

impl Lock {
  /// Read the lockfile from `dir`.
  ///
  /// A missing file is not an error; it yields an empty lock. A present but
  /// malformed file is a parse error.
  pub fn read(dir: &Path) -> Result<Lock, LockError> {
    let path = dir.join(LOCK_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Lock::default()),
      Err(e) => return Err(LockError::Read(e)),
    };
    serde_json::from_str(&content).map_err(|source| LockError::Parse { path, source })
  }

  /// Write the lockfile into `dir`, stamping the schema version, writer
  /// version, and current UTC timestamp.
  ///
  /// The write goes to a sibling temp file first and is renamed into place
  /// so readers never observe a truncated lock.
  pub fn write(&mut self, dir: &Path, tool_version: &str) -> Result<(), LockError> {
    self.version = LOCK_VERSION;
    self.tool = ToolInfo {
      b: tool_version.to_string(),
    };
    self.timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    content.push('\n');

    let path = dir.join(LOCK_FILENAME);
    let temp_path = dir.join(format!("{}.tmp", LOCK_FILENAME));
    fs::write(&temp_path, &content).map_err(LockError::Write)?;
    fs::rename(&temp_path, &path).map_err(LockError::Write)?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).map_err(LockError::Write)?;
    }

    Ok(())
  }

  pub fn find_binary(&self, name: &str) -> Option<&BinEntry> {
    self.binaries.iter().find(|b| b.name == name)
  }

  pub fn find_env(&self, ref_: &str, label: &str) -> Option<&EnvEntry> {
    self.envs.iter().find(|e| e.ref_ == ref_ && e.label == label)
  }

  /// Replace the entry with the same `name`, or append.
  pub fn upsert_binary(&mut self, entry: BinEntry) {
    match self.binaries.iter_mut().find(|b| b.name == entry.name) {
      Some(existing) => *existing = entry,
      None => self.binaries.push(entry),
    }
  }

  /// Replace the entry with the same `(ref, label)`, or append.
  pub fn upsert_env(&mut self, entry: EnvEntry) {
    match self
      .envs
      .iter_mut()
      .find(|e| e.ref_ == entry.ref_ && e.label == entry.label)
    {
      Some(existing) => *existing = entry,
      None => self.envs.push(entry),
    }
  }
}

/// Stream-hash a file's bytes, returning the lowercase hex SHA-256.
pub fn sha256_file(path: &Path) -> io::Result<String> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
  hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sample_lock() -> Lock {
    let mut lock = Lock::default();
    lock.upsert_binary(BinEntry {
      name: "jq".into(),
      version: "v1.7.1".into(),
      sha256: "aa".repeat(32),
      source: "github.com/jqlang/jq".into(),
      preset: true,
      ..Default::default()
    });
    lock.upsert_env(EnvEntry {
      ref_: "github.com/org/infra".into(),
      version: "v2.0".into(),
      commit: "c".repeat(40),
      files: vec![LockedFile {
        path: "manifests/base/a.yaml".into(),
        dest: "manifests/base/a.yaml".into(),
        sha256: "bb".repeat(32),
        mode: "644".into(),
        status: Some("replaced".into()),
      }],
      ..Default::default()
    });
    lock
  }

  #[test]
  fn read_missing_returns_empty() {
    let temp = TempDir::new().unwrap();
    let lock = Lock::read(temp.path()).unwrap();
    assert_eq!(lock.version, LOCK_VERSION);
    assert!(lock.binaries.is_empty());
    assert!(lock.envs.is_empty());
  }

  #[test]
  fn read_malformed_is_error() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(LOCK_FILENAME), "{ not json").unwrap();
    assert!(matches!(Lock::read(temp.path()), Err(LockError::Parse { .. })));
  }

  #[test]
  fn write_read_roundtrip_modulo_stamps() {
    let temp = TempDir::new().unwrap();
    let mut lock = sample_lock();
    lock.write(temp.path(), "0.4.0").unwrap();

    let loaded = Lock::read(temp.path()).unwrap();
    assert_eq!(loaded.binaries, lock.binaries);
    assert_eq!(loaded.envs, lock.envs);
    assert_eq!(loaded.tool.b, "0.4.0");
    assert!(!loaded.timestamp.is_empty());
  }

  #[test]
  fn write_is_pretty_with_trailing_newline() {
    let temp = TempDir::new().unwrap();
    sample_lock().write(temp.path(), "0.4.0").unwrap();

    let raw = fs::read_to_string(temp.path().join(LOCK_FILENAME)).unwrap();
    assert!(raw.ends_with('\n'));
    assert!(raw.contains("\n  \"version\": 1"));
    assert!(!raw.contains("\"previousCommit\""), "empty fields are omitted");
    assert!(!temp.path().join(format!("{}.tmp", LOCK_FILENAME)).exists());
  }

  #[test]
  fn upsert_binary_replaces_by_name() {
    let mut lock = Lock::default();
    lock.upsert_binary(BinEntry {
      name: "jq".into(),
      version: "v1.6".into(),
      ..Default::default()
    });
    lock.upsert_binary(BinEntry {
      name: "jq".into(),
      version: "v1.7".into(),
      ..Default::default()
    });
    assert_eq!(lock.binaries.len(), 1);
    assert_eq!(lock.binaries[0].version, "v1.7");
  }

  #[test]
  fn upsert_binary_is_idempotent() {
    let mut lock = Lock::default();
    let entry = BinEntry {
      name: "yq".into(),
      version: "v4".into(),
      ..Default::default()
    };
    lock.upsert_binary(entry.clone());
    let once = lock.clone();
    lock.upsert_binary(entry);
    assert_eq!(lock, once);
  }

  #[test]
  fn upsert_env_keys_on_ref_and_label() {
    let mut lock = Lock::default();
    lock.upsert_env(EnvEntry {
      ref_: "github.com/org/infra".into(),
      label: String::new(),
      commit: "a".repeat(40),
      ..Default::default()
    });
    lock.upsert_env(EnvEntry {
      ref_: "github.com/org/infra".into(),
      label: "monitoring".into(),
      commit: "b".repeat(40),
      ..Default::default()
    });
    assert_eq!(lock.envs.len(), 2);

    // Same key replaces.
    lock.upsert_env(EnvEntry {
      ref_: "github.com/org/infra".into(),
      label: "monitoring".into(),
      commit: "c".repeat(40),
      ..Default::default()
    });
    assert_eq!(lock.envs.len(), 2);
    assert_eq!(lock.find_env("github.com/org/infra", "monitoring").unwrap().commit, "c".repeat(40));
  }

  #[test]
  fn sha256_file_matches_bytes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("data.bin");
    fs::write(&path, b"hello world").unwrap();
    assert_eq!(sha256_file(&path).unwrap(), sha256_bytes(b"hello world"));
    assert_eq!(
      sha256_bytes(b"hello world"),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn env_entry_serializes_ref_key() {
    let entry = EnvEntry {
      ref_: "github.com/org/infra".into(),
      version: "v2.0".into(),
      commit: "c".repeat(40),
      ..Default::default()
    };
    let json = serde_json::to_string(&entry).unwrap();
    assert!(json.contains(r#""ref":"github.com/org/infra""#));
    assert!(!json.contains("previousCommit"));
    assert!(!json.contains("label"));
  }
}
