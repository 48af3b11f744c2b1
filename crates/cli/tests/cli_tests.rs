//! End-to-end CLI tests that need no network and no host git.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn b() -> Command {
  Command::cargo_bin("b").unwrap()
}

fn sha256_hex(data: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  hex::encode(Sha256::digest(data))
}

fn write_lock(dir: &std::path::Path, body: &str) {
  std::fs::write(dir.join("b.lock"), body).unwrap();
}

#[test]
fn version_prints_tool_version() {
  b()
    .arg("version")
    .assert()
    .success()
    .stdout(predicate::str::starts_with("b "));
}

#[test]
fn help_lists_subcommands() {
  b()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("install"))
    .stdout(predicate::str::contains("update"))
    .stdout(predicate::str::contains("verify"))
    .stdout(predicate::str::contains("cache"));
}

#[test]
fn install_without_manifest_fails() {
  let temp = TempDir::new().unwrap();
  b()
    .arg("install")
    .current_dir(temp.path())
    .env("HOME", temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("no b.yaml configuration found"));
}

#[test]
fn verify_with_no_lock_is_clean() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "binaries:\n  jq:\n").unwrap();

  b()
    .arg("verify")
    .current_dir(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("nothing to verify"));
}

#[test]
fn verify_passes_on_clean_workspace() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "envs:\n  github.com/org/infra:\n").unwrap();
  std::fs::create_dir_all(temp.path().join("manifests/base")).unwrap();
  std::fs::write(temp.path().join("manifests/base/a.yaml"), b"alpha\n").unwrap();

  let lock = format!(
    r#"{{
  "version": 1,
  "tool": {{ "b": "0.0.0" }},
  "timestamp": "2026-01-01T00:00:00Z",
  "binaries": [],
  "envs": [
    {{
      "ref": "github.com/org/infra",
      "version": "v2.0",
      "commit": "{commit}",
      "files": [
        {{ "path": "manifests/base/a.yaml", "dest": "manifests/base/a.yaml", "sha256": "{sha}", "mode": "644" }}
      ]
    }}
  ]
}}
"#,
    commit = "c".repeat(40),
    sha = sha256_hex(b"alpha\n")
  );
  write_lock(temp.path(), &lock);

  b()
    .arg("verify")
    .current_dir(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("verified"));
}

#[test]
fn verify_detects_drift_and_exits_nonzero() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "envs:\n  github.com/org/infra:\n").unwrap();
  std::fs::create_dir_all(temp.path().join("manifests/base")).unwrap();
  // Lock records the hash of "alpha\n" but the user overwrote the file.
  std::fs::write(temp.path().join("manifests/base/a.yaml"), b"edited\n").unwrap();

  let lock = format!(
    r#"{{
  "version": 1,
  "tool": {{ "b": "0.0.0" }},
  "timestamp": "2026-01-01T00:00:00Z",
  "binaries": [],
  "envs": [
    {{
      "ref": "github.com/org/infra",
      "version": "v2.0",
      "commit": "{commit}",
      "files": [
        {{ "path": "manifests/base/a.yaml", "dest": "manifests/base/a.yaml", "sha256": "{sha}", "mode": "644" }}
      ]
    }}
  ]
}}
"#,
    commit = "c".repeat(40),
    sha = sha256_hex(b"alpha\n")
  );
  write_lock(temp.path(), &lock);

  b()
    .arg("verify")
    .current_dir(temp.path())
    .assert()
    .failure()
    .stdout(predicate::str::contains("manifests/base/a.yaml"))
    .stdout(predicate::str::contains("sha256 mismatch"))
    .stderr(predicate::str::contains("differ from lock"));

  // The lock itself must be untouched.
  let on_disk = std::fs::read_to_string(temp.path().join("b.lock")).unwrap();
  assert_eq!(on_disk, lock);
}

#[test]
fn verify_reports_missing_binary() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "binaries:\n  jq:\n").unwrap();

  let lock = format!(
    r#"{{
  "version": 1,
  "tool": {{ "b": "0.0.0" }},
  "timestamp": "2026-01-01T00:00:00Z",
  "binaries": [
    {{ "name": "jq", "version": "v1.7.1", "sha256": "{sha}", "source": "github.com/jqlang/jq", "preset": true }}
  ]
}}
"#,
    sha = "0".repeat(64)
  );
  write_lock(temp.path(), &lock);

  b()
    .arg("verify")
    .current_dir(temp.path())
    .assert()
    .failure()
    .stdout(predicate::str::contains("jq"))
    .stdout(predicate::str::contains("missing"));
}

#[test]
fn cache_path_honors_xdg_cache_home() {
  let temp = TempDir::new().unwrap();
  b()
    .args(["cache", "path"])
    .env("XDG_CACHE_HOME", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("b/repos"));
}

#[test]
fn cache_size_and_clean_on_populated_cache() {
  let temp = TempDir::new().unwrap();
  let repos = temp.path().join("b").join("repos");
  std::fs::create_dir_all(repos.join("deadbeef")).unwrap();
  std::fs::write(repos.join("deadbeef").join("pack"), vec![0u8; 2048]).unwrap();

  b()
    .args(["cache", "size"])
    .env("XDG_CACHE_HOME", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("2.0 KB"));

  b()
    .args(["cache", "clean"])
    .env("XDG_CACHE_HOME", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("freed"));

  assert!(!repos.exists());

  b()
    .args(["cache", "clean"])
    .env("XDG_CACHE_HOME", temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("already clean"));
}

#[test]
fn init_writes_starter_manifest() {
  let temp = TempDir::new().unwrap();
  b()
    .arg("init")
    .current_dir(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("b.yaml"));

  let manifest = temp.path().join(".bin").join("b.yaml");
  assert!(manifest.is_file());
  let content = std::fs::read_to_string(&manifest).unwrap();
  assert!(content.contains("binaries:"));
  assert!(temp.path().join(".bin").join(".gitignore").is_file());

  // Second init refuses to overwrite.
  b()
    .arg("init")
    .current_dir(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));
}

#[test]
fn list_local_shows_configured_entries() {
  let temp = TempDir::new().unwrap();
  std::fs::write(
    temp.path().join("b.yaml"),
    "binaries:\n  jq:\nenvs:\n  github.com/org/infra:\n    files:\n      manifests/**:\n",
  )
  .unwrap();

  b()
    .args(["list", "--local"])
    .current_dir(temp.path())
    .assert()
    .success()
    .stdout(predicate::str::contains("jq"))
    .stdout(predicate::str::contains("github.com/org/infra"));
}

#[test]
fn install_unknown_name_fails() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "binaries:\n  jq:\n").unwrap();

  b()
    .args(["install", "definitely-not-configured"])
    .current_dir(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown binary or env"));
}

#[test]
fn update_rejects_invalid_strategy() {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("b.yaml"), "binaries:\n  jq:\n").unwrap();

  b()
    .args(["update", "--strategy", "overwrite"])
    .current_dir(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid strategy"));
}
