//! Content-addressed cache of shallow bare git clones.
//!
//! The cache directory's immediate subdirectories are bare clones, each
//! named by the hex SHA-256 of the ref base it mirrors. Clones are created
//! once and only ever touched by `git fetch` afterwards; the cache is
//! pruned only on an explicit clean.
//!
//! All git operations shell out to the host `git` through the [`Runner`]
//! port; the engine does not link a git library. Concurrent operations on
//! one ref are safe: git takes its own locks for fetches, and clone
//! creation is serialized here through a per-ref async mutex so two workers
//! never race a `git clone` into the same path.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cancel::{CancelToken, Cancelled};
use crate::paths::default_cache_root;
use crate::process::{CmdOutput, Runner, SystemRunner, argv};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("git {context} failed: {detail}")]
  Command { context: String, detail: String },

  #[error("could not resolve {version:?} for {url}")]
  Unresolvable { version: String, url: String },

  #[error("merge driver failed (exit {status}): {detail}")]
  MergeFatal { status: i32, detail: String },

  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Cancelled(#[from] Cancelled),
}

/// The clone cache. Cheap to share behind a reference.
pub struct GitCache<R: Runner = SystemRunner> {
  root: PathBuf,
  runner: R,
  clone_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GitCache<SystemRunner> {
  /// Cache at the default root (`~/.cache/b/repos`) backed by real git.
  pub fn system() -> Self {
    GitCache::new(default_cache_root(), SystemRunner)
  }
}

impl<R: Runner> GitCache<R> {
  pub fn new(root: PathBuf, runner: R) -> Self {
    GitCache {
      root,
      runner,
      clone_locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn runner(&self) -> &R {
    &self.runner
  }

  /// Clone directory for a ref base: `<root>/<sha256(ref_base)>`.
  pub fn cache_dir(&self, ref_base: &str) -> PathBuf {
    self.root.join(hex::encode(Sha256::digest(ref_base.as_bytes())))
  }

  async fn git(&self, context: &str, args: Vec<String>) -> Result<CmdOutput, CacheError> {
    let output = self
      .runner
      .run("git", &args, &Default::default())
      .await
      .map_err(CacheError::Io)?;
    if !output.success() {
      return Err(CacheError::Command {
        context: context.to_string(),
        detail: output.stderr_str().trim().to_string(),
      });
    }
    Ok(output)
  }

  /// Create a shallow bare clone for `ref_base` unless one already exists.
  ///
  /// Exactly one `git clone` runs even when called concurrently for the
  /// same ref.
  pub async fn ensure_clone(&self, ref_base: &str, url: &str, cancel: &CancelToken) -> Result<(), CacheError> {
    cancel.check()?;

    let dir = self.cache_dir(ref_base);
    if dir.exists() {
      return Ok(());
    }

    let lock = {
      let mut locks = self.clone_locks.lock().await;
      locks.entry(ref_base.to_string()).or_default().clone()
    };
    let _guard = lock.lock().await;

    // Another worker may have cloned while we waited.
    if dir.exists() {
      return Ok(());
    }

    info!(url = %url, dir = %dir.display(), "cloning");
    std::fs::create_dir_all(&self.root)?;
    self
      .git(
        "clone",
        argv(&["clone", "--bare", "--depth", "1", url, &dir.to_string_lossy()]),
      )
      .await?;
    Ok(())
  }

  /// Resolve a symbolic version to a 40-char commit SHA via `ls-remote`.
  ///
  /// An empty version or `HEAD` tries `HEAD`, then `refs/heads/main`, then
  /// `refs/heads/master`.
  pub async fn resolve(&self, url: &str, version: &str, cancel: &CancelToken) -> Result<String, CacheError> {
    cancel.check()?;

    let version = if version.is_empty() { "HEAD" } else { version };
    let mut candidates = vec![version.to_string()];
    if version == "HEAD" {
      candidates.push("refs/heads/main".to_string());
      candidates.push("refs/heads/master".to_string());
    }

    for candidate in &candidates {
      let output = match self.git("ls-remote", argv(&["ls-remote", url, candidate])).await {
        Ok(output) => output,
        Err(CacheError::Command { .. }) => continue,
        Err(e) => return Err(e),
      };
      let stdout = output.stdout_str();
      if let Some(sha) = stdout.lines().find_map(|line| line.split_whitespace().next()) {
        debug!(version = %candidate, sha = %sha, "resolved");
        return Ok(sha.to_string());
      }
    }

    Err(CacheError::Unresolvable {
      version: version.to_string(),
      url: url.to_string(),
    })
  }

  /// Make a specific commit or tag available in the local clone.
  pub async fn fetch(&self, ref_base: &str, rev: &str, cancel: &CancelToken) -> Result<(), CacheError> {
    cancel.check()?;
    let dir = self.cache_dir(ref_base);
    self
      .git(
        "fetch",
        argv(&["-C", &dir.to_string_lossy(), "fetch", "--depth", "1", "origin", rev]),
      )
      .await?;
    Ok(())
  }

  /// All file paths in the repo at `commit`, in tree order.
  pub async fn list_tree(&self, ref_base: &str, commit: &str, cancel: &CancelToken) -> Result<Vec<String>, CacheError> {
    cancel.check()?;
    let dir = self.cache_dir(ref_base);
    let output = self
      .git(
        "ls-tree",
        argv(&["-C", &dir.to_string_lossy(), "ls-tree", "-r", "--name-only", commit]),
      )
      .await?;
    Ok(
      output
        .stdout_str()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect(),
    )
  }

  /// Raw bytes of one file at `commit`.
  pub async fn show_file(
    &self,
    ref_base: &str,
    commit: &str,
    path: &str,
    cancel: &CancelToken,
  ) -> Result<Vec<u8>, CacheError> {
    cancel.check()?;
    let dir = self.cache_dir(ref_base);
    let spec = format!("{}:{}", commit, path);
    let output = self
      .git("show", argv(&["-C", &dir.to_string_lossy(), "show", &spec]))
      .await?;
    Ok(output.stdout)
  }

  /// Three-way merge via `git merge-file --diff3`.
  ///
  /// Returns the merged bytes and whether conflict markers were inserted.
  /// Exit status 1..127 is "that many conflicts", not a failure; >= 128 is
  /// fatal.
  pub async fn merge3(&self, local: &[u8], base: &[u8], upstream: &[u8]) -> Result<(Vec<u8>, bool), CacheError> {
    let dir = tempfile::tempdir()?;
    let local_path = dir.path().join("local");
    let base_path = dir.path().join("base");
    let upstream_path = dir.path().join("upstream");
    std::fs::write(&local_path, local)?;
    std::fs::write(&base_path, base)?;
    std::fs::write(&upstream_path, upstream)?;

    let args = argv(&[
      "merge-file",
      "--diff3",
      &local_path.to_string_lossy(),
      &base_path.to_string_lossy(),
      &upstream_path.to_string_lossy(),
    ]);
    let output = self.runner.run("git", &args, &Default::default()).await?;

    // merge-file writes the result into the local file in place.
    match output.status {
      0 => Ok((std::fs::read(&local_path)?, false)),
      conflicts if (1..128).contains(&conflicts) => {
        debug!(conflicts, "merge produced conflicts");
        Ok((std::fs::read(&local_path)?, true))
      }
      status => Err(CacheError::MergeFatal {
        status,
        detail: output.stderr_str().trim().to_string(),
      }),
    }
  }

  /// Unified diff between two byte buffers via `git diff --no-index`.
  ///
  /// Exit status 1 means "different" and is not an error.
  pub async fn diff_no_index(
    &self,
    a: &[u8],
    b: &[u8],
    label_a: &str,
    label_b: &str,
  ) -> Result<String, CacheError> {
    let dir = tempfile::tempdir()?;
    let a_path = dir.path().join("a");
    let b_path = dir.path().join("b");
    std::fs::write(&a_path, a)?;
    std::fs::write(&b_path, b)?;

    let args = argv(&[
      "diff",
      "--no-index",
      "--label",
      label_a,
      "--label",
      label_b,
      &a_path.to_string_lossy(),
      &b_path.to_string_lossy(),
    ]);
    let output = self.runner.run("git", &args, &Default::default()).await?;

    match output.status {
      0 | 1 => Ok(output.stdout_str()),
      status => Err(CacheError::Command {
        context: "diff --no-index".to_string(),
        detail: format!("exit {}: {}", status, output.stderr_str().trim()),
      }),
    }
  }

  /// Total size in bytes of the cache directory tree.
  pub fn size(&self) -> io::Result<u64> {
    if !self.root.exists() {
      return Ok(0);
    }
    let mut total = 0;
    for entry in walkdir::WalkDir::new(&self.root) {
      let entry = entry.map_err(io::Error::other)?;
      if entry.file_type().is_file() {
        total += entry.metadata().map_err(io::Error::other)?.len();
      }
    }
    Ok(total)
  }

  /// Remove the whole cache, returning the bytes freed.
  pub fn clean(&self) -> io::Result<u64> {
    let size = self.size()?;
    match std::fs::remove_dir_all(&self.root) {
      Ok(()) => Ok(size),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use std::sync::Mutex as StdMutex;
  use tempfile::TempDir;

  /// Runner with a scripted response function; records every invocation.
  struct FakeRunner<F> {
    respond: F,
    calls: StdMutex<Vec<Vec<String>>>,
  }

  impl<F: Fn(&[String]) -> CmdOutput + Send + Sync> FakeRunner<F> {
    fn new(respond: F) -> Self {
      FakeRunner {
        respond,
        calls: StdMutex::new(Vec::new()),
      }
    }

    fn calls(&self) -> Vec<Vec<String>> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl<F: Fn(&[String]) -> CmdOutput + Send + Sync> Runner for &FakeRunner<F> {
    async fn run(&self, _program: &str, args: &[String], _envs: &BTreeMap<String, String>) -> io::Result<CmdOutput> {
      self.calls.lock().unwrap().push(args.to_vec());
      Ok((self.respond)(args))
    }
  }

  fn ok_output(stdout: &str) -> CmdOutput {
    CmdOutput {
      status: 0,
      stdout: stdout.as_bytes().to_vec(),
      stderr: Vec::new(),
    }
  }

  fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
  }

  #[test]
  fn cache_dir_is_sha256_of_ref() {
    let runner = FakeRunner::new(|_| ok_output(""));
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);
    let dir = cache.cache_dir("github.com/org/repo");
    let name = dir.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(name.len(), 64);
    assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    // Stable across calls, distinct across refs.
    assert_eq!(dir, cache.cache_dir("github.com/org/repo"));
    assert_ne!(dir, cache.cache_dir("github.com/org/other"));
  }

  #[test]
  fn ensure_clone_skips_existing() {
    let temp = TempDir::new().unwrap();
    let runner = FakeRunner::new(|_| ok_output(""));
    let cache = GitCache::new(temp.path().to_path_buf(), &runner);
    std::fs::create_dir_all(cache.cache_dir("github.com/org/repo")).unwrap();

    rt().block_on(async {
      cache
        .ensure_clone("github.com/org/repo", "https://github.com/org/repo.git", &CancelToken::new())
        .await
        .unwrap();
    });
    assert!(runner.calls().is_empty());
  }

  #[test]
  fn concurrent_ensure_clone_runs_one_git_clone() {
    let temp = TempDir::new().unwrap();
    let runner = FakeRunner::new(|args: &[String]| {
      // `git clone ... <dir>`: create the directory like git would.
      if args.first().map(String::as_str) == Some("clone") {
        std::fs::create_dir_all(args.last().unwrap()).unwrap();
      }
      ok_output("")
    });
    let cache = Arc::new(GitCache::new(temp.path().to_path_buf(), &runner));

    rt().block_on(async {
      let cancel = CancelToken::new();
      let a = {
        let cache = cache.clone();
        let cancel = cancel.clone();
        async move {
          cache
            .ensure_clone("github.com/org/repo", "https://github.com/org/repo.git", &cancel)
            .await
        }
      };
      let b = {
        let cache = cache.clone();
        let cancel = cancel.clone();
        async move {
          cache
            .ensure_clone("github.com/org/repo", "https://github.com/org/repo.git", &cancel)
            .await
        }
      };
      let (ra, rb) = tokio::join!(a, b);
      ra.unwrap();
      rb.unwrap();
    });

    let clones = runner
      .calls()
      .iter()
      .filter(|args| args.first().map(String::as_str) == Some("clone"))
      .count();
    assert_eq!(clones, 1);
  }

  #[test]
  fn resolve_takes_first_sha() {
    let runner = FakeRunner::new(|_| ok_output("abc123def\trefs/tags/v2.0\n"));
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let sha = rt()
      .block_on(cache.resolve("https://github.com/org/repo.git", "v2.0", &CancelToken::new()))
      .unwrap();
    assert_eq!(sha, "abc123def");
  }

  #[test]
  fn resolve_head_falls_back_to_main() {
    let runner = FakeRunner::new(|args: &[String]| {
      if args.last().map(String::as_str) == Some("refs/heads/main") {
        ok_output("feedface\trefs/heads/main\n")
      } else {
        ok_output("")
      }
    });
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let sha = rt()
      .block_on(cache.resolve("https://x.git", "", &CancelToken::new()))
      .unwrap();
    assert_eq!(sha, "feedface");
  }

  #[test]
  fn resolve_unresolvable() {
    let runner = FakeRunner::new(|_| ok_output(""));
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let err = rt()
      .block_on(cache.resolve("https://x.git", "vX", &CancelToken::new()))
      .unwrap_err();
    assert!(matches!(err, CacheError::Unresolvable { .. }));
  }

  #[test]
  fn list_tree_splits_lines() {
    let runner = FakeRunner::new(|_| ok_output("a.yaml\ndir/b.yaml\n"));
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let tree = rt()
      .block_on(cache.list_tree("ref", "c0ffee", &CancelToken::new()))
      .unwrap();
    assert_eq!(tree, vec!["a.yaml".to_string(), "dir/b.yaml".to_string()]);
  }

  #[test]
  fn merge3_clean_returns_local_content() {
    // Emulate merge-file: write upstream's content into the local temp file
    // and exit 0.
    let runner = FakeRunner::new(|args: &[String]| {
      if args.first().map(String::as_str) == Some("merge-file") {
        let upstream = std::fs::read(&args[4]).unwrap();
        std::fs::write(&args[2], upstream).unwrap();
      }
      ok_output("")
    });
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let (merged, conflict) = rt()
      .block_on(cache.merge3(b"local\n", b"base\n", b"upstream\n"))
      .unwrap();
    assert_eq!(merged, b"upstream\n");
    assert!(!conflict);
  }

  #[test]
  fn merge3_conflict_status_counts() {
    let runner = FakeRunner::new(|args: &[String]| {
      if args.first().map(String::as_str) == Some("merge-file") {
        std::fs::write(&args[2], b"<<<<<<<\nconflict\n>>>>>>>\n").unwrap();
      }
      CmdOutput {
        status: 2,
        ..Default::default()
      }
    });
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let (merged, conflict) = rt().block_on(cache.merge3(b"l", b"b", b"u")).unwrap();
    assert!(conflict);
    assert!(String::from_utf8_lossy(&merged).contains("<<<<<<<"));
  }

  #[test]
  fn merge3_fatal_status() {
    let runner = FakeRunner::new(|_| CmdOutput {
      status: 128,
      stderr: b"boom".to_vec(),
      ..Default::default()
    });
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let err = rt().block_on(cache.merge3(b"l", b"b", b"u")).unwrap_err();
    assert!(matches!(err, CacheError::MergeFatal { status: 128, .. }));
  }

  #[test]
  fn diff_exit_one_is_not_an_error() {
    let runner = FakeRunner::new(|_| CmdOutput {
      status: 1,
      stdout: b"--- local\n+++ upstream\n".to_vec(),
      stderr: Vec::new(),
    });
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);

    let diff = rt()
      .block_on(cache.diff_no_index(b"a", b"b", "local", "upstream"))
      .unwrap();
    assert!(diff.contains("+++ upstream"));
  }

  #[test]
  fn cancelled_before_subprocess() {
    let runner = FakeRunner::new(|_| ok_output(""));
    let cache = GitCache::new(PathBuf::from("/cache"), &runner);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = rt().block_on(cache.resolve("https://x.git", "", &cancel)).unwrap_err();
    assert!(matches!(err, CacheError::Cancelled(_)));
    assert!(runner.calls().is_empty());
  }

  #[test]
  fn size_and_clean() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("repos");
    let runner = FakeRunner::new(|_| ok_output(""));
    let cache = GitCache::new(root.clone(), &runner);
    assert_eq!(cache.size().unwrap(), 0);

    std::fs::create_dir_all(root.join("abc")).unwrap();
    std::fs::write(root.join("abc").join("pack"), vec![0u8; 1024]).unwrap();
    assert_eq!(cache.size().unwrap(), 1024);

    assert_eq!(cache.clean().unwrap(), 1024);
    assert!(!root.exists());
    assert_eq!(cache.clean().unwrap(), 0);
  }
}
