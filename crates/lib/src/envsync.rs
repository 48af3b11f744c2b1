//! Env sync engine.
//!
//! Reconciles a set of upstream files (matched by globs at one commit)
//! with the workspace, honoring per-file strategies:
//!
//! - `replace` overwrites local content,
//! - `client` keeps local content untouched,
//! - `merge` three-way merges local edits against the upstream change,
//!   falling back to `replace` when the merge base is unavailable.
//!
//! Drift is the condition where a workspace file's current hash differs
//! from the hash recorded in the last successful lock entry; a missing
//! destination counts as no drift (first sync). When drift is detected and
//! a conflict-resolver port is installed, the resolver picks the strategy
//! for that file.
//!
//! The engine never writes into the cache or outside the workspace root,
//! and a `skipped` result must not overwrite the existing lock entry.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::{CancelToken, Cancelled};
use crate::envmatch::{MatchError, match_globs};
use crate::gitcache::{CacheError, GitCache};
use crate::lock::{EnvEntry, LockedFile, sha256_bytes, sha256_file};
use crate::manifest::{EnvSpec, Strategy};
use crate::process::Runner;
use crate::refspec::clone_url;

/// Decides the per-file strategy when local drift is detected.
///
/// A pure function of its inputs from the engine's point of view; the CLI
/// implements it as an interactive prompt.
pub trait ConflictResolver: Send + Sync {
  fn resolve(&self, source_path: &str, dest_path: &str) -> Strategy;
}

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("resolving {ref_}@{version}: {source}")]
  Resolve {
    ref_: String,
    version: String,
    #[source]
    source: CacheError,
  },

  #[error("no files matched for {ref_} — check your glob patterns")]
  TreeEmpty { ref_: String },

  #[error(transparent)]
  Match(#[from] MatchError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("writing {dest}: {source}")]
  Write {
    dest: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Cancelled(#[from] Cancelled),
}

/// Outcome of syncing one env.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
  pub ref_: String,
  pub label: String,
  pub version: String,
  pub commit: String,
  pub previous_commit: String,
  pub files: Vec<LockedFile>,
  pub conflicts: usize,
  /// True when the lock already points at the resolved commit; nothing was
  /// written.
  pub skipped: bool,
  pub message: String,
}

impl SyncResult {
  pub fn to_lock_entry(&self) -> EnvEntry {
    EnvEntry {
      ref_: self.ref_.clone(),
      label: self.label.clone(),
      version: self.version.clone(),
      commit: self.commit.clone(),
      previous_commit: self.previous_commit.clone(),
      files: self.files.clone(),
    }
  }
}

pub struct EnvSyncer<'a, R: Runner> {
  cache: &'a GitCache<R>,
  workspace: &'a Path,
  resolver: Option<&'a dyn ConflictResolver>,
}

impl<'a, R: Runner> EnvSyncer<'a, R> {
  pub fn new(cache: &'a GitCache<R>, workspace: &'a Path) -> Self {
    EnvSyncer {
      cache,
      workspace,
      resolver: None,
    }
  }

  pub fn with_resolver(mut self, resolver: &'a dyn ConflictResolver) -> Self {
    self.resolver = Some(resolver);
    self
  }

  /// Sync one env against the workspace.
  pub async fn sync(
    &self,
    cfg: &EnvSpec,
    prev: Option<&EnvEntry>,
    cancel: &CancelToken,
  ) -> Result<SyncResult, SyncError> {
    let ref_base = cfg.ref_base.as_str();
    let url = clone_url(ref_base);

    let commit = self
      .cache
      .resolve(&url, &cfg.version, cancel)
      .await
      .map_err(|source| SyncError::Resolve {
        ref_: ref_base.to_string(),
        version: cfg.version.clone(),
        source,
      })?;

    if let Some(prev) = prev
      && prev.commit == commit
    {
      debug!(ref_ = %ref_base, commit = %commit, "already up to date");
      return Ok(SyncResult {
        ref_: ref_base.to_string(),
        label: cfg.label.clone(),
        version: cfg.version.clone(),
        commit,
        previous_commit: prev.previous_commit.clone(),
        files: Vec::new(),
        conflicts: 0,
        skipped: true,
        message: "up to date".to_string(),
      });
    }

    self.cache.ensure_clone(ref_base, &url, cancel).await?;
    self.cache.fetch(ref_base, &commit, cancel).await?;

    // The merge base lives at the previously locked commit. Failing to
    // fetch it downgrades merges to replace, it does not abort the sync.
    let mut base_available = false;
    if cfg.strategy == Strategy::Merge
      && let Some(prev) = prev
      && !prev.commit.is_empty()
    {
      match self.cache.fetch(ref_base, &prev.commit, cancel).await {
        Ok(()) => base_available = true,
        Err(e) => warn!(commit = %prev.commit, error = %e, "cannot fetch previous commit, merge falls back to replace"),
      }
    }

    let tree = self.cache.list_tree(ref_base, &commit, cancel).await?;
    let matched = match_globs(&tree, &cfg.files, &cfg.ignore)?;
    if matched.is_empty() {
      return Err(SyncError::TreeEmpty {
        ref_: ref_base.to_string(),
      });
    }

    let mut files = Vec::with_capacity(matched.len());
    let mut conflicts = 0;

    for m in &matched {
      cancel.check()?;

      let upstream = self.cache.show_file(ref_base, &commit, &m.source, cancel).await?;
      let upstream_hash = sha256_bytes(&upstream);

      let dest_abs = self.workspace.join(&m.dest);
      let prev_file = prev.and_then(|p| p.files.iter().find(|f| f.path == m.source));
      let local_hash = if dest_abs.is_file() {
        Some(sha256_file(&dest_abs).map_err(|source| SyncError::Write {
          dest: dest_abs.clone(),
          source,
        })?)
      } else {
        None
      };

      let drift = matches!((&local_hash, prev_file), (Some(local), Some(locked)) if *local != locked.sha256);

      let mut strategy = cfg.strategy;
      if drift && let Some(resolver) = self.resolver {
        strategy = resolver.resolve(&m.source, &m.dest);
        debug!(file = %m.dest, strategy = %strategy.as_str(), "conflict resolver decided");
      }

      let (sha256, status) = match strategy {
        Strategy::Client => {
          // Never writes. The lock records the local content as-is; a
          // missing destination is recorded as empty content.
          let hash = local_hash.clone().unwrap_or_else(|| sha256_bytes(b""));
          (hash, "kept".to_string())
        }
        Strategy::Replace => {
          self.write_dest(&dest_abs, &upstream)?;
          let status = if drift {
            "replaced (local changes overwritten)"
          } else {
            "replaced"
          };
          (upstream_hash.clone(), status.to_string())
        }
        Strategy::Merge => {
          if !drift {
            // Nothing local to preserve; take upstream directly.
            self.write_dest(&dest_abs, &upstream)?;
            (upstream_hash.clone(), "replaced".to_string())
          } else {
            let (sha, status, had_conflict) = self
              .merge_file(ref_base, prev, prev_file, base_available, &dest_abs, &m.source, &upstream, cancel)
              .await?;
            if had_conflict {
              conflicts += 1;
            }
            (sha, status)
          }
        }
      };

      files.push(LockedFile {
        path: m.source.clone(),
        dest: m.dest.clone(),
        sha256,
        mode: "644".to_string(),
        status: Some(status),
      });
    }

    let previous_commit = prev.map(|p| p.commit.clone()).unwrap_or_default();
    let message = sync_message(&files, conflicts);

    info!(ref_ = %ref_base, commit = %commit, files = files.len(), conflicts, "synced");

    Ok(SyncResult {
      ref_: ref_base.to_string(),
      label: cfg.label.clone(),
      version: cfg.version.clone(),
      commit,
      previous_commit,
      files,
      conflicts,
      skipped: false,
      message,
    })
  }

  /// Three-way merge one drifted file. Returns `(sha256, status, conflict)`.
  #[allow(clippy::too_many_arguments)]
  async fn merge_file(
    &self,
    ref_base: &str,
    prev: Option<&EnvEntry>,
    prev_file: Option<&LockedFile>,
    base_available: bool,
    dest_abs: &Path,
    source_path: &str,
    upstream: &[u8],
    cancel: &CancelToken,
  ) -> Result<(String, String, bool), SyncError> {
    let fallback = |reason: String, this: &Self| -> Result<(String, String, bool), SyncError> {
      this.write_dest(dest_abs, upstream)?;
      Ok((
        sha256_bytes(upstream),
        format!("replaced (merge failed: {})", reason),
        false,
      ))
    };

    let base_commit = match prev {
      Some(p) if base_available && !p.commit.is_empty() && prev_file.is_some() => p.commit.clone(),
      _ => return fallback("previous commit unavailable".to_string(), self),
    };

    let base = match self.cache.show_file(ref_base, &base_commit, source_path, cancel).await {
      Ok(base) => base,
      Err(e) => return fallback(format!("cannot read base: {}", e), self),
    };

    let local = std::fs::read(dest_abs).map_err(|source| SyncError::Write {
      dest: dest_abs.to_path_buf(),
      source,
    })?;

    match self.cache.merge3(&local, &base, upstream).await {
      Ok((merged, has_conflict)) => {
        self.write_dest(dest_abs, &merged)?;
        let status = if has_conflict { "conflict" } else { "merged" };
        Ok((sha256_bytes(&merged), status.to_string(), has_conflict))
      }
      Err(e) => fallback(e.to_string(), self),
    }
  }

  fn write_dest(&self, dest: &Path, content: &[u8]) -> Result<(), SyncError> {
    let result: io::Result<()> = (|| {
      if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(dest, content)?;
      #[cfg(unix)]
      {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o644))?;
      }
      Ok(())
    })();
    result.map_err(|source| SyncError::Write {
      dest: dest.to_path_buf(),
      source,
    })
  }
}

/// Summarize per-file outcomes.
///
/// All-replaced syncs read `"N file(s) synced"`; anything else joins the
/// non-zero counts, e.g. `"1 replaced, 2 kept, 1 conflict(s)"`.
fn sync_message(files: &[LockedFile], conflicts: usize) -> String {
  fn status(f: &LockedFile) -> &str {
    f.status.as_deref().unwrap_or("")
  }
  let replaced = files.iter().filter(|f| status(f).starts_with("replaced")).count();
  let kept = files.iter().filter(|f| status(f) == "kept").count();
  let merged = files.iter().filter(|f| status(f) == "merged").count();

  if kept == 0 && merged == 0 && conflicts == 0 {
    return format!("{} file(s) synced", replaced);
  }

  let mut parts = Vec::new();
  if replaced > 0 {
    parts.push(format!("{} replaced", replaced));
  }
  if kept > 0 {
    parts.push(format!("{} kept", kept));
  }
  if merged > 0 {
    parts.push(format!("{} merged", merged));
  }
  if conflicts > 0 {
    parts.push(format!("{} conflict(s)", conflicts));
  }
  parts.join(", ")
}
