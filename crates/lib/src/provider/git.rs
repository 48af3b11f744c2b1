//! `git://` provider: read a single file out of a git repository.
//!
//! Local repos (`git:///abs/path:file`) are read with `git show` in place;
//! remote repos go through the shallow clone cache.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::ProviderError;
use crate::cancel::CancelToken;
use crate::gitcache::GitCache;
use crate::process::{Runner, argv};
use crate::provider::goinstall::write_executable;
use crate::refspec::{Ref, Scheme, clone_url};

#[derive(Debug, Default)]
pub struct GitProvider;

impl GitProvider {
  pub fn matches(&self, r: &Ref) -> bool {
    r.scheme == Some(Scheme::Git)
  }

  /// HEAD commit of the ref's repository.
  pub async fn latest_version<R: Runner>(
    &self,
    runner: &R,
    cache: &GitCache<R>,
    r: &Ref,
    cancel: &CancelToken,
  ) -> Result<String, ProviderError> {
    cancel.check()?;
    if r.is_local_path() {
      let output = runner
        .run("git", &argv(&["-C", &r.host_path, "rev-parse", "HEAD"]), &Default::default())
        .await?;
      if !output.success() {
        return Err(ProviderError::Command {
          context: format!("git rev-parse HEAD in {}", r.host_path),
          detail: output.stderr_str().trim().to_string(),
        });
      }
      return Ok(output.stdout_str().trim().to_string());
    }
    Ok(cache.resolve(&clone_url(&r.host_path), "HEAD", cancel).await?)
  }

  /// Extract the ref's file at `version` into `dest_dir`, mode 0755.
  pub async fn install<R: Runner>(
    &self,
    runner: &R,
    cache: &GitCache<R>,
    r: &Ref,
    version: &str,
    dest_dir: &Path,
    cancel: &CancelToken,
  ) -> Result<PathBuf, ProviderError> {
    cancel.check()?;

    let file_path = r.file_path.as_deref().ok_or_else(|| ProviderError::Command {
      context: format!("parsing {}", r),
      detail: "git ref missing filepath separator ':' — expected git://<repo>:<filepath>".to_string(),
    })?;

    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(r.binary_name());

    let data = if r.is_local_path() {
      let treeish = if version.is_empty() { "HEAD" } else { version };
      let spec = format!("{}:{}", treeish, file_path);
      debug!(repo = %r.host_path, spec = %spec, "git show (local)");
      let output = runner
        .run("git", &argv(&["-C", &r.host_path, "show", &spec]), &Default::default())
        .await?;
      if !output.success() {
        return Err(ProviderError::Command {
          context: format!("git show {} in {}", spec, r.host_path),
          detail: output.stderr_str().trim().to_string(),
        });
      }
      output.stdout
    } else {
      let repo = &r.host_path;
      let url = clone_url(repo);
      cache.ensure_clone(repo, &url, cancel).await?;

      let commit = if version.is_empty() {
        cache.resolve(&url, "HEAD", cancel).await?
      } else {
        version.to_string()
      };

      // The commit may already be cached; a failed fetch only matters if
      // the show fails too.
      if let Err(e) = cache.fetch(repo, &commit, cancel).await {
        debug!(error = %e, commit = %commit, "fetch failed, trying cached object");
      }

      cache.show_file(repo, &commit, file_path, cancel).await?
    };

    info!(dest = %dest.display(), "installing file from git");
    write_executable(&dest, &data)?;
    Ok(dest)
  }
}
