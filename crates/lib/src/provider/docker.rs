//! `docker://` provider: extract binaries from OCI images.
//!
//! Pulls the image with the first available container runtime (docker,
//! then podman, then nerdctl), creates a stopped container, copies the
//! named binary out of a list of standard paths, and removes the
//! container.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::ProviderError;
use crate::cancel::CancelToken;
use crate::process::{Runner, argv, lookup_path};
use crate::refspec::{Ref, Scheme};

const RUNTIMES: &[&str] = &["docker", "podman", "nerdctl"];

#[derive(Debug, Default)]
pub struct DockerProvider;

impl DockerProvider {
  pub fn matches(&self, r: &Ref) -> bool {
    r.scheme == Some(Scheme::Docker)
  }

  fn detect_runtime() -> Result<&'static str, ProviderError> {
    RUNTIMES
      .iter()
      .find(|rt| lookup_path(rt).is_some())
      .copied()
      .ok_or(ProviderError::ToolMissing {
        tool: "docker, podman, or nerdctl".to_string(),
        context: "the docker:// provider",
      })
  }

  /// Copy the named binary out of the image into `dest_dir`.
  pub async fn install<R: Runner>(
    &self,
    runner: &R,
    r: &Ref,
    version: &str,
    dest_dir: &Path,
    cancel: &CancelToken,
  ) -> Result<PathBuf, ProviderError> {
    cancel.check()?;

    let runtime = Self::detect_runtime()?;
    let tag = if version.is_empty() { "latest" } else { version };
    let image = format!("{}:{}", image_name(r), tag);
    let name = r.binary_name();

    info!(image = %image, runtime = %runtime, "pulling image");
    let pull = runner.run(runtime, &argv(&["pull", &image]), &Default::default()).await?;
    if !pull.success() {
      return Err(ProviderError::Command {
        context: format!("{} pull {}", runtime, image),
        detail: pull.stderr_str().trim().to_string(),
      });
    }

    cancel.check()?;
    let create = runner
      .run(runtime, &argv(&["create", &image]), &Default::default())
      .await?;
    if !create.success() {
      return Err(ProviderError::Command {
        context: format!("{} create {}", runtime, image),
        detail: create.stderr_str().trim().to_string(),
      });
    }
    let container = create.stdout_str().trim().to_string();

    let result = self.copy_out(runner, runtime, &container, &name, &image, dest_dir).await;

    // Always clean up the container, even on failure.
    let rm = runner
      .run(runtime, &argv(&["rm", &container]), &Default::default())
      .await;
    if let Ok(output) = rm
      && !output.success()
    {
      warn!(container = %container, "failed to remove container");
    }

    result
  }

  async fn copy_out<R: Runner>(
    &self,
    runner: &R,
    runtime: &str,
    container: &str,
    name: &str,
    image: &str,
    dest_dir: &Path,
  ) -> Result<PathBuf, ProviderError> {
    let search_paths = [
      format!("/usr/local/bin/{}", name),
      format!("/usr/bin/{}", name),
      format!("/bin/{}", name),
      format!("/app/{}", name),
    ];

    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(name);

    for path in &search_paths {
      let from = format!("{}:{}", container, path);
      let cp = runner
        .run(runtime, &argv(&["cp", &from, &dest.to_string_lossy()]), &Default::default())
        .await?;
      if cp.success() {
        debug!(path = %path, "found binary in image");
        #[cfg(unix)]
        {
          use std::os::unix::fs::PermissionsExt;
          std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
        }
        return Ok(dest);
      }
    }

    Err(ProviderError::Command {
      context: format!("extracting {} from {}", name, image),
      detail: format!("binary not found at any of: {}", search_paths.join(", ")),
    })
  }
}

/// Image name with any docker-style `:tag` removed (the tag comes from the
/// ref version).
fn image_name(r: &Ref) -> &str {
  match r.host_path.rfind(':') {
    Some(i) => &r.host_path[..i],
    None => &r.host_path,
  }
}
