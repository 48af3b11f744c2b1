//! Binary install pipeline: resolve → download → extract → place → checksum.
//!
//! The pipeline interprets a [`BinaryKind`] (the classified form of a
//! manifest entry) against the provider registry and produces an
//! [`InstallOutcome`] ready for a lock upsert. It never replaces the
//! currently running executable.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveError, ArchiveKind, extract_binary};
use crate::cancel::{CancelToken, Cancelled};
use crate::gitcache::GitCache;
use crate::lock::{BinEntry, sha256_file};
use crate::manifest::BinarySpec;
use crate::preset::{self, PresetDef, VersionSource};
use crate::process::Runner;
use crate::provider::asset::{AssetPicker, host_arch, host_os, select_asset};
use crate::provider::{Http, Provider, ProviderError, Registry};
use crate::refspec::{Ref, Scheme};

/// The classified form of a `binaries:` manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryKind {
  /// A built-in declarative recipe.
  Preset(&'static PresetDef),
  /// A release-based provider ref (github, gitlab, gitea).
  Release(Ref),
  /// Compiled from source by the host Go toolchain.
  Go(Ref),
  /// Copied out of an OCI image.
  Docker(Ref),
  /// A single file read from a git repository.
  GitFile(Ref),
}

impl BinaryKind {
  /// Classify a manifest entry. A key without `/` or `://` must name a
  /// known preset.
  pub fn classify(spec: &BinarySpec) -> Result<BinaryKind, InstallError> {
    if !spec.is_provider_ref() {
      return preset::find(&spec.key)
        .map(BinaryKind::Preset)
        .ok_or_else(|| InstallError::UnknownPreset { name: spec.key.clone() });
    }
    let r = spec.parsed_ref();
    Ok(match r.scheme {
      Some(Scheme::Go) => BinaryKind::Go(r),
      Some(Scheme::Docker) => BinaryKind::Docker(r),
      Some(Scheme::Git) => BinaryKind::GitFile(r),
      None => BinaryKind::Release(r),
    })
  }

  /// The name the binary installs under, before any alias is applied.
  pub fn binary_name(&self) -> String {
    match self {
      BinaryKind::Preset(def) => def.name.to_string(),
      BinaryKind::Release(r) | BinaryKind::Go(r) | BinaryKind::Docker(r) | BinaryKind::GitFile(r) => r.binary_name(),
    }
  }
}

/// Fine-grained progress for one binary, consumed by the CLI renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
  Started { name: String },
  Downloading { name: String, received: u64, total: Option<u64> },
  Finished { name: String, message: String, ok: bool },
}

/// Callback-based progress port. The engine never owns a progress bar.
pub trait ProgressSink: Send + Sync {
  fn event(&self, event: ProgressEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
  fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("unknown binary or preset: {name}")]
  UnknownPreset { name: String },

  #[error("refusing to replace the running executable at {path}")]
  SelfReplace { path: PathBuf },

  #[error("downloading {url}: HTTP {status}")]
  Download { url: String, status: u16 },

  #[error(transparent)]
  Provider(#[from] ProviderError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Cancelled(#[from] Cancelled),
}

/// The record of one successful install, ready for a lock upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
  pub name: String,
  pub version: String,
  pub sha256: String,
  pub source: String,
  pub preset: bool,
  pub asset: Option<String>,
  pub provider: Option<String>,
  pub path: PathBuf,
}

impl InstallOutcome {
  pub fn to_lock_entry(&self) -> BinEntry {
    BinEntry {
      name: self.name.clone(),
      version: self.version.clone(),
      sha256: self.sha256.clone(),
      source: self.source.clone(),
      preset: self.preset,
      asset: self.asset.clone(),
      provider: self.provider.clone(),
    }
  }
}

/// One-binary installer bound to its ports.
pub struct Installer<'a, R: Runner> {
  pub registry: &'a Registry,
  pub http: &'a Http,
  pub runner: &'a R,
  pub cache: &'a GitCache<R>,
  pub bin_dir: &'a Path,
  pub picker: Option<&'a dyn AssetPicker>,
  pub sink: &'a dyn ProgressSink,
}

impl<'a, R: Runner> Installer<'a, R> {
  /// Resolve the latest version for a spec without installing.
  pub async fn latest_version(&self, spec: &BinarySpec, cancel: &CancelToken) -> Result<String, InstallError> {
    match BinaryKind::classify(spec)? {
      BinaryKind::Preset(def) => self.preset_latest(def, cancel).await,
      BinaryKind::Release(r) => {
        let provider = self.registry.detect(&r)?;
        Ok(provider.latest_version(self.http, &r, cancel).await?)
      }
      BinaryKind::Go(_) | BinaryKind::Docker(_) => Ok("latest".to_string()),
      BinaryKind::GitFile(r) => {
        let git = crate::provider::git::GitProvider;
        Ok(git.latest_version(self.runner, self.cache, &r, cancel).await?)
      }
    }
  }

  async fn preset_latest(&self, def: &PresetDef, cancel: &CancelToken) -> Result<String, InstallError> {
    cancel.check()?;
    match def.version {
      VersionSource::GithubLatest => {
        let gh = crate::provider::github::Github;
        let repo_ref = Ref::parse(&format!("github.com/{}", def.repo));
        Ok(gh.latest_version(self.http, &repo_ref).await?)
      }
      VersionSource::UrlBody(url) => {
        let resp = self.http.get(url, &[]).await.map_err(ProviderError::Network)?;
        let status = resp.status().as_u16();
        if status != 200 {
          return Err(InstallError::Download {
            url: url.to_string(),
            status,
          });
        }
        let body = resp.text().await.map_err(ProviderError::Network)?;
        Ok(body.trim().to_string())
      }
    }
  }

  /// Install one binary, returning the lock-ready outcome.
  pub async fn install(&self, spec: &BinarySpec, cancel: &CancelToken) -> Result<InstallOutcome, InstallError> {
    cancel.check()?;
    let kind = BinaryKind::classify(spec)?;
    let name = spec.alias.clone().unwrap_or_else(|| kind.binary_name());

    let dest = match &spec.file {
      Some(file) => PathBuf::from(file),
      None => self.bin_dir.join(&name),
    };
    self.refuse_self_replace(&dest)?;

    self.sink.event(ProgressEvent::Started { name: name.clone() });

    let result = match &kind {
      BinaryKind::Preset(def) => self.install_preset(def, spec, &name, &dest, cancel).await,
      BinaryKind::Release(r) => self.install_release(r, spec, &name, &dest, cancel).await,
      BinaryKind::Go(r) => self.install_source(&kind, r, spec, &dest, cancel).await,
      BinaryKind::Docker(r) => self.install_source(&kind, r, spec, &dest, cancel).await,
      BinaryKind::GitFile(r) => self.install_source(&kind, r, spec, &dest, cancel).await,
    };

    match &result {
      Ok(outcome) => self.sink.event(ProgressEvent::Finished {
        name,
        message: format!("{} installed", outcome.version),
        ok: true,
      }),
      Err(e) => self.sink.event(ProgressEvent::Finished {
        name,
        message: e.to_string(),
        ok: false,
      }),
    }
    result
  }

  fn refuse_self_replace(&self, dest: &Path) -> Result<(), InstallError> {
    if let Ok(current) = std::env::current_exe()
      && let Ok(canonical_dest) = dest.canonicalize()
      && current == canonical_dest
    {
      return Err(InstallError::SelfReplace {
        path: dest.to_path_buf(),
      });
    }
    Ok(())
  }

  async fn install_preset(
    &self,
    def: &PresetDef,
    spec: &BinarySpec,
    name: &str,
    dest: &Path,
    cancel: &CancelToken,
  ) -> Result<InstallOutcome, InstallError> {
    let version = match &spec.version {
      Some(version) => version.clone(),
      None => self.preset_latest(def, cancel).await?,
    };

    let (os, arch) = (host_os(), host_arch());
    let asset_name = def.asset_name(&version, os, arch);
    let url = def.download_url(&version, os, arch);

    let payload = self.download(&url, name, cancel).await?;
    extract_binary(ArchiveKind::from_name(&asset_name), &payload, def.name, dest)?;

    Ok(InstallOutcome {
      name: name.to_string(),
      version,
      sha256: sha256_file(dest)?,
      source: def.source(),
      preset: true,
      asset: Some(asset_name),
      provider: None,
      path: dest.to_path_buf(),
    })
  }

  async fn install_release(
    &self,
    r: &Ref,
    spec: &BinarySpec,
    name: &str,
    dest: &Path,
    cancel: &CancelToken,
  ) -> Result<InstallOutcome, InstallError> {
    let provider = self.registry.detect(r)?;
    let release = self.http_release(provider, r, cancel).await?;

    let asset = select_asset(
      &release.assets,
      &r.binary_name(),
      host_os(),
      host_arch(),
      spec.asset.as_deref(),
      self.picker,
    )?;

    let payload = self.download(&asset.url, name, cancel).await?;
    extract_binary(ArchiveKind::from_name(&asset.name), &payload, &r.binary_name(), dest)?;

    Ok(InstallOutcome {
      name: name.to_string(),
      version: release.version,
      sha256: sha256_file(dest)?,
      source: r.base(),
      preset: false,
      asset: Some(asset.name),
      provider: Some(provider.name().to_string()),
      path: dest.to_path_buf(),
    })
  }

  async fn http_release(
    &self,
    provider: &Provider,
    r: &Ref,
    cancel: &CancelToken,
  ) -> Result<crate::provider::Release, InstallError> {
    let version = r.version_str();
    Ok(provider.fetch_release(self.http, r, version, cancel).await?)
  }

  async fn install_source(
    &self,
    kind: &BinaryKind,
    r: &Ref,
    spec: &BinarySpec,
    dest: &Path,
    cancel: &CancelToken,
  ) -> Result<InstallOutcome, InstallError> {
    let version = spec.version.clone().or(r.version.clone()).unwrap_or_default();
    let dest_dir = dest.parent().unwrap_or(self.bin_dir);

    let (installed, provider_name, recorded_version) = match kind {
      BinaryKind::Go(_) => {
        let p = crate::provider::goinstall::GoProvider;
        let path = p.install(self.runner, r, &version, dest_dir, cancel).await?;
        let v = if version.is_empty() { "latest".to_string() } else { version };
        (path, "go", v)
      }
      BinaryKind::Docker(_) => {
        let p = crate::provider::docker::DockerProvider;
        let path = p.install(self.runner, r, &version, dest_dir, cancel).await?;
        let v = if version.is_empty() { "latest".to_string() } else { version };
        (path, "docker", v)
      }
      BinaryKind::GitFile(_) => {
        let p = crate::provider::git::GitProvider;
        let path = p.install(self.runner, self.cache, r, &version, dest_dir, cancel).await?;
        let v = if version.is_empty() {
          p.latest_version(self.runner, self.cache, r, cancel).await?
        } else {
          version
        };
        (path, "git", v)
      }
      _ => unreachable!("install_source called with a release kind"),
    };

    // An alias renames the placed file.
    let final_path = if installed != *dest && spec.alias.is_some() {
      std::fs::rename(&installed, dest)?;
      dest.to_path_buf()
    } else {
      installed
    };

    Ok(InstallOutcome {
      name: spec.alias.clone().unwrap_or_else(|| kind.binary_name()),
      version: recorded_version,
      sha256: sha256_file(&final_path)?,
      source: r.base(),
      preset: false,
      asset: None,
      provider: Some(provider_name.to_string()),
      path: final_path,
    })
  }

  /// Download a URL into memory, reporting chunk progress.
  async fn download(&self, url: &str, name: &str, cancel: &CancelToken) -> Result<Vec<u8>, InstallError> {
    cancel.check()?;
    debug!(url = %url, "downloading");

    let resp = self.http.get(url, &[]).await.map_err(ProviderError::Network)?;
    let status = resp.status().as_u16();
    match status {
      200 => {}
      404 => {
        return Err(InstallError::Provider(ProviderError::NotFound {
          what: url.to_string(),
        }));
      }
      401 => {
        return Err(InstallError::Provider(ProviderError::Unauthorized {
          host: url.to_string(),
          token_var: "GITHUB_TOKEN",
        }));
      }
      403 | 429 => {
        return Err(InstallError::Provider(ProviderError::RateLimited {
          host: url.to_string(),
          token_var: "GITHUB_TOKEN",
        }));
      }
      status => {
        return Err(InstallError::Download {
          url: url.to_string(),
          status,
        });
      }
    }

    let total = resp.content_length();
    let mut payload = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut resp = resp;
    while let Some(chunk) = resp.chunk().await.map_err(ProviderError::Network)? {
      cancel.check()?;
      payload.extend_from_slice(&chunk);
      self.sink.event(ProgressEvent::Downloading {
        name: name.to_string(),
        received: payload.len() as u64,
        total,
      });
    }

    info!(url = %url, bytes = payload.len(), "downloaded");
    Ok(payload)
  }
}
