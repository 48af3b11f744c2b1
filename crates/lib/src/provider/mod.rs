//! Provider registry and dispatch.
//!
//! A provider knows how to turn a ref into an installable artifact. The
//! release-based providers (`github`, `gitlab`, `gitea`) enumerate release
//! assets over HTTP; the source-based providers (`go`, `docker`, `git`)
//! produce a file directly.
//!
//! The registry is built explicitly at program start and passed by
//! reference to dispatch; there is no global registration.

pub mod asset;
pub mod docker;
pub mod git;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod goinstall;

use std::io;

use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::gitcache::CacheError;
use crate::refspec::Ref;

/// A single downloadable file in a release. Immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
  pub name: String,
  pub url: String,
  pub size: i64,
}

/// Release metadata from any host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
  pub version: String,
  pub assets: Vec<Asset>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("{what} not found")]
  NotFound { what: String },

  #[error("{host} API rate limited (set {token_var} for higher limits)")]
  RateLimited { host: String, token_var: &'static str },

  #[error("unauthorized against {host} (check {token_var})")]
  Unauthorized { host: String, token_var: &'static str },

  #[error("{host} API error {status}: {body}")]
  Api { host: String, status: u16, body: String },

  #[error(transparent)]
  Network(#[from] reqwest::Error),

  #[error("decoding {host} response: {source}")]
  Decode {
    host: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("no matching asset for {os}/{arch} among {total} asset(s){}", filter_hint(.filter))]
  NoAsset {
    os: String,
    arch: String,
    total: usize,
    filter: Option<String>,
  },

  #[error("ambiguous assets (equal score): {}", .candidates.join(", "))]
  AmbiguousAsset { candidates: Vec<String> },

  #[error("invalid asset filter {pattern:?}: {source}")]
  InvalidFilter {
    pattern: String,
    #[source]
    source: globset::Error,
  },

  #[error("no provider matched ref {ref_:?}")]
  NoProvider { ref_: String },

  #[error("{provider} provider does not enumerate releases")]
  NotReleaseBased { provider: &'static str },

  #[error("{tool} not found on PATH (required for {context})")]
  ToolMissing { tool: String, context: &'static str },

  #[error("{context} failed: {detail}")]
  Command { context: String, detail: String },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Cancelled(#[from] Cancelled),
}

fn filter_hint(filter: &Option<String>) -> String {
  match filter {
    Some(pattern) => format!(" (filter {:?})", pattern),
    None => String::new(),
  }
}

/// Thin HTTP surface shared by the release-based providers.
#[derive(Debug, Clone)]
pub struct Http {
  client: reqwest::Client,
}

impl Default for Http {
  fn default() -> Self {
    Self::new()
  }
}

impl Http {
  pub fn new() -> Self {
    let client = reqwest::Client::builder()
      .user_agent(concat!("b/", env!("CARGO_PKG_VERSION")))
      .build()
      .unwrap_or_default();
    Http { client }
  }

  pub async fn get(&self, url: &str, headers: &[(&'static str, String)]) -> Result<reqwest::Response, reqwest::Error> {
    let mut req = self.client.get(url);
    for (name, value) in headers {
      req = req.header(*name, value);
    }
    req.send().await
  }
}

/// Read a provider token from the environment, treating empty as unset.
pub(crate) fn env_token(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// The providers, in registration order. `detect` returns the first match.
#[derive(Debug)]
pub enum Provider {
  Git(git::GitProvider),
  Go(goinstall::GoProvider),
  Docker(docker::DockerProvider),
  Github(github::Github),
  Gitlab(gitlab::Gitlab),
  Gitea(gitea::Gitea),
}

impl Provider {
  pub fn name(&self) -> &'static str {
    match self {
      Provider::Git(_) => "git",
      Provider::Go(_) => "go",
      Provider::Docker(_) => "docker",
      Provider::Github(_) => "github",
      Provider::Gitlab(_) => "gitlab",
      Provider::Gitea(_) => "gitea",
    }
  }

  pub fn matches(&self, r: &Ref) -> bool {
    match self {
      Provider::Git(p) => p.matches(r),
      Provider::Go(p) => p.matches(r),
      Provider::Docker(p) => p.matches(r),
      Provider::Github(p) => p.matches(r),
      Provider::Gitlab(p) => p.matches(r),
      Provider::Gitea(p) => p.matches(r),
    }
  }

  /// Release-based providers enumerate assets; source-based ones install
  /// directly.
  pub fn is_release_based(&self) -> bool {
    matches!(self, Provider::Github(_) | Provider::Gitlab(_) | Provider::Gitea(_))
  }

  pub async fn latest_version(&self, http: &Http, r: &Ref, cancel: &CancelToken) -> Result<String, ProviderError> {
    cancel.check()?;
    match self {
      Provider::Github(p) => p.latest_version(http, r).await,
      Provider::Gitlab(p) => p.latest_version(http, r).await,
      Provider::Gitea(p) => p.latest_version(http, r).await,
      // Source-based providers treat "latest" as the version itself; git
      // resolves HEAD at install time.
      Provider::Go(_) | Provider::Docker(_) => Ok("latest".to_string()),
      Provider::Git(_) => Ok("HEAD".to_string()),
    }
  }

  pub async fn fetch_release(
    &self,
    http: &Http,
    r: &Ref,
    version: &str,
    cancel: &CancelToken,
  ) -> Result<Release, ProviderError> {
    cancel.check()?;
    match self {
      Provider::Github(p) => p.fetch_release(http, r, version).await,
      Provider::Gitlab(p) => p.fetch_release(http, r, version).await,
      Provider::Gitea(p) => p.fetch_release(http, r, version).await,
      other => Err(ProviderError::NotReleaseBased { provider: other.name() }),
    }
  }
}

/// Explicit provider registry.
#[derive(Debug)]
pub struct Registry {
  providers: Vec<Provider>,
}

impl Default for Registry {
  fn default() -> Self {
    Self::standard()
  }
}

impl Registry {
  /// The standard provider set: `git`, `go`, `docker`, `github`, `gitlab`,
  /// `gitea`.
  pub fn standard() -> Self {
    Registry {
      providers: vec![
        Provider::Git(git::GitProvider),
        Provider::Go(goinstall::GoProvider),
        Provider::Docker(docker::DockerProvider),
        Provider::Github(github::Github),
        Provider::Gitlab(gitlab::Gitlab),
        Provider::Gitea(gitea::Gitea),
      ],
    }
  }

  /// First provider matching the ref, in registration order.
  pub fn detect(&self, r: &Ref) -> Result<&Provider, ProviderError> {
    self
      .providers
      .iter()
      .find(|p| p.matches(r))
      .ok_or_else(|| ProviderError::NoProvider { ref_: r.to_string() })
  }
}
