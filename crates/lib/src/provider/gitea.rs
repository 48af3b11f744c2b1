//! Gitea/Forgejo release provider (Codeberg and gitea.com).

use serde::Deserialize;

use super::{Asset, Http, ProviderError, Release, env_token};
use crate::refspec::Ref;

const TOKEN_VAR: &str = "GITEA_TOKEN";

/// Known Gitea/Forgejo instances.
const KNOWN_HOSTS: &[&str] = &["codeberg.org", "gitea.com"];

#[derive(Debug, Default)]
pub struct Gitea;

impl Gitea {
  pub fn matches(&self, r: &Ref) -> bool {
    r.scheme.is_none()
      && KNOWN_HOSTS
        .iter()
        .any(|host| r.host_path.strip_prefix(host).is_some_and(|rest| rest.starts_with('/')))
  }

  /// `(host, owner, repo)` for a matching ref.
  fn parts(r: &Ref) -> Option<(&'static str, String, String)> {
    for host in KNOWN_HOSTS.iter().copied() {
      if let Some(rest) = r.host_path.strip_prefix(&format!("{}/", host)) {
        let mut segments = rest.splitn(3, '/');
        if let (Some(owner), Some(repo)) = (segments.next(), segments.next()) {
          return Some((host, owner.to_string(), repo.to_string()));
        }
      }
    }
    None
  }

  fn auth_headers() -> Vec<(&'static str, String)> {
    match env_token(TOKEN_VAR) {
      Some(token) => vec![("Authorization", format!("token {}", token))],
      None => Vec::new(),
    }
  }

  pub async fn latest_version(&self, http: &Http, r: &Ref) -> Result<String, ProviderError> {
    let (host, owner, repo) = Self::parts(r).ok_or_else(|| ProviderError::NotFound {
      what: format!("gitea repo in {:?}", r.host_path),
    })?;
    let url = format!("https://{}/api/v1/repos/{}/{}/releases?limit=1", host, owner, repo);

    let resp = http.get(&url, &Self::auth_headers()).await?;
    let status = resp.status().as_u16();
    if status != 200 {
      return Err(api_error(host, status, resp.text().await.unwrap_or_default()));
    }

    let body = resp.bytes().await?;
    let releases: Vec<GtReleaseSummary> = serde_json::from_slice(&body).map_err(|source| ProviderError::Decode {
      host: host.to_string(),
      source,
    })?;

    releases
      .into_iter()
      .next()
      .map(|r| r.tag_name)
      .ok_or_else(|| ProviderError::NotFound {
        what: format!("releases for {}/{} on {}", owner, repo, host),
      })
  }

  pub async fn fetch_release(&self, http: &Http, r: &Ref, version: &str) -> Result<Release, ProviderError> {
    let (host, owner, repo) = Self::parts(r).ok_or_else(|| ProviderError::NotFound {
      what: format!("gitea repo in {:?}", r.host_path),
    })?;
    let version = if version.is_empty() {
      self.latest_version(http, r).await?
    } else {
      version.to_string()
    };

    let url = format!(
      "https://{}/api/v1/repos/{}/{}/releases/tags/{}",
      host, owner, repo, version
    );

    let resp = http.get(&url, &Self::auth_headers()).await?;
    match resp.status().as_u16() {
      200 => {}
      404 => {
        return Err(ProviderError::NotFound {
          what: format!("release {} for {}/{} on {}", version, owner, repo, host),
        });
      }
      401 => {
        return Err(ProviderError::Unauthorized {
          host: host.to_string(),
          token_var: TOKEN_VAR,
        });
      }
      status => return Err(api_error(host, status, resp.text().await.unwrap_or_default())),
    }

    let body = resp.bytes().await?;
    release_from_json(host, &body)
  }
}

fn api_error(host: &str, status: u16, body: String) -> ProviderError {
  match status {
    403 | 429 => ProviderError::RateLimited {
      host: host.to_string(),
      token_var: TOKEN_VAR,
    },
    _ => ProviderError::Api {
      host: host.to_string(),
      status,
      body,
    },
  }
}

#[derive(Debug, Deserialize)]
struct GtReleaseSummary {
  tag_name: String,
}

#[derive(Debug, Deserialize)]
struct GtRelease {
  tag_name: String,
  #[serde(default)]
  assets: Vec<GtAsset>,
}

#[derive(Debug, Deserialize)]
struct GtAsset {
  name: String,
  browser_download_url: String,
  #[serde(default)]
  size: i64,
}

pub(crate) fn release_from_json(host: &str, data: &[u8]) -> Result<Release, ProviderError> {
  let gt: GtRelease = serde_json::from_slice(data).map_err(|source| ProviderError::Decode {
    host: host.to_string(),
    source,
  })?;
  Ok(Release {
    version: gt.tag_name,
    assets: gt
      .assets
      .into_iter()
      .map(|a| Asset {
        name: a.name,
        url: a.browser_download_url,
        size: a.size,
      })
      .collect(),
  })
}
