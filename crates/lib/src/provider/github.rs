//! GitHub release provider.
//!
//! Matches `github.com/owner/repo` and bare `owner/repo` (owner without
//! dots). The latest version is resolved through the HTTP redirect of
//! `/releases/latest`, which does not count against the API rate limit;
//! release assets come from the REST API.

use serde::Deserialize;

use super::{Asset, Http, ProviderError, Release, env_token};
use crate::refspec::Ref;

const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Default)]
pub struct Github;

impl Github {
  pub fn matches(&self, r: &Ref) -> bool {
    if r.scheme.is_some() {
      return false;
    }
    if let Some(rest) = r.host_path.strip_prefix("github.com/") {
      let mut parts = rest.splitn(3, '/');
      return matches!((parts.next(), parts.next()), (Some(o), Some(p)) if !o.is_empty() && !p.is_empty());
    }
    // Bare owner/repo: owner must not look like a host name.
    let parts: Vec<&str> = r.host_path.splitn(3, '/').collect();
    parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() && !parts[0].contains('.')
  }

  fn owner_repo(r: &Ref) -> (String, String) {
    let rest = r.host_path.strip_prefix("github.com/").unwrap_or(&r.host_path);
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().unwrap_or_default().to_string();
    let repo = parts.next().unwrap_or_default().to_string();
    (owner, repo)
  }

  pub async fn latest_version(&self, http: &Http, r: &Ref) -> Result<String, ProviderError> {
    let (owner, repo) = Self::owner_repo(r);
    let url = format!("https://github.com/{}/{}/releases/latest", owner, repo);

    let resp = http.get(&url, &[]).await?;
    if resp.status().as_u16() == 404 {
      return Err(ProviderError::NotFound {
        what: format!("releases for {}/{}", owner, repo),
      });
    }

    // The redirect target ends in the tag name.
    let final_path = resp.url().path().to_string();
    match final_path.rsplit('/').next() {
      Some(tag) if !tag.is_empty() && tag != "latest" => Ok(tag.to_string()),
      _ => Err(ProviderError::NotFound {
        what: format!("releases for {}/{}", owner, repo),
      }),
    }
  }

  pub async fn fetch_release(&self, http: &Http, r: &Ref, version: &str) -> Result<Release, ProviderError> {
    let (owner, repo) = Self::owner_repo(r);
    let version = if version.is_empty() {
      self.latest_version(http, r).await?
    } else {
      version.to_string()
    };

    let url = format!(
      "https://api.github.com/repos/{}/{}/releases/tags/{}",
      owner, repo, version
    );
    let mut headers = vec![("Accept", "application/vnd.github+json".to_string())];
    if let Some(token) = env_token(TOKEN_VAR) {
      headers.push(("Authorization", format!("Bearer {}", token)));
    }

    let resp = http.get(&url, &headers).await?;
    match resp.status().as_u16() {
      200 => {}
      404 => {
        return Err(ProviderError::NotFound {
          what: format!("release {} for {}/{}", version, owner, repo),
        });
      }
      403 | 429 => {
        return Err(ProviderError::RateLimited {
          host: "GitHub".to_string(),
          token_var: TOKEN_VAR,
        });
      }
      401 => {
        return Err(ProviderError::Unauthorized {
          host: "GitHub".to_string(),
          token_var: TOKEN_VAR,
        });
      }
      status => {
        return Err(ProviderError::Api {
          host: "GitHub".to_string(),
          status,
          body: resp.text().await.unwrap_or_default(),
        });
      }
    }

    let body = resp.bytes().await?;
    release_from_json(&body)
  }
}

#[derive(Debug, Deserialize)]
struct GhRelease {
  tag_name: String,
  #[serde(default)]
  assets: Vec<GhAsset>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
  name: String,
  browser_download_url: String,
  #[serde(default)]
  size: i64,
}

pub(crate) fn release_from_json(data: &[u8]) -> Result<Release, ProviderError> {
  let gh: GhRelease = serde_json::from_slice(data).map_err(|source| ProviderError::Decode {
    host: "GitHub".to_string(),
    source,
  })?;
  Ok(Release {
    version: gh.tag_name,
    assets: gh
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
