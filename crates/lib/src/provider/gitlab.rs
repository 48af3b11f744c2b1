//! GitLab release provider.
//!
//! Matches `gitlab.com/...` refs. Uses the v4 REST API with the project
//! path percent-encoded into a single path segment.

use serde::Deserialize;

use super::{Asset, Http, ProviderError, Release, env_token};
use crate::refspec::Ref;

const TOKEN_VAR: &str = "GITLAB_TOKEN";

#[derive(Debug, Default)]
pub struct Gitlab;

impl Gitlab {
  pub fn matches(&self, r: &Ref) -> bool {
    r.scheme.is_none() && r.host_path.starts_with("gitlab.com/")
  }

  fn project_path(r: &Ref) -> &str {
    r.host_path.strip_prefix("gitlab.com/").unwrap_or(&r.host_path)
  }

  fn auth_headers() -> Vec<(&'static str, String)> {
    match env_token(TOKEN_VAR) {
      Some(token) => vec![("PRIVATE-TOKEN", token)],
      None => Vec::new(),
    }
  }

  pub async fn latest_version(&self, http: &Http, r: &Ref) -> Result<String, ProviderError> {
    let project = Self::project_path(r);
    let url = format!(
      "https://gitlab.com/api/v4/projects/{}/releases?per_page=1",
      path_escape(project)
    );

    let resp = http.get(&url, &Self::auth_headers()).await?;
    let status = resp.status().as_u16();
    if status != 200 {
      return Err(api_error(status, resp.text().await.unwrap_or_default()));
    }

    let body = resp.bytes().await?;
    let releases: Vec<GlReleaseSummary> = serde_json::from_slice(&body).map_err(|source| ProviderError::Decode {
      host: "GitLab".to_string(),
      source,
    })?;

    releases
      .into_iter()
      .next()
      .map(|r| r.tag_name)
      .ok_or_else(|| ProviderError::NotFound {
        what: format!("releases for {}", project),
      })
  }

  pub async fn fetch_release(&self, http: &Http, r: &Ref, version: &str) -> Result<Release, ProviderError> {
    let project = Self::project_path(r);
    let version = if version.is_empty() {
      self.latest_version(http, r).await?
    } else {
      version.to_string()
    };

    let url = format!(
      "https://gitlab.com/api/v4/projects/{}/releases/{}",
      path_escape(project),
      path_escape(&version)
    );

    let resp = http.get(&url, &Self::auth_headers()).await?;
    match resp.status().as_u16() {
      200 => {}
      404 => {
        return Err(ProviderError::NotFound {
          what: format!("release {} for {}", version, project),
        });
      }
      401 => {
        return Err(ProviderError::Unauthorized {
          host: "GitLab".to_string(),
          token_var: TOKEN_VAR,
        });
      }
      status => return Err(api_error(status, resp.text().await.unwrap_or_default())),
    }

    let body = resp.bytes().await?;
    release_from_json(&body)
  }
}

fn api_error(status: u16, body: String) -> ProviderError {
  match status {
    403 | 429 => ProviderError::RateLimited {
      host: "GitLab".to_string(),
      token_var: TOKEN_VAR,
    },
    _ => ProviderError::Api {
      host: "GitLab".to_string(),
      status,
      body,
    },
  }
}

/// Percent-encode a string into a single URL path segment. RFC 3986
/// unreserved characters pass through; everything else, notably `/`, is
/// escaped.
fn path_escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for byte in s.bytes() {
    match byte {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
      _ => out.push_str(&format!("%{:02X}", byte)),
    }
  }
  out
}

#[derive(Debug, Deserialize)]
struct GlReleaseSummary {
  tag_name: String,
}

#[derive(Debug, Deserialize)]
struct GlRelease {
  tag_name: String,
  #[serde(default)]
  assets: GlAssets,
}

#[derive(Debug, Default, Deserialize)]
struct GlAssets {
  #[serde(default)]
  links: Vec<GlLink>,
}

#[derive(Debug, Deserialize)]
struct GlLink {
  name: String,
  direct_asset_url: String,
}

pub(crate) fn release_from_json(data: &[u8]) -> Result<Release, ProviderError> {
  let gl: GlRelease = serde_json::from_slice(data).map_err(|source| ProviderError::Decode {
    host: "GitLab".to_string(),
    source,
  })?;
  Ok(Release {
    version: gl.tag_name,
    assets: gl
      .assets
      .links
      .into_iter()
      .map(|l| Asset {
        name: l.name,
        url: l.direct_asset_url,
        size: 0,
      })
      .collect(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_only_gitlab() {
    let gl = Gitlab;
    assert!(gl.matches(&Ref::parse("gitlab.com/group/project")));
    assert!(gl.matches(&Ref::parse("gitlab.com/group/sub/project@v1")));
    assert!(!gl.matches(&Ref::parse("github.com/org/repo")));
    assert!(!gl.matches(&Ref::parse("go://gitlab.com/a/b")));
  }

  #[test]
  fn project_path_escapes_slashes() {
    assert_eq!(path_escape("group/sub/project"), "group%2Fsub%2Fproject");
    assert_eq!(path_escape("v1.2.3"), "v1.2.3");
    assert_eq!(path_escape("a b"), "a%20b");
  }

  #[test]
  fn decode_release_links() {
    let json = br#"{
      "tag_name": "v2.0.0",
      "assets": {
        "links": [
          { "name": "tool-linux-amd64.tar.gz", "direct_asset_url": "https://gitlab.com/dl/1" }
        ],
        "sources": [ { "format": "zip", "url": "https://gitlab.com/src.zip" } ]
      }
    }"#;
    let release = release_from_json(json).unwrap();
    assert_eq!(release.version, "v2.0.0");
    assert_eq!(release.assets.len(), 1);
    assert_eq!(release.assets[0].url, "https://gitlab.com/dl/1");
  }
}
