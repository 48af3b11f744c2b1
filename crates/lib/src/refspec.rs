//! Ref parsing.
//!
//! A ref is an opaque identifier for an external artifact:
//!
//! ```text
//! [scheme "://"] host-path [":" file-path] ["@" version] ["#" label]
//! ```
//!
//! Examples:
//! - `github.com/derailed/k9s@v0.32.5`
//! - `go://github.com/jrhouston/tfk8s`
//! - `docker://hashicorp/terraform`
//! - `git://github.com/org/repo:scripts/tool.sh@main`
//! - `github.com/org/infra#monitoring`
//!
//! Parsing is total: any string yields a `Ref`, possibly with empty parts.

use std::fmt;

/// Known URL schemes. Anything else is carried in the host path verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
  Go,
  Docker,
  Git,
}

impl Scheme {
  fn strip(s: &str) -> (Option<Scheme>, &str) {
    for (prefix, scheme) in [
      ("go://", Scheme::Go),
      ("docker://", Scheme::Docker),
      ("git://", Scheme::Git),
    ] {
      if let Some(rest) = s.strip_prefix(prefix) {
        return (Some(scheme), rest);
      }
    }
    (None, s)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Scheme::Go => "go",
      Scheme::Docker => "docker",
      Scheme::Git => "git",
    }
  }
}

/// A parsed artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
  /// Optional scheme (`go`, `docker`, `git`).
  pub scheme: Option<Scheme>,
  /// Host path: `github.com/owner/repo`, an absolute filesystem path, or a
  /// module path. Never contains version, label, or file path.
  pub host_path: String,
  /// Repo-relative file path (`git://` refs only).
  pub file_path: Option<String>,
  /// Version after the last `@`, if any.
  pub version: Option<String>,
  /// Fragment label after the first `#`, if any.
  pub label: Option<String>,
}

impl Ref {
  /// Parse a ref string. Never fails.
  pub fn parse(raw: &str) -> Ref {
    let mut s = raw;

    // The fragment label is everything after the first `#`. A version given
    // after the label (`repo#label@v1`) still belongs to the ref.
    let mut label = None;
    let mut version = None;
    if let Some(i) = s.find('#') {
      let mut frag = &s[i + 1..];
      if let Some(j) = frag.rfind('@') {
        version = Some(frag[j + 1..].to_string());
        frag = &frag[..j];
      }
      label = Some(frag.to_string());
      s = &s[..i];
    }

    // The last `@` splits off the version. An `@` at position 0 is part of
    // the path, not a version separator.
    if version.is_none()
      && let Some(i) = s.rfind('@')
      && i > 0
    {
      version = Some(s[i + 1..].to_string());
      s = &s[..i];
    }

    let (scheme, rest) = Scheme::strip(s);

    // Only git refs carry a repo-relative file path after the last
    // non-scheme colon.
    let (host_path, file_path) = if scheme == Some(Scheme::Git) {
      match rest.rfind(':') {
        Some(i) => (rest[..i].to_string(), Some(rest[i + 1..].to_string())),
        None => (rest.to_string(), None),
      }
    } else {
      (rest.to_string(), None)
    };

    Ref {
      scheme,
      host_path,
      file_path,
      version,
      label,
    }
  }

  /// The ref with version and label stripped: scheme, host path, and file
  /// path intact. This is the identity used for lock entries and cache keys.
  pub fn base(&self) -> String {
    let mut out = String::new();
    if let Some(scheme) = self.scheme {
      out.push_str(scheme.as_str());
      out.push_str("://");
    }
    out.push_str(&self.host_path);
    if let Some(file) = &self.file_path {
      out.push(':');
      out.push_str(file);
    }
    out
  }

  /// The host path without any scheme: the repo identity used by the git
  /// cache (`github.com/org/repo`).
  pub fn repo(&self) -> &str {
    &self.host_path
  }

  /// Version, or the empty string.
  pub fn version_str(&self) -> &str {
    self.version.as_deref().unwrap_or("")
  }

  /// Label, or the empty string.
  pub fn label_str(&self) -> &str {
    self.label.as_deref().unwrap_or("")
  }

  /// Derive the binary name installed for this ref.
  ///
  /// `git://` refs name the binary after the file path's basename; all
  /// other refs use the last host-path segment with any docker-style
  /// `:tag` removed.
  pub fn binary_name(&self) -> String {
    if let Some(file) = &self.file_path {
      return file.rsplit('/').next().unwrap_or(file).to_string();
    }
    let mut last = self.host_path.rsplit('/').next().unwrap_or(&self.host_path);
    if let Some(i) = last.rfind(':') {
      last = &last[..i];
    }
    last.to_string()
  }

  /// True for host paths that are absolute filesystem paths (local git
  /// repos).
  pub fn is_local_path(&self) -> bool {
    self.host_path.starts_with('/')
  }
}

impl fmt::Display for Ref {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.base())?;
    if let Some(v) = &self.version {
      write!(f, "@{}", v)?;
    }
    if let Some(l) = &self.label {
      write!(f, "#{}", l)?;
    }
    Ok(())
  }
}

/// Returns true if the string looks like a provider ref (contains `/` or a
/// scheme) rather than a bare preset name.
pub fn is_provider_ref(s: &str) -> bool {
  s.contains("://") || s.contains('/')
}

/// Clone URL for a repo ref: `https://<repo>.git`.
pub fn clone_url(repo: &str) -> String {
  format!("https://{}.git", repo)
}
