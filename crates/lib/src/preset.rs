//! Built-in presets: declarative recipes for well-known binaries.
//!
//! A preset names a release source, an asset-name template, and a recipe
//! for extracting the installed binary's version from its own output. The
//! templates use `{name}`, `{version}`, `{version_nov}` (version without a
//! leading `v`), `{os}`, `{os_title}`, and `{arch}` placeholders; OS and
//! architecture use go-style names (`linux`, `darwin`, `amd64`, …) since
//! that is what release assets are named after.

use crate::process::CmdOutput;

/// Where a preset's latest version comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
  /// Follow the `releases/latest` redirect of the preset's GitHub repo.
  GithubLatest,
  /// Fetch a URL whose body is the version string.
  UrlBody(&'static str),
}

/// Recipe for reading the locally installed binary's version.
///
/// Runs the binary with `args` and takes whitespace-separated `field` of
/// `line` from stdout. A lenient probe accepts output from a non-zero exit
/// as long as stdout still starts with a version-like token (some tools
/// exit non-zero for environmental reasons while printing their version).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionProbe {
  pub args: &'static [&'static str],
  pub line: usize,
  pub field: usize,
  /// Strip this prefix from the token (e.g. `"jq-"`).
  pub strip_prefix: Option<&'static str>,
  /// Prepend `v` when the token lacks it, to align with release tags.
  pub ensure_v: bool,
  pub lenient: bool,
}

impl VersionProbe {
  /// Extract the version from a probe run, or `None` when unreadable.
  pub fn extract(&self, output: &CmdOutput) -> Option<String> {
    let stdout = output.stdout_str();
    if !output.success() && !(self.lenient && starts_version_like(stdout.trim_start())) {
      return None;
    }

    let token = stdout
      .lines()
      .nth(self.line)?
      .split_whitespace()
      .nth(self.field)?
      .to_string();

    let mut version = match self.strip_prefix {
      Some(prefix) => token.strip_prefix(prefix).unwrap_or(&token).to_string(),
      None => token,
    };
    if self.ensure_v && !version.starts_with('v') {
      version = format!("v{}", version);
    }
    Some(version)
  }
}

fn starts_version_like(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some('v') => chars.next().is_some_and(|c| c.is_ascii_digit()),
    Some(c) => c.is_ascii_digit(),
    None => false,
  }
}

/// A built-in binary recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresetDef {
  pub name: &'static str,
  /// GitHub `owner/repo`; empty for URL-only presets.
  pub repo: &'static str,
  /// Asset filename template.
  pub asset: &'static str,
  /// Download URL template overriding the GitHub release download URL.
  pub url: Option<&'static str>,
  pub version: VersionSource,
  pub probe: Option<VersionProbe>,
}

impl PresetDef {
  /// Render the asset filename for a concrete version and platform.
  pub fn asset_name(&self, version: &str, os: &str, arch: &str) -> String {
    render(self.asset, self.name, version, os, arch)
  }

  /// Full download URL for a concrete version and platform.
  pub fn download_url(&self, version: &str, os: &str, arch: &str) -> String {
    match self.url {
      Some(template) => render(template, self.name, version, os, arch),
      None => format!(
        "https://github.com/{}/releases/download/{}/{}",
        self.repo,
        version,
        self.asset_name(version, os, arch)
      ),
    }
  }

  /// The `source` string recorded in the lockfile.
  pub fn source(&self) -> String {
    if self.repo.is_empty() {
      self.name.to_string()
    } else {
      format!("github.com/{}", self.repo)
    }
  }
}

fn title_case(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

fn render(template: &str, name: &str, version: &str, os: &str, arch: &str) -> String {
  template
    .replace("{name}", name)
    .replace("{version_nov}", version.strip_prefix('v').unwrap_or(version))
    .replace("{version}", version)
    .replace("{os_title}", &title_case(os))
    .replace("{os}", os)
    .replace("{arch}", arch)
}

const PROBE_FIRST_WORD: VersionProbe = VersionProbe {
  args: &["--version"],
  line: 0,
  field: 0,
  strip_prefix: None,
  ensure_v: false,
  lenient: false,
};

/// The built-in preset table, sorted by name.
pub const PRESETS: &[PresetDef] = &[
  PresetDef {
    name: "clusterctl",
    repo: "kubernetes-sigs/cluster-api",
    asset: "clusterctl-{os}-{arch}",
    url: None,
    version: VersionSource::GithubLatest,
    // clusterctl can exit non-zero while still printing its version (it
    // tries to write a version state file on probe).
    probe: Some(VersionProbe {
      args: &["version", "-o", "short"],
      line: 0,
      field: 0,
      strip_prefix: None,
      ensure_v: false,
      lenient: true,
    }),
  },
  PresetDef {
    name: "hcloud",
    repo: "hetznercloud/cli",
    asset: "hcloud-{os}-{arch}.tar.gz",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["version"],
      line: 0,
      field: 1,
      strip_prefix: None,
      ensure_v: true,
      lenient: false,
    }),
  },
  PresetDef {
    name: "helm",
    repo: "helm/helm",
    asset: "helm-{version}-{os}-{arch}.tar.gz",
    url: Some("https://get.helm.sh/helm-{version}-{os}-{arch}.tar.gz"),
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["version", "--template", "{{.Version}}"],
      line: 0,
      field: 0,
      strip_prefix: None,
      ensure_v: false,
      lenient: false,
    }),
  },
  PresetDef {
    name: "jq",
    repo: "jqlang/jq",
    asset: "jq-{os}-{arch}",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["--version"],
      line: 0,
      field: 0,
      strip_prefix: Some("jq-"),
      ensure_v: false,
      lenient: false,
    }),
  },
  PresetDef {
    name: "k9s",
    repo: "derailed/k9s",
    asset: "k9s_{os_title}_{arch}.tar.gz",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["version", "-s"],
      line: 0,
      field: 1,
      strip_prefix: None,
      ensure_v: true,
      lenient: false,
    }),
  },
  PresetDef {
    name: "kubectl",
    repo: "",
    asset: "kubectl",
    url: Some("https://dl.k8s.io/release/{version}/bin/{os}/{arch}/kubectl"),
    version: VersionSource::UrlBody("https://dl.k8s.io/release/stable.txt"),
    probe: Some(VersionProbe {
      args: &["version", "--client", "--output=json"],
      line: 0,
      field: 0,
      strip_prefix: None,
      ensure_v: false,
      lenient: false,
    }),
  },
  PresetDef {
    name: "kubeseal",
    repo: "bitnami-labs/sealed-secrets",
    asset: "kubeseal-{version_nov}-{os}-{arch}.tar.gz",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(PROBE_FIRST_WORD),
  },
  PresetDef {
    name: "mkcert",
    repo: "FiloSottile/mkcert",
    asset: "mkcert-{version}-{os}-{arch}",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["-version"],
      line: 0,
      field: 0,
      strip_prefix: None,
      ensure_v: false,
      lenient: false,
    }),
  },
  PresetDef {
    name: "sops",
    repo: "getsops/sops",
    asset: "sops-{version}.{os}.{arch}",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["--version"],
      line: 0,
      field: 1,
      strip_prefix: None,
      ensure_v: true,
      lenient: false,
    }),
  },
  PresetDef {
    name: "stern",
    repo: "stern/stern",
    asset: "stern_{version_nov}_{os}_{arch}.tar.gz",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["--version"],
      line: 0,
      field: 1,
      strip_prefix: None,
      ensure_v: true,
      lenient: false,
    }),
  },
  PresetDef {
    name: "yq",
    repo: "mikefarah/yq",
    asset: "yq_{os}_{arch}",
    url: None,
    version: VersionSource::GithubLatest,
    probe: Some(VersionProbe {
      args: &["--version"],
      line: 0,
      field: 3,
      strip_prefix: None,
      ensure_v: false,
      lenient: false,
    }),
  },
];

/// Look up a preset by name.
pub fn find(name: &str) -> Option<&'static PresetDef> {
  PRESETS.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn presets_sorted_and_unique() {
    let names: Vec<&str> = PRESETS.iter().map(|p| p.name).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(names, sorted);
  }

  #[test]
  fn find_known_preset() {
    assert_eq!(find("jq").unwrap().repo, "jqlang/jq");
    assert!(find("not-a-preset").is_none());
  }

  #[test]
  fn render_placeholders() {
    let def = find("stern").unwrap();
    assert_eq!(
      def.asset_name("v1.30.0", "linux", "amd64"),
      "stern_1.30.0_linux_amd64.tar.gz"
    );
    assert_eq!(
      def.download_url("v1.30.0", "linux", "amd64"),
      "https://github.com/stern/stern/releases/download/v1.30.0/stern_1.30.0_linux_amd64.tar.gz"
    );
  }

  #[test]
  fn render_os_title() {
    let def = find("k9s").unwrap();
    assert_eq!(def.asset_name("v0.32.5", "linux", "amd64"), "k9s_Linux_amd64.tar.gz");
  }

  #[test]
  fn url_template_overrides_github() {
    let def = find("kubectl").unwrap();
    assert_eq!(
      def.download_url("v1.30.2", "linux", "amd64"),
      "https://dl.k8s.io/release/v1.30.2/bin/linux/amd64/kubectl"
    );
    assert_eq!(def.source(), "kubectl");
  }

  #[test]
  fn probe_extracts_field() {
    let def = find("sops").unwrap();
    let probe = def.probe.unwrap();
    let output = CmdOutput {
      status: 0,
      stdout: b"sops 3.10.2 (latest)\n".to_vec(),
      stderr: Vec::new(),
    };
    assert_eq!(probe.extract(&output).as_deref(), Some("v3.10.2"));
  }

  #[test]
  fn probe_strips_prefix() {
    let probe = find("jq").unwrap().probe.unwrap();
    let output = CmdOutput {
      status: 0,
      stdout: b"jq-1.7.1\n".to_vec(),
      stderr: Vec::new(),
    };
    assert_eq!(probe.extract(&output).as_deref(), Some("1.7.1"));
  }

  #[test]
  fn strict_probe_rejects_failed_run() {
    let probe = find("jq").unwrap().probe.unwrap();
    let output = CmdOutput {
      status: 1,
      stdout: b"jq-1.7.1\n".to_vec(),
      stderr: Vec::new(),
    };
    assert_eq!(probe.extract(&output), None);
  }

  #[test]
  fn lenient_probe_accepts_versionish_stdout_on_failure() {
    let probe = find("clusterctl").unwrap().probe.unwrap();
    let failed = CmdOutput {
      status: 1,
      stdout: b"v1.7.2\n".to_vec(),
      stderr: b"unable to write version state file: permission denied\n".to_vec(),
    };
    assert_eq!(probe.extract(&failed).as_deref(), Some("v1.7.2"));

    let garbage = CmdOutput {
      status: 1,
      stdout: b"Error: something broke\n".to_vec(),
      stderr: Vec::new(),
    };
    assert_eq!(probe.extract(&garbage), None);
  }
}
