//! Interactive prompts: per-file conflict resolution and asset tie-breaks.
//!
//! Prompts write to stderr and read one line from stdin. The engine
//! serializes resolver calls, so a prompt never interleaves with another
//! worker's prompt.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::Command;

use b_lib::envsync::ConflictResolver;
use b_lib::lock::sha256_bytes;
use b_lib::manifest::Strategy;
use b_lib::provider::asset::{AssetPicker, Scored};
use b_lib::refspec::clone_url;

pub fn stdout_is_tty() -> bool {
  io::stdout().is_terminal()
}

fn read_choice() -> Option<String> {
  let mut input = String::new();
  io::stdin().lock().read_line(&mut input).ok()?;
  Some(input.trim().to_ascii_lowercase())
}

/// Prompts `[r]eplace [k]eep [m]erge [d]iff` for each drifted file.
pub struct ConflictPrompt {
  ref_bases: Vec<String>,
  workspace: PathBuf,
  cache_root: PathBuf,
}

impl ConflictPrompt {
  pub fn new(ref_bases: Vec<String>, workspace: PathBuf, cache_root: PathBuf) -> Self {
    ConflictPrompt {
      ref_bases,
      workspace,
      cache_root,
    }
  }

  /// Best-effort unified diff of the local file against upstream HEAD,
  /// using the host git directly. The source path is looked up in every
  /// configured env repo; the first hit wins.
  fn show_diff(&self, source_path: &str, dest_path: &str) {
    let local = self.workspace.join(dest_path);

    let run = |args: &[&str]| -> Option<String> {
      let output = Command::new("git").args(args).output().ok()?;
      if !output.status.success() {
        return None;
      }
      Some(String::from_utf8_lossy(&output.stdout).into_owned())
    };

    let Some(upstream) = self.ref_bases.iter().find_map(|ref_base| {
      let cache_dir = self.cache_root.join(sha256_bytes(ref_base.as_bytes()));
      if !cache_dir.exists() {
        return None;
      }
      let dir = cache_dir.to_string_lossy().into_owned();
      let head = run(&["ls-remote", &clone_url(ref_base), "HEAD"])
        .and_then(|out| out.split_whitespace().next().map(str::to_string))?;
      let _ = run(&["-C", &dir, "fetch", "--depth", "1", "origin", &head]);
      run(&["-C", &dir, "show", &format!("{}:{}", head, source_path)])
    }) else {
      eprintln!("      cannot read upstream file for diff");
      return;
    };

    let tmp = std::env::temp_dir().join(format!("b-diff-{}", std::process::id()));
    if std::fs::write(&tmp, upstream.as_bytes()).is_err() {
      return;
    }
    // diff --no-index exits 1 on differences; capture output regardless.
    let local_arg = local.to_string_lossy();
    let tmp_arg = tmp.to_string_lossy();
    let args: [&str; 8] = [
      "diff",
      "--no-index",
      "--label",
      "local",
      "--label",
      "upstream",
      &local_arg,
      &tmp_arg,
    ];
    let output = Command::new("git").args(args).output();
    let _ = std::fs::remove_file(&tmp);

    match output {
      Ok(out) if out.stdout.is_empty() => eprintln!("      (no differences)"),
      Ok(out) => eprintln!("{}", String::from_utf8_lossy(&out.stdout)),
      Err(e) => eprintln!("      error computing diff: {}", e),
    }
  }
}

impl ConflictResolver for ConflictPrompt {
  fn resolve(&self, source_path: &str, dest_path: &str) -> Strategy {
    loop {
      eprintln!("    {} has local changes.", dest_path);
      eprint!("      [r]eplace  [k]eep  [m]erge  [d]iff > ");
      let _ = io::stderr().flush();

      let Some(choice) = read_choice() else {
        return Strategy::Replace;
      };

      match choice.as_str() {
        "r" | "replace" => return Strategy::Replace,
        "k" | "keep" => return Strategy::Client,
        "m" | "merge" => return Strategy::Merge,
        "d" | "diff" => {
          self.show_diff(source_path, dest_path);
          continue;
        }
        _ => {
          eprintln!("      Invalid choice. Try r, k, m, or d.");
          continue;
        }
      }
    }
  }
}

/// Prompts to pick one of several equally scored release assets.
pub struct AssetPrompt;

impl AssetPicker for AssetPrompt {
  fn pick(&self, candidates: &[Scored]) -> Option<usize> {
    if !stdout_is_tty() {
      return None;
    }

    eprintln!("  Multiple assets match:");
    for (i, scored) in candidates.iter().enumerate() {
      eprintln!("    [{}] {}", i + 1, scored.asset.name);
    }
    eprint!("  Pick one (empty to take the first) > ");
    let _ = io::stderr().flush();

    let choice = read_choice()?;
    if choice.is_empty() {
      return None;
    }
    choice
      .parse::<usize>()
      .ok()
      .filter(|n| (1..=candidates.len()).contains(n))
      .map(|n| n - 1)
  }
}
