//! Terminal output helpers: status glyphs, colors, byte formatting.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const KEPT: &str = "⊘";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message
  );
}

/// First 12 characters of a commit SHA, or `"-"` when empty.
pub fn short_commit(commit: &str) -> &str {
  if commit.is_empty() {
    return "-";
  }
  &commit[..commit.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;
  const GB: u64 = MB * 1024;

  if bytes >= GB {
    format!("{:.1} GB", bytes as f64 / GB as f64)
  } else if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

/// Render one synced file's status line.
pub fn file_status_line(dest: &str, status: &str) -> String {
  let glyph = match status {
    "kept" => symbols::KEPT,
    "merged" => symbols::SUCCESS,
    "conflict" => symbols::ERROR,
    s if s.contains("overwritten") || s.contains("merge failed") => symbols::WARNING,
    _ => symbols::SUCCESS,
  };
  format!("    {} {:<40} {} {}", symbols::ARROW, dest, glyph, status)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_commit_truncates() {
    let sha = "0123456789abcdef0123456789abcdef01234567";
    assert_eq!(short_commit(sha), "0123456789ab");
    assert_eq!(short_commit("abc"), "abc");
    assert_eq!(short_commit(""), "-");
  }

  #[test]
  fn bytes_humanized() {
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(2048), "2.0 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
  }

  #[test]
  fn status_lines_pick_glyphs() {
    assert!(file_status_line("a.yaml", "kept").contains(symbols::KEPT));
    assert!(file_status_line("a.yaml", "conflict").contains(symbols::ERROR));
    assert!(file_status_line("a.yaml", "replaced (local changes overwritten)").contains(symbols::WARNING));
  }
}
