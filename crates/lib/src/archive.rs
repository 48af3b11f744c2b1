//! Archive extraction: pull one executable out of a release archive.
//!
//! Member selection policy:
//! 1. exact basename match against the expected binary name,
//! 2. else the single executable entry,
//! 3. else the largest executable entry (zip considers all files, since
//!    its mode bits are unreliable),
//! 4. else fail.
//!
//! Entries named with `..` segments or absolute paths are rejected.

use std::io::{Cursor, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::debug;
use xz2::read::XzDecoder;
use zip::ZipArchive;

/// Archive format derived from the asset filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  TarGz,
  TarXz,
  TarBz2,
  Zip,
  /// A raw binary, no unpacking needed.
  None,
}

impl ArchiveKind {
  pub fn from_name(name: &str) -> ArchiveKind {
    let lower = name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
      ArchiveKind::TarGz
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
      ArchiveKind::TarXz
    } else if lower.ends_with(".tar.bz2") {
      ArchiveKind::TarBz2
    } else if lower.ends_with(".zip") {
      ArchiveKind::Zip
    } else {
      ArchiveKind::None
    }
  }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("no executable found in archive for {name:?}")]
  NoExecutable { name: String },

  #[error("archive entry escapes the target: {entry:?}")]
  Traversal { entry: String },

  #[error("failed to read archive: {0}")]
  Unpack(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

struct Candidate {
  name: String,
  data: Vec<u8>,
}

fn basename(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

fn is_suspicious(path: &str) -> bool {
  path.starts_with('/') || path.split('/').any(|seg| seg == "..")
}

fn choose(mut candidates: Vec<Candidate>, name_match: Option<usize>, expect: &str) -> Result<Candidate, ArchiveError> {
  if let Some(i) = name_match {
    return Ok(candidates.swap_remove(i));
  }
  match candidates.len() {
    0 => Err(ArchiveError::NoExecutable {
      name: expect.to_string(),
    }),
    1 => Ok(candidates.pop().unwrap()),
    _ => {
      let largest = candidates
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| c.data.len())
        .map(|(i, _)| i)
        .unwrap();
      Ok(candidates.swap_remove(largest))
    }
  }
}

fn collect_tar<D: Read>(decoder: D, expect: &str) -> Result<Candidate, ArchiveError> {
  let mut archive = tar::Archive::new(decoder);
  let mut candidates = Vec::new();
  let mut name_match = None;

  for entry in archive.entries().map_err(|e| ArchiveError::Unpack(e.to_string()))? {
    let mut entry = entry.map_err(|e| ArchiveError::Unpack(e.to_string()))?;
    if !entry.header().entry_type().is_file() {
      continue;
    }

    let path = entry
      .path()
      .map_err(|e| ArchiveError::Unpack(e.to_string()))?
      .to_string_lossy()
      .into_owned();
    if is_suspicious(&path) {
      return Err(ArchiveError::Traversal { entry: path });
    }

    // Only executable members are binary candidates.
    let mode = entry.header().mode().unwrap_or(0);
    if mode & 0o111 == 0 {
      continue;
    }

    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;

    if basename(&path) == expect {
      name_match = Some(candidates.len());
    }
    candidates.push(Candidate { name: path, data });
  }

  choose(candidates, name_match, expect)
}

fn collect_zip(payload: &[u8], expect: &str) -> Result<Candidate, ArchiveError> {
  let mut archive = ZipArchive::new(Cursor::new(payload)).map_err(|e| ArchiveError::Unpack(e.to_string()))?;
  let mut candidates = Vec::new();
  let mut name_match = None;

  for i in 0..archive.len() {
    let mut file = archive.by_index(i).map_err(|e| ArchiveError::Unpack(e.to_string()))?;
    if file.is_dir() {
      continue;
    }

    let path = file.name().to_string();
    if is_suspicious(&path) {
      return Err(ArchiveError::Traversal { entry: path });
    }

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if basename(&path) == expect {
      name_match = Some(candidates.len());
    }
    candidates.push(Candidate { name: path, data });
  }

  choose(candidates, name_match, expect)
}

/// Extract one executable from `payload` into `dest` with mode 0755.
///
/// `expect` is the binary name used for the exact-basename match. With
/// `ArchiveKind::None` the payload itself is the binary.
pub fn extract_binary(kind: ArchiveKind, payload: &[u8], expect: &str, dest: &Path) -> Result<(), ArchiveError> {
  let chosen = match kind {
    ArchiveKind::TarGz => collect_tar(GzDecoder::new(payload), expect)?,
    ArchiveKind::TarXz => collect_tar(XzDecoder::new(payload), expect)?,
    ArchiveKind::TarBz2 => collect_tar(BzDecoder::new(payload), expect)?,
    ArchiveKind::Zip => collect_zip(payload, expect)?,
    ArchiveKind::None => Candidate {
      name: expect.to_string(),
      data: payload.to_vec(),
    },
  };

  debug!(member = %chosen.name, size = chosen.data.len(), "extracted archive member");

  if let Some(parent) = dest.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(dest, &chosen.data)?;
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use std::io::Write;
  use tempfile::TempDir;

  fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data, mode) in entries {
      let mut header = tar::Header::new_gnu();
      header.set_size(data.len() as u64);
      header.set_mode(*mode);
      header.set_cksum();
      builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
  }

  fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
      writer
        .start_file(*name, zip::write::SimpleFileOptions::default())
        .unwrap();
      writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
  }

  #[test]
  fn kind_from_name() {
    assert_eq!(ArchiveKind::from_name("tool_linux_amd64.tar.gz"), ArchiveKind::TarGz);
    assert_eq!(ArchiveKind::from_name("tool.TGZ"), ArchiveKind::TarGz);
    assert_eq!(ArchiveKind::from_name("tool.tar.xz"), ArchiveKind::TarXz);
    assert_eq!(ArchiveKind::from_name("tool.tar.bz2"), ArchiveKind::TarBz2);
    assert_eq!(ArchiveKind::from_name("tool.zip"), ArchiveKind::Zip);
    assert_eq!(ArchiveKind::from_name("tool-linux-amd64"), ArchiveKind::None);
  }

  #[test]
  fn tar_exact_name_match_wins() {
    let payload = tar_gz(&[
      ("dir/helper", b"helper-bytes-longer", 0o755),
      ("dir/tool", b"tool-bytes", 0o755),
    ]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("tool");

    extract_binary(ArchiveKind::TarGz, &payload, "tool", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"tool-bytes");
  }

  #[cfg(unix)]
  #[test]
  fn extracted_file_is_executable() {
    use std::os::unix::fs::PermissionsExt;
    let payload = tar_gz(&[("tool", b"bytes", 0o755)]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("tool");

    extract_binary(ArchiveKind::TarGz, &payload, "tool", &dest).unwrap();
    let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
  }

  #[test]
  fn tar_skips_non_executables() {
    let payload = tar_gz(&[
      ("README.md", b"docs docs docs docs docs", 0o644),
      ("bin/run", b"exe", 0o755),
    ]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("run");

    extract_binary(ArchiveKind::TarGz, &payload, "other-name", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"exe");
  }

  #[test]
  fn tar_largest_executable_on_no_name_match() {
    let payload = tar_gz(&[
      ("small", b"ab", 0o755),
      ("large", b"abcdefghij", 0o755),
    ]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out");

    extract_binary(ArchiveKind::TarGz, &payload, "nomatch", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"abcdefghij");
  }

  #[test]
  fn tar_no_executable_errors() {
    let payload = tar_gz(&[("README.md", b"docs", 0o644)]);
    let temp = TempDir::new().unwrap();
    let err = extract_binary(ArchiveKind::TarGz, &payload, "tool", &temp.path().join("tool")).unwrap_err();
    assert!(matches!(err, ArchiveError::NoExecutable { .. }));
  }

  #[test]
  fn tar_traversal_rejected() {
    let payload = tar_gz(&[("../evil", b"x", 0o755)]);
    let temp = TempDir::new().unwrap();
    let err = extract_binary(ArchiveKind::TarGz, &payload, "evil", &temp.path().join("out")).unwrap_err();
    assert!(matches!(err, ArchiveError::Traversal { .. }));
  }

  #[test]
  fn zip_name_match() {
    let payload = zip_bytes(&[("bundle/tool.exe", b"exe-bytes"), ("bundle/tool", b"nix-bytes")]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("tool");

    extract_binary(ArchiveKind::Zip, &payload, "tool", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"nix-bytes");
  }

  #[test]
  fn zip_considers_all_files() {
    // Zip mode bits are unreliable; the largest file wins without a name
    // match.
    let payload = zip_bytes(&[("a", b"xx"), ("b", b"xxxxxxxx")]);
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("out");

    extract_binary(ArchiveKind::Zip, &payload, "nomatch", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"xxxxxxxx");
  }

  #[test]
  fn raw_payload_written_as_is() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("tool");
    extract_binary(ArchiveKind::None, b"raw-binary", "tool", &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"raw-binary");
  }
}
