//! Shared constants.

/// Application name, used for cache directory naming.
pub const APP_NAME: &str = "b";

/// Project manifest file name.
pub const MANIFEST_FILENAME: &str = "b.yaml";

/// Lockfile name, written next to the manifest.
pub const LOCK_FILENAME: &str = "b.lock";

/// Current lockfile schema version.
pub const LOCK_VERSION: u32 = 1;

/// Directory (relative to the project root) where binaries are installed
/// when no explicit path is configured.
pub const DEFAULT_BIN_DIR: &str = ".bin";
