use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, OUT_DIR_NAME};

/// Returns the user's home directory, if one is set.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if one is set.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for cache files for the application.
///
/// Falls back to the system temp directory when no home directory is known.
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application.
///
/// Falls back to the system temp directory when no home directory is known.
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir);
  cache_home.join(APP_NAME)
}

/// Default output directory for a repository.
pub fn out_dir(root: &Path) -> PathBuf {
  root.join(OUT_DIR_NAME)
}
