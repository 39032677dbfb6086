//! Hashing utilities for fingerprints and output verification.
//!
//! This module provides:
//! - `ContentHash`: A full 64-character SHA-256 digest
//! - `hash_directory()`: Deterministic directory hashing
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing
//! - `hash_outputs()`: Digest of a named output set

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Whether this digest matches an accepted-hash entry.
  ///
  /// An entry must name the full digest. It may carry a `sha256:` prefix and
  /// use either hex case.
  pub fn matches(&self, accepted: &str) -> bool {
    let accepted = accepted.trim();
    let accepted = accepted.strip_prefix("sha256:").unwrap_or(accepted);
    accepted.eq_ignore_ascii_case(&self.0)
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during file or directory hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },
}

/// Compute a deterministic hash of a directory's contents.
///
/// The hash includes:
/// - File contents (not metadata like timestamps or permissions)
/// - Directory structure
/// - Symlink targets
///
/// Entries are sorted by path for determinism. Names listed in `exclude` are
/// skipped along with everything below them.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, HashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| HashError::WalkDir { message: e.to_string() })?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let entry_hash = if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      format!("F:{}:{}", rel_path, content_hash.0)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| HashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      format!("L:{}:{}", rel_path, target_hash.0)
    } else {
      // Sockets, devices, etc.
      continue;
    };

    entries.push((rel_path, entry_hash));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, entry_hash) in entries {
    hasher.update(entry_hash.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash a source path, which may be a single file or a directory tree.
pub fn hash_path(path: &Path) -> Result<ContentHash, HashError> {
  if path.is_dir() {
    hash_directory(path, &[])
  } else {
    hash_file(path)
  }
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}

/// Digest of a set of named outputs.
///
/// Uses the same `F:<name>:<hash>` line format as [`hash_directory`], so a
/// flat output set hashes identically whether it is held in memory or on disk.
pub fn hash_outputs(outputs: &BTreeMap<String, Vec<u8>>) -> ContentHash {
  let mut hasher = Sha256::new();
  for (name, content) in outputs {
    hasher.update(format!("F:{}:{}", name, hash_bytes(content).0).as_bytes());
    hasher.update(b"\n");
  }
  ContentHash(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn hash_empty_directory() {
    let temp = tempdir().unwrap();
    let hash = hash_directory(temp.path(), &[]).unwrap();
    assert_eq!(hash.0.len(), 64);
  }

  #[test]
  fn hash_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.txt"), "content a").unwrap();
    fs::write(temp.path().join("b.txt"), "content b").unwrap();

    let hash1 = hash_directory(temp.path(), &[]).unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn hash_changes_with_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "original").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join("file.txt"), "modified").unwrap();
    let hash2 = hash_directory(temp.path(), &[]).unwrap();

    assert_ne!(hash1, hash2);
  }

  #[test]
  fn hash_respects_exclusions() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("file.txt"), "content").unwrap();
    let hash1 = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join(".brick-complete"), "marker").unwrap();
    let hash2 = hash_directory(temp.path(), &[".brick-complete"]).unwrap();

    assert_eq!(hash1, hash2);
  }

  #[test]
  fn output_set_matches_directory_layout() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.out"), "alpha").unwrap();
    fs::write(temp.path().join("b.out"), "beta").unwrap();

    let mut outputs = BTreeMap::new();
    outputs.insert("a.out".to_string(), b"alpha".to_vec());
    outputs.insert("b.out".to_string(), b"beta".to_vec());

    assert_eq!(hash_outputs(&outputs), hash_directory(temp.path(), &[]).unwrap());
  }

  #[test]
  fn hash_path_handles_files_and_dirs() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("f.txt");
    fs::write(&file, "hello world").unwrap();

    assert_eq!(hash_path(&file).unwrap(), hash_file(&file).unwrap());
    assert_eq!(hash_path(temp.path()).unwrap(), hash_directory(temp.path(), &[]).unwrap());
  }

  #[test]
  fn content_hash_matching() {
    let hash = hash_bytes(b"hello");
    assert!(hash.matches(&hash.0));
    assert!(hash.matches(&format!("sha256:{}", hash.0)));
    assert!(hash.matches(&hash.0.to_uppercase()));
    assert!(!hash.matches("abc"));
    assert!(!hash.matches(&hash.0[..12]));
    assert!(!hash.matches(&hash.0[..63]));
    assert!(!hash.matches("sha256:"));
    assert!(!hash.matches(&hash_bytes(b"other").0));
  }
}
