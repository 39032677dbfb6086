//! Incremental build cache.
//!
//! Artifacts are keyed by [`Fingerprint`]. Entries are append-only: storing a
//! different artifact under an existing fingerprint is reported as
//! [`CacheError::Corruption`] and never overwrites the entry.
//!
//! # Submodules
//!
//! - [`fingerprint`] - Merkle fingerprint computation
//! - [`dir`] - Content-addressed on-disk cache
//! - [`memory`] - In-process cache

pub mod dir;
pub mod fingerprint;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::label::Label;
use crate::target::TestResults;
use crate::util::hash::{ContentHash, hash_outputs};

pub use dir::DirCache;
pub use fingerprint::{Fingerprint, FingerprintError, fingerprint_target};
pub use memory::MemoryCache;

#[derive(Debug, Error)]
pub enum CacheError {
  /// Same fingerprint, different bytes. Either fingerprinting missed an input
  /// or the build is not deterministic.
  #[error("cache corruption for {fingerprint}: expected output hash {expected}, found {actual}")]
  Corruption {
    fingerprint: Fingerprint,
    expected: ContentHash,
    actual: ContentHash,
  },

  #[error("cache io error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid cache marker at {path}: {message}")]
  Parse { path: String, message: String },
}

impl CacheError {
  pub fn is_corruption(&self) -> bool {
    matches!(self, Self::Corruption { .. })
  }
}

/// The outputs of one target build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  /// Output name (relative path) -> content.
  pub files: BTreeMap<String, Vec<u8>>,
  /// Digest over `files`.
  pub digest: ContentHash,
  pub metadata: ArtifactMetadata,
}

/// Data stored next to an artifact's files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<Label>,
  #[serde(default)]
  pub results: TestResults,
}

impl Artifact {
  pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
    let digest = hash_outputs(&files);
    Self {
      files,
      digest,
      metadata: ArtifactMetadata::default(),
    }
  }

  pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
    self.metadata = metadata;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
  Stored,
  /// An identical artifact was already present.
  AlreadyPresent,
}

/// Artifact storage shared by all workers.
///
/// Implementations must allow concurrent use; operations on different
/// fingerprints must not block each other.
#[async_trait]
pub trait Cache: Send + Sync {
  async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError>;

  async fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<StoreOutcome, CacheError>;
}
