//! Merkle fingerprints of build targets.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::consts::FINGERPRINT_VERSION;
use crate::graph::{BuildGraph, DependencyError};
use crate::label::Label;
use crate::target::BuildTarget;
use crate::util::hash::{ContentHash, HashError, hash_path};

/// Cache key of a target: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  /// The two-character shard used by on-disk caches.
  pub fn shard(&self) -> &str {
    self.0.get(..2).unwrap_or(&self.0)
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error("cannot hash source {path} of {label}: {source}")]
  Source {
    label: Label,
    path: String,
    #[source]
    source: HashError,
  },

  #[error("dependency {dependency} of {label} has no fingerprint")]
  MissingDependency { label: Label, dependency: Label },

  #[error(transparent)]
  Dependency(#[from] DependencyError),
}

/// Everything that determines a target's fingerprint.
#[derive(Debug, Default)]
pub struct FingerprintInputs<'a> {
  pub profile: &'a str,
  pub command: Option<&'a str>,
  pub outputs: &'a [String],
  pub sources: Vec<(&'a str, ContentHash)>,
  pub deps: Vec<(Label, Fingerprint)>,
}

impl FingerprintInputs<'_> {
  pub fn digest(mut self) -> Fingerprint {
    self.deps.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut line = |s: String| {
      hasher.update(s.as_bytes());
      hasher.update(b"\n");
    };

    line(format!("V:{}", FINGERPRINT_VERSION));
    line(format!("P:{}", self.profile));
    line(format!("C:{}", self.command.unwrap_or("")));
    for output in self.outputs {
      line(format!("O:{}", output));
    }
    for (path, hash) in &self.sources {
      line(format!("S:{}:{}", path, hash));
    }
    for (label, fp) in &self.deps {
      line(format!("D:{}:{}", label, fp));
    }

    Fingerprint(format!("{:x}", hasher.finalize()))
  }
}

/// Compute the fingerprint of `target` for `profile`.
///
/// Every effective dependency must already carry a fingerprint, so this is
/// only valid once all of them finished successfully.
pub fn fingerprint_target(
  graph: &BuildGraph,
  target: &BuildTarget,
  root: &Path,
  profile: &str,
) -> Result<Fingerprint, FingerprintError> {
  let label = target.label();
  let command = target.command_for(profile);
  let descriptor = target.descriptor();

  let mut sources = Vec::with_capacity(descriptor.sources.len());
  for source in &descriptor.sources {
    let hash = hash_path(&root.join(source)).map_err(|source_err| FingerprintError::Source {
      label: label.clone(),
      path: source.clone(),
      source: source_err,
    })?;
    sources.push((source.as_str(), hash));
  }

  let mut deps = Vec::new();
  for dep in graph.resolve_edges(label)? {
    let fp = graph
      .target(&dep)
      .and_then(|t| t.fingerprint())
      .ok_or_else(|| FingerprintError::MissingDependency {
        label: label.clone(),
        dependency: dep.clone(),
      })?;
    deps.push((dep, fp));
  }

  Ok(
    FingerprintInputs {
      profile,
      command: command.as_deref(),
      outputs: &descriptor.outputs,
      sources,
      deps,
    }
    .digest(),
  )
}
