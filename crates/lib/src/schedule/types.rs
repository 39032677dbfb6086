//! Scheduler result and error types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::graph::{DependencyError, GraphMutationError};
use crate::label::Label;
use crate::target::{TargetState, TestResults};
use crate::util::hash::ContentHash;

/// Errors that abort a whole build.
///
/// Ordinary target failures are not errors; they are reported per target in
/// [`BuildSummary`].
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("post-build hook of {label} made an illegal graph change: {source}")]
  GraphMutation {
    label: Label,
    #[source]
    source: GraphMutationError,
  },

  #[error("cache corruption while building {label}: {source}")]
  CacheCorruption {
    label: Label,
    #[source]
    source: CacheError,
  },
}

impl BuildError {
  /// The label responsible, where there is one.
  pub fn label(&self) -> Option<&Label> {
    match self {
      Self::Dependency(DependencyError::Missing { dependent: Some(label), .. }) => Some(label),
      Self::Dependency(DependencyError::Missing { label, .. })
      | Self::Dependency(DependencyError::Duplicate(label))
      | Self::Dependency(DependencyError::Visibility { dependent: label, .. })
      | Self::Dependency(DependencyError::TestOnly { dependent: label, .. }) => Some(label),
      Self::Dependency(DependencyError::Cycle { labels }) => labels.first(),
      Self::Dependency(DependencyError::Load { .. }) => None,
      Self::GraphMutation { label, .. } | Self::CacheCorruption { label, .. } => Some(label),
    }
  }
}

/// Why a target ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
  /// The action exited non-zero, could not start, or missed an output.
  Action { message: String },
  Timeout { message: String },
  TestsFailed { failed: u32, total: u32 },
  /// Output digest not in the accepted set.
  HashMismatch { digest: ContentHash },
  Hook { message: String },
  Fingerprint { message: String },
  Cache { message: String },
  GraphMutation { message: String },
  Dependency { message: String },
  /// An effective dependency failed first.
  DependencyFailed { dependency: Label },
  /// Never dispatched because the build stopped.
  Cancelled,
}

impl FailureCause {
  /// Whether the target itself failed, as opposed to being skipped.
  pub fn is_root_cause(&self) -> bool {
    !matches!(self, Self::DependencyFailed { .. } | Self::Cancelled)
  }
}

impl fmt::Display for FailureCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Action { message }
      | Self::Timeout { message }
      | Self::Hook { message }
      | Self::Fingerprint { message }
      | Self::Cache { message }
      | Self::GraphMutation { message }
      | Self::Dependency { message } => f.write_str(message),
      Self::TestsFailed { failed, total } => write!(f, "{failed} of {total} tests failed"),
      Self::HashMismatch { digest } => write!(f, "output hash {digest} is not an accepted hash"),
      Self::DependencyFailed { dependency } => write!(f, "dependency {dependency} failed"),
      Self::Cancelled => f.write_str("cancelled"),
    }
  }
}

/// Final record for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
  pub state: TargetState,
  pub duration: Duration,
  /// Attempts including retries; zero when never dispatched.
  pub attempts: u32,
  pub cache_hit: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cause: Option<FailureCause>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tests: Option<TestResults>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_hash: Option<ContentHash>,
}

/// Result of [`Scheduler::run`](super::Scheduler::run).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
  pub outcomes: BTreeMap<Label, TargetOutcome>,
  pub elapsed: Duration,
}

impl BuildSummary {
  pub fn outcome(&self, label: &Label) -> Option<&TargetOutcome> {
    self.outcomes.get(label)
  }

  pub fn state(&self, label: &Label) -> Option<TargetState> {
    self.outcomes.get(label).map(|o| o.state)
  }

  /// Number of targets that ended in `state`.
  pub fn count(&self, state: TargetState) -> usize {
    self.outcomes.values().filter(|o| o.state == state).count()
  }

  pub fn failed(&self) -> impl Iterator<Item = (&Label, &TargetOutcome)> {
    self.outcomes.iter().filter(|(_, o)| o.state == TargetState::Failed)
  }

  pub fn is_success(&self) -> bool {
    self.outcomes.values().all(|o| o.state.is_success())
  }
}

/// Remaining automatic retries of a flaky target.
///
/// Lives on the scheduling entry, not on the target, so dependents never see
/// intermediate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
  remaining: u32,
}

impl RetryBudget {
  pub fn new(retries: u32) -> Self {
    Self { remaining: retries }
  }

  pub fn remaining(&self) -> u32 {
    self.remaining
  }

  /// Use one retry if any is left.
  pub fn try_consume(&mut self) -> bool {
    if self.remaining == 0 {
      return false;
    }
    self.remaining -= 1;
    true
  }
}
