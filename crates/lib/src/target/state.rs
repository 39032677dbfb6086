//! Target lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a target in its build lifecycle.
///
/// ```text
/// Inactive -> Active -> Pending -> Building -> { Built | Cached | Reused | Failed }
/// ```
///
/// `Active` and `Pending` targets can also go straight to `Failed` when a
/// dependency fails or the build is cancelled before they are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
  /// Not reachable from any requested target.
  Inactive,
  /// Reachable; waiting for dependencies.
  Active,
  /// All dependencies succeeded; queued for a worker.
  Pending,
  /// Dispatched to a worker, or waiting on hooks or late dependencies.
  Building,
  /// Action executed and verified.
  Built,
  /// Restored from the cache without running the action.
  Cached,
  /// Re-ran but produced outputs identical to an earlier run this session.
  Reused,
  /// Terminal failure.
  Failed,
}

impl TargetState {
  /// Whether no further transition happens for this build.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Built | Self::Cached | Self::Reused | Self::Failed)
  }

  /// Whether dependents may proceed past this target.
  pub fn is_success(self) -> bool {
    matches!(self, Self::Built | Self::Cached | Self::Reused)
  }

  /// Whether `next` is a legal successor of `self`.
  pub fn can_transition_to(self, next: TargetState) -> bool {
    use TargetState::*;
    match (self, next) {
      (Inactive, Active) => true,
      (Active, Pending) | (Active, Failed) => true,
      (Pending, Building) | (Pending, Failed) => true,
      (Building, Built) | (Building, Cached) | (Building, Reused) | (Building, Failed) => true,
      _ => false,
    }
  }
}

impl fmt::Display for TargetState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Inactive => "inactive",
      Self::Active => "active",
      Self::Pending => "pending",
      Self::Building => "building",
      Self::Built => "built",
      Self::Cached => "cached",
      Self::Reused => "reused",
      Self::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// Raised when an illegal state transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct StateError {
  pub from: TargetState,
  pub to: TargetState,
}
