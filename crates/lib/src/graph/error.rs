//! Graph construction and mutation errors.

use thiserror::Error;

use crate::label::Label;

/// Problems with the declared dependency structure.
///
/// These are fatal to a build and always name the responsible label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
  #[error("target {label} not found{}", dependent_suffix(.dependent))]
  Missing { label: Label, dependent: Option<Label> },

  #[error("target {0} is defined more than once")]
  Duplicate(Label),

  #[error("dependency cycle: {}", format_cycle(.labels))]
  Cycle { labels: Vec<Label> },

  #[error("{label} is not visible to {dependent}")]
  Visibility { label: Label, dependent: Label },

  #[error("{label} is test-only and cannot be a dependency of {dependent}")]
  TestOnly { label: Label, dependent: Label },

  #[error("failed to load package {package}: {message}")]
  Load { package: String, message: String },
}

/// Illegal runtime mutation of the graph, typically from a post-build hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphMutationError {
  #[error("adding {from} -> {to} would create a cycle")]
  Cycle { from: Label, to: Label },

  #[error("cannot add dependencies to {label}: it has already completed")]
  AlreadyComplete { label: Label },

  #[error("target {label} not found")]
  UnknownTarget { label: Label },

  #[error("cannot add target {label}: {source}")]
  InvalidTarget {
    label: Label,
    #[source]
    source: DependencyError,
  },
}

impl GraphMutationError {
  /// The label the mutation was rejected for.
  pub fn label(&self) -> &Label {
    match self {
      Self::Cycle { from, .. } => from,
      Self::AlreadyComplete { label } | Self::UnknownTarget { label } | Self::InvalidTarget { label, .. } => label,
    }
  }
}

fn dependent_suffix(dependent: &Option<Label>) -> String {
  match dependent {
    Some(dependent) => format!(" (required by {})", dependent),
    None => String::new(),
  }
}

fn format_cycle(labels: &[Label]) -> String {
  let mut parts: Vec<String> = labels.iter().map(Label::to_string).collect();
  if let Some(first) = labels.first() {
    parts.push(first.to_string());
  }
  parts.join(" -> ")
}
