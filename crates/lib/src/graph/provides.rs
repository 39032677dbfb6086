//! Requires/provides dependency substitution.
//!
//! A target that `requires` a capability tag does not depend on a dependency
//! `D` directly when `D` `provides` that tag; it depends on the label `D`
//! provides for it instead. If no tag matches, the edge is left as declared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::label::Label;

/// Tie-break when several of a target's requires tags are provided by the
/// same dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvidesPolicy {
  /// Walk the requiring target's tags in declaration order; the first one the
  /// dependency provides wins.
  #[default]
  FirstRequired,
  /// Walk the dependency's provides entries in tag order; the first one the
  /// requiring target asks for wins.
  FirstProvided,
}

/// The label that replaces an edge to a dependency with `provides`, if any.
pub fn substitute<'a>(
  policy: ProvidesPolicy,
  requires: &[String],
  provides: &'a BTreeMap<String, Label>,
) -> Option<&'a Label> {
  if requires.is_empty() || provides.is_empty() {
    return None;
  }
  match policy {
    ProvidesPolicy::FirstRequired => requires.iter().find_map(|tag| provides.get(tag)),
    ProvidesPolicy::FirstProvided => provides
      .iter()
      .find(|(tag, _)| requires.iter().any(|r| r == *tag))
      .map(|(_, label)| label),
  }
}
