//! Visibility and test-only checks applied to effective edges.
//!
//! Visibility patterns:
//! - `PUBLIC`: every package
//! - `//pkg/...`: `pkg` and all of its subpackages
//! - `//pkg` or `//pkg:__pkg__`: exactly `pkg`
//!
//! A target is always visible inside its own package. An empty visibility
//! list is treated as public.

use crate::consts::VISIBILITY_PUBLIC;
use crate::target::BuildTarget;

use super::error::DependencyError;

/// Check that `dependent` may depend on `dependency`.
pub fn check_access(dependent: &BuildTarget, dependency: &BuildTarget) -> Result<(), DependencyError> {
  if !is_visible(dependency, dependent.label().package()) {
    return Err(DependencyError::Visibility {
      label: dependency.label().clone(),
      dependent: dependent.label().clone(),
    });
  }

  let dependent_desc = dependent.descriptor();
  if dependency.descriptor().test_only && !(dependent_desc.test_only || dependent_desc.test) {
    return Err(DependencyError::TestOnly {
      label: dependency.label().clone(),
      dependent: dependent.label().clone(),
    });
  }

  Ok(())
}

fn is_visible(target: &BuildTarget, package: &str) -> bool {
  let visibility = &target.descriptor().visibility;
  if visibility.is_empty() || target.label().package() == package {
    return true;
  }
  visibility.iter().any(|pattern| pattern_matches(pattern, package))
}

fn pattern_matches(pattern: &str, package: &str) -> bool {
  if pattern == VISIBILITY_PUBLIC {
    return true;
  }
  let Some(rest) = pattern.strip_prefix("//") else {
    return false;
  };
  if let Some(prefix) = rest.strip_suffix("/...").or_else(|| (rest == "...").then_some("")) {
    return prefix.is_empty()
      || package == prefix
      || (package.starts_with(prefix) && package[prefix.len()..].starts_with('/'));
  }
  let exact = rest.strip_suffix(":__pkg__").unwrap_or(rest);
  exact == package
}
