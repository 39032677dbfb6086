//! Target labels.
//!
//! A [`Label`] identifies a single target: the package it lives in plus its
//! name within that package. The canonical textual form is `//package:name`.
//!
//! Labels are immutable values with a total order, so they are used as map
//! keys everywhere and iteration over label-keyed `BTreeMap`s is deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when parsing a label string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
  #[error("empty label")]
  Empty,

  #[error("label {0:?} must start with '//' or ':'")]
  MissingPrefix(String),

  #[error("relative label {0:?} used without a package context")]
  NoPackageContext(String),

  #[error("label {label:?} has an invalid target name {name:?}")]
  InvalidName { label: String, name: String },

  #[error("label {label:?} has an invalid package path {package:?}")]
  InvalidPackage { label: String, package: String },
}

/// Unique identifier of a build target.
///
/// Ordering is by package path first, then by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
  package: String,
  name: String,
}

impl Label {
  /// Create a label from an already-validated package path and name.
  pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      package: package.into(),
      name: name.into(),
    }
  }

  /// Parse an absolute label (`//pkg/path:name` or `//pkg/path`).
  pub fn parse(s: &str) -> Result<Self, LabelError> {
    Self::parse_in(s, None)
  }

  /// Parse a label that may be relative (`:name`) to `package`.
  pub fn parse_relative(s: &str, package: &str) -> Result<Self, LabelError> {
    Self::parse_in(s, Some(package))
  }

  fn parse_in(s: &str, package: Option<&str>) -> Result<Self, LabelError> {
    let s = s.trim();
    if s.is_empty() {
      return Err(LabelError::Empty);
    }

    if let Some(name) = s.strip_prefix(':') {
      let Some(package) = package else {
        return Err(LabelError::NoPackageContext(s.to_string()));
      };
      validate_name(s, name)?;
      return Ok(Self::new(package, name));
    }

    let Some(rest) = s.strip_prefix("//") else {
      return Err(LabelError::MissingPrefix(s.to_string()));
    };

    let (pkg, name) = match rest.split_once(':') {
      Some((pkg, name)) => (pkg, name.to_string()),
      None => {
        // `//foo/bar` is shorthand for `//foo/bar:bar`
        let last = rest.rsplit('/').next().unwrap_or(rest);
        (rest, last.to_string())
      }
    };

    validate_package(s, pkg)?;
    validate_name(s, &name)?;
    Ok(Self::new(pkg, name))
  }

  /// The package path, without the leading `//`.
  pub fn package(&self) -> &str {
    &self.package
  }

  /// The target name within its package.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Whether this label lives in `package` or one of its subpackages.
  pub fn is_within(&self, package: &str) -> bool {
    package.is_empty()
      || self.package == package
      || (self.package.starts_with(package) && self.package[package.len()..].starts_with('/'))
  }
}

fn validate_name(label: &str, name: &str) -> Result<(), LabelError> {
  let valid = !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '#' | '@' | '='));
  if valid {
    Ok(())
  } else {
    Err(LabelError::InvalidName {
      label: label.to_string(),
      name: name.to_string(),
    })
  }
}

fn validate_package(label: &str, package: &str) -> Result<(), LabelError> {
  let valid = !package.starts_with('/')
    && !package.ends_with('/')
    && !package.contains("//")
    && package
      .split('/')
      .all(|part| part.is_empty() || (part != "." && part != ".."))
    && package
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+'));
  if valid {
    Ok(())
  } else {
    Err(LabelError::InvalidPackage {
      label: label.to_string(),
      package: package.to_string(),
    })
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "//{}:{}", self.package, self.name)
  }
}

impl FromStr for Label {
  type Err = LabelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Label::parse(s)
  }
}

impl Serialize for Label {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Label {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Label::parse(&s).map_err(serde::de::Error::custom)
  }
}
