//! Typed collection of namespaced tags from a target's dependencies.
//!
//! Targets carry free-form tags such as `cc:linker_flags=-lz` or
//! `py:zip_safe`. Dependents collect the tags of one namespace from their
//! transitive effective dependencies into a [`PropertySet`] once, instead of
//! re-parsing strings at each use site.

use serde::{Deserialize, Serialize};

/// One parsed tag: `namespace:name=value` or `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
  pub name: String,
  pub value: Option<String>,
}

impl Property {
  /// Parse `tag` if it belongs to `namespace`.
  pub fn parse(namespace: &str, tag: &str) -> Option<Self> {
    let rest = tag.strip_prefix(namespace)?.strip_prefix(':')?;
    if rest.is_empty() {
      return None;
    }
    Some(match rest.split_once('=') {
      Some((name, value)) => Self {
        name: name.to_string(),
        value: Some(value.to_string()),
      },
      None => Self {
        name: rest.to_string(),
        value: None,
      },
    })
  }
}

/// Ordered, de-duplicated properties of one namespace.
///
/// Order is depth-first over dependencies in declaration order; the first
/// occurrence of a property wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySet {
  namespace: String,
  properties: Vec<Property>,
}

impl PropertySet {
  pub fn new(namespace: &str) -> Self {
    Self {
      namespace: namespace.to_string(),
      properties: Vec::new(),
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Add every tag of this namespace from `tags`.
  pub fn extend_from_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a String>) {
    for tag in tags {
      if let Some(property) = Property::parse(&self.namespace, tag)
        && !self.properties.contains(&property)
      {
        self.properties.push(property);
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Property> {
    self.properties.iter()
  }

  pub fn len(&self) -> usize {
    self.properties.len()
  }

  pub fn is_empty(&self) -> bool {
    self.properties.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.properties.iter().any(|p| p.name == name)
  }

  /// Values of every `name=value` property called `name`, in order.
  pub fn values(&self, name: &str) -> Vec<&str> {
    self
      .properties
      .iter()
      .filter(|p| p.name == name)
      .filter_map(|p| p.value.as_deref())
      .collect()
  }
}
