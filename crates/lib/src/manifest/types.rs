//! Manifest types for brick.
//!
//! A manifest is the hand-off from rule evaluation: the flat list of target
//! descriptors of a repository. It is accepted in two shapes:
//!
//! ```json
//! [ { "label": "//app:bin", ... }, ... ]
//! ```
//!
//! ```json
//! { "targets": [ { "label": "//app:bin", ... }, ... ] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::target::TargetDescriptor;

/// Every target descriptor of a repository.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(from = "ManifestRepr")]
pub struct Manifest {
  pub targets: Vec<TargetDescriptor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestRepr {
  List(Vec<TargetDescriptor>),
  Object { targets: Vec<TargetDescriptor> },
}

impl From<ManifestRepr> for Manifest {
  fn from(repr: ManifestRepr) -> Self {
    match repr {
      ManifestRepr::List(targets) | ManifestRepr::Object { targets } => Self { targets },
    }
  }
}

impl Manifest {
  /// Descriptors grouped by package, in manifest order within a package.
  pub fn packages(&self) -> BTreeMap<String, Vec<TargetDescriptor>> {
    let mut packages: BTreeMap<String, Vec<TargetDescriptor>> = BTreeMap::new();
    for target in &self.targets {
      packages
        .entry(target.label.package().to_string())
        .or_default()
        .push(target.clone());
    }
    packages
  }
}
