//! Reading target manifests into a build graph.
//!
//! [`Manifest::load`] parses a manifest file. A graph can then be built from
//! it eagerly with [`Manifest::into_graph`], or lazily with
//! [`Manifest::into_lazy_graph`], where a package is only ingested when one
//! of its labels is first referenced.

mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use types::*;

use crate::graph::{BuildGraph, DependencyError, PackageLoader, ProvidesPolicy};
use crate::target::TargetDescriptor;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Dependency(#[from] DependencyError),
}

impl Manifest {
  /// Read and parse a manifest file.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let manifest: Manifest = serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), targets = manifest.targets.len(), "manifest loaded");
    Ok(manifest)
  }

  /// A graph holding every target of the manifest.
  pub fn into_graph(self, policy: ProvidesPolicy) -> Result<BuildGraph, ManifestError> {
    let graph = BuildGraph::new().with_policy(policy);
    for descriptor in self.targets {
      graph.add_target(descriptor)?;
    }
    Ok(graph)
  }

  /// An empty graph that loads packages from the manifest on demand.
  pub fn into_lazy_graph(self, policy: ProvidesPolicy) -> BuildGraph {
    BuildGraph::new()
      .with_policy(policy)
      .with_loader(Arc::new(ManifestLoader::new(&self)))
  }
}

/// Serves packages of a parsed manifest to [`BuildGraph`].
#[derive(Debug, Default)]
pub struct ManifestLoader {
  packages: BTreeMap<String, Vec<TargetDescriptor>>,
}

impl ManifestLoader {
  pub fn new(manifest: &Manifest) -> Self {
    Self {
      packages: manifest.packages(),
    }
  }
}

impl PackageLoader for ManifestLoader {
  fn load_package(&self, package: &str) -> Result<Vec<TargetDescriptor>, String> {
    // Unknown packages are empty; the lookup then reports the missing label.
    Ok(self.packages.get(package).cloned().unwrap_or_default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::label::Label;
  use std::io::Write;

  const LIST: &str = r#"[
    { "label": "//lib:core", "outputs": ["core.a"], "commands": { "default": "ar rc core.a" } },
    { "label": "//app:bin", "deps": ["//lib:core"], "outputs": ["bin"] }
  ]"#;

  fn l(s: &str) -> Label {
    Label::parse(s).unwrap()
  }

  #[test]
  fn accepts_list_and_object_forms() {
    let list: Manifest = serde_json::from_str(LIST).unwrap();
    let object: Manifest = serde_json::from_str(&format!(r#"{{ "targets": {LIST} }}"#)).unwrap();
    assert_eq!(list.targets.len(), 2);
    assert_eq!(object.targets.len(), 2);
    assert_eq!(object.targets[1].deps[0].label, l("//lib:core"));
  }

  #[test]
  fn groups_by_package() {
    let manifest: Manifest = serde_json::from_str(LIST).unwrap();
    let packages = manifest.packages();
    assert_eq!(packages.keys().collect::<Vec<_>>(), vec!["app", "lib"]);
  }

  #[test]
  fn load_reports_path_on_bad_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    let err = Manifest::load(file.path()).unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
    assert!(err.to_string().contains(&file.path().display().to_string()));
  }

  #[test]
  fn eager_graph_rejects_duplicates() {
    let manifest: Manifest =
      serde_json::from_str(r#"[{ "label": "//a:x" }, { "label": "//a:x" }]"#).unwrap();
    assert!(matches!(
      manifest.into_graph(ProvidesPolicy::default()),
      Err(ManifestError::Dependency(DependencyError::Duplicate(_)))
    ));
  }

  #[test]
  fn lazy_graph_loads_referenced_packages_only() {
    let manifest: Manifest = serde_json::from_str(LIST).unwrap();
    let graph = manifest.into_lazy_graph(ProvidesPolicy::default());
    assert!(graph.is_empty());

    graph.resolve(&l("//lib:core"), None).unwrap();
    assert_eq!(graph.labels(), vec![l("//lib:core")]);

    assert!(matches!(
      graph.resolve(&l("//nowhere:x"), None),
      Err(DependencyError::Missing { .. })
    ));
  }
}
