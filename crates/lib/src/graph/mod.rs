//! The build graph.
//!
//! [`BuildGraph`] owns every known target, resolves labels (loading packages
//! lazily through a [`PackageLoader`]), computes effective dependency edges
//! with requires/provides substitution, and offers the only sanctioned way to
//! mutate the graph while a build is running: [`BuildGraph::add_target`] and
//! [`BuildGraph::add_dependency`].
//!
//! # Locking
//!
//! - The target map is behind an `RwLock`; lookups take the read side.
//! - Structural mutations (`add_target`, `add_dependency`) serialize on one
//!   graph-wide mutation lock, which is also held while the scheduler is
//!   notified, so the scheduler observes mutations in the order they happen.
//! - Per-target runtime state lives in each [`BuildTarget`]'s own locks.
//!
//! # Submodules
//!
//! - [`access`] - Visibility and test-only checks
//! - [`provides`] - Requires/provides substitution
//! - [`properties`] - Typed transitive tag collection

pub mod access;
mod error;
pub mod properties;
pub mod provides;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::label::Label;
use crate::target::{BuildTarget, Dependency, TargetDescriptor, TargetState};
use crate::util::lock;

pub use error::{DependencyError, GraphMutationError};
pub use properties::{Property, PropertySet};
pub use provides::ProvidesPolicy;

/// Supplies target descriptors for packages that were not added up front.
pub trait PackageLoader: Send + Sync {
  /// Return every target defined in `package`.
  fn load_package(&self, package: &str) -> Result<Vec<TargetDescriptor>, String>;
}

/// Structural changes reported to a running scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
  /// A target was added while a build was running.
  TargetAdded(Label),
  /// `from` gained a dependency while it was building.
  DependencyAdded { from: Label, to: Label },
}

/// All targets of a build and the edges between them.
pub struct BuildGraph {
  targets: RwLock<BTreeMap<Label, Arc<BuildTarget>>>,
  loaded_packages: Mutex<BTreeSet<String>>,
  loader: Option<Arc<dyn PackageLoader>>,
  policy: ProvidesPolicy,
  /// Substitution result per (dependent, declared dependency).
  edges: Mutex<HashMap<(Label, Label), Label>>,
  properties: Mutex<HashMap<(Label, String), Arc<PropertySet>>>,
  observer: Mutex<Option<UnboundedSender<GraphEvent>>>,
  /// Targets added while a build was running.
  dynamic: Mutex<BTreeSet<Label>>,
  mutation: Mutex<()>,
}

impl std::fmt::Debug for BuildGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildGraph")
      .field("targets", &self.len())
      .field("policy", &self.policy)
      .finish()
  }
}

impl Default for BuildGraph {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildGraph {
  pub fn new() -> Self {
    Self {
      targets: RwLock::new(BTreeMap::new()),
      loaded_packages: Mutex::new(BTreeSet::new()),
      loader: None,
      policy: ProvidesPolicy::default(),
      edges: Mutex::new(HashMap::new()),
      properties: Mutex::new(HashMap::new()),
      observer: Mutex::new(None),
      dynamic: Mutex::new(BTreeSet::new()),
      mutation: Mutex::new(()),
    }
  }

  pub fn with_loader(mut self, loader: Arc<dyn PackageLoader>) -> Self {
    self.loader = Some(loader);
    self
  }

  pub fn with_policy(mut self, policy: ProvidesPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> ProvidesPolicy {
    self.policy
  }

  pub fn len(&self) -> usize {
    self.targets.read().map(|t| t.len()).unwrap_or_else(|p| p.into_inner().len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// All known labels in order.
  pub fn labels(&self) -> Vec<Label> {
    self.read_targets().keys().cloned().collect()
  }

  /// Look up a target without loading anything.
  pub fn target(&self, label: &Label) -> Option<Arc<BuildTarget>> {
    self.read_targets().get(label).cloned()
  }

  fn read_targets(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Label, Arc<BuildTarget>>> {
    self.targets.read().unwrap_or_else(|p| p.into_inner())
  }

  fn write_targets(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Label, Arc<BuildTarget>>> {
    self.targets.write().unwrap_or_else(|p| p.into_inner())
  }

  /// Add a target.
  ///
  /// Dependencies do not need to exist yet; they are resolved when the build
  /// is activated. When a build is running, the new target is checked for
  /// cycles and the scheduler is told about it.
  pub fn add_target(&self, descriptor: TargetDescriptor) -> Result<Arc<BuildTarget>, DependencyError> {
    let _guard = lock(&self.mutation);
    // A retried post-build hook adds the same targets again.
    if lock(&self.dynamic).contains(&descriptor.label)
      && let Some(existing) = self.target(&descriptor.label)
    {
      debug!(label = %descriptor.label, "target already added during this build");
      return Ok(existing);
    }
    let target = self.insert(descriptor)?;

    let observer = lock(&self.observer).clone();
    if let Some(observer) = observer {
      let label = target.label().clone();
      if let Some(cycle) = self.cycle_through(&label) {
        self.write_targets().remove(&label);
        return Err(DependencyError::Cycle { labels: cycle });
      }
      lock(&self.dynamic).insert(label.clone());
      debug!(label = %label, "target added during build");
      if observer.send(GraphEvent::TargetAdded(label)).is_err() {
        warn!(label = %target.label(), "scheduler went away before target was announced");
      }
    }

    Ok(target)
  }

  /// Insert without notification; used for initial ingestion and lazy loads.
  fn insert(&self, descriptor: TargetDescriptor) -> Result<Arc<BuildTarget>, DependencyError> {
    let label = descriptor.label.clone();
    let mut targets = self.write_targets();
    if targets.contains_key(&label) {
      return Err(DependencyError::Duplicate(label));
    }
    let target = Arc::new(BuildTarget::new(descriptor));
    targets.insert(label, target.clone());
    Ok(target)
  }

  /// Resolve a label, loading its package on first reference.
  pub fn resolve(&self, label: &Label, dependent: Option<&Label>) -> Result<Arc<BuildTarget>, DependencyError> {
    if let Some(target) = self.target(label) {
      return Ok(target);
    }
    self.ensure_package(label.package())?;
    self.target(label).ok_or_else(|| DependencyError::Missing {
      label: label.clone(),
      dependent: dependent.cloned(),
    })
  }

  fn ensure_package(&self, package: &str) -> Result<(), DependencyError> {
    let Some(loader) = &self.loader else {
      return Ok(());
    };
    if !lock(&self.loaded_packages).insert(package.to_string()) {
      return Ok(());
    }

    debug!(package = %package, "loading package");
    let descriptors = loader.load_package(package).map_err(|message| DependencyError::Load {
      package: package.to_string(),
      message,
    })?;

    for descriptor in descriptors {
      if self.target(&descriptor.label).is_some() {
        continue;
      }
      self.insert(descriptor)?;
    }
    Ok(())
  }

  /// The label `dependent` effectively depends on when it declares `declared`.
  fn effective_dependency(&self, dependent: &BuildTarget, declared: &Label) -> Result<Label, DependencyError> {
    let key = (dependent.label().clone(), declared.clone());
    if let Some(cached) = lock(&self.edges).get(&key) {
      return Ok(cached.clone());
    }

    let target = self.resolve(declared, Some(dependent.label()))?;
    let effective = match provides::substitute(self.policy, dependent.requires(), target.provides()) {
      Some(substitute) => {
        debug!(
          dependent = %dependent.label(),
          declared = %declared,
          effective = %substitute,
          "requires/provides substitution"
        );
        substitute.clone()
      }
      None => declared.clone(),
    };

    let resolved = self.resolve(&effective, Some(dependent.label()))?;
    access::check_access(dependent, &resolved)?;

    // First resolution wins; later changes to provides only affect new pairs.
    let mut edges = lock(&self.edges);
    Ok(edges.entry(key).or_insert(effective).clone())
  }

  /// The effective dependencies of `label`.
  ///
  /// Each declared (or late) dependency goes through requires/provides
  /// substitution; the exported dependencies of every effective dependency are
  /// then added transitively, substituted by the same requiring target.
  pub fn resolve_edges(&self, label: &Label) -> Result<Vec<Label>, DependencyError> {
    let target = self.resolve(label, None)?;
    let mut result = Vec::new();
    let mut seen = HashSet::new();

    for dep in target.dependencies() {
      let effective = self.effective_dependency(&target, &dep.label)?;
      self.push_with_exports(&target, effective, &mut result, &mut seen)?;
    }

    Ok(result)
  }

  fn push_with_exports(
    &self,
    dependent: &BuildTarget,
    effective: Label,
    result: &mut Vec<Label>,
    seen: &mut HashSet<Label>,
  ) -> Result<(), DependencyError> {
    if effective == *dependent.label() || !seen.insert(effective.clone()) {
      return Ok(());
    }
    let target = self.resolve(&effective, Some(dependent.label()))?;
    result.push(effective);

    let exported: Vec<Dependency> = target.dependencies().into_iter().filter(|d| d.exported).collect();
    for dep in exported {
      let next = self.effective_dependency(dependent, &dep.label)?;
      self.push_with_exports(dependent, next, result, seen)?;
    }
    Ok(())
  }

  /// Mark everything reachable from `roots` as active.
  ///
  /// Returns the reachable labels in dependency order (dependencies first).
  /// Fails if any reachable label is missing or the reachable subgraph has a
  /// cycle.
  pub fn activate(&self, roots: &[Label]) -> Result<Vec<Label>, DependencyError> {
    let mut order: Vec<Label> = Vec::new();
    let mut edges: Vec<(Label, Label)> = Vec::new();
    let mut seen: HashSet<Label> = HashSet::new();
    let mut stack: Vec<Label> = roots.iter().rev().cloned().collect();

    while let Some(label) = stack.pop() {
      if !seen.insert(label.clone()) {
        continue;
      }
      let deps = self.resolve_edges(&label)?;
      for dep in deps.iter().rev() {
        edges.push((dep.clone(), label.clone()));
        stack.push(dep.clone());
      }
      order.push(label);
    }

    let sorted = self.check_acyclic(&order, &edges)?;
    for label in &sorted {
      if let Some(target) = self.target(label)
        && target.state() == TargetState::Inactive
        && let Err(e) = target.transition(TargetState::Active)
      {
        warn!(label = %label, error = %e, "cannot activate target");
      }
    }
    info!(targets = sorted.len(), "activated build targets");
    Ok(sorted)
  }

  fn check_acyclic(&self, nodes: &[Label], edges: &[(Label, Label)]) -> Result<Vec<Label>, DependencyError> {
    let mut graph: DiGraph<Label, ()> = DiGraph::new();
    let mut index: HashMap<&Label, NodeIndex> = HashMap::new();
    for label in nodes {
      index.insert(label, graph.add_node(label.clone()));
    }
    for (from, to) in edges {
      if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
        graph.add_edge(a, b, ());
      }
    }

    match toposort(&graph, None) {
      Ok(sorted) => Ok(sorted.into_iter().map(|idx| graph[idx].clone()).collect()),
      Err(_) => {
        let cycle = tarjan_scc(&graph)
          .into_iter()
          .find(|scc| scc.len() > 1 || scc.iter().any(|&n| graph.contains_edge(n, n)))
          .unwrap_or_default();
        // tarjan_scc yields members in reverse dependency order.
        let mut labels: Vec<Label> = cycle.into_iter().map(|idx| graph[idx].clone()).collect();
        labels.reverse();
        Err(DependencyError::Cycle { labels })
      }
    }
  }

  /// Whether `goal` is reachable from `start` through effective edges.
  ///
  /// Only the subgraph below `start` is visited. Unresolvable edges cannot
  /// close a cycle and are skipped.
  fn reaches(&self, start: &Label, goal: &Label) -> Option<Vec<Label>> {
    let mut stack = vec![(start.clone(), vec![start.clone()])];
    let mut seen = HashSet::new();
    while let Some((label, path)) = stack.pop() {
      if label == *goal {
        return Some(path);
      }
      if !seen.insert(label.clone()) {
        continue;
      }
      for dep in self.resolve_edges(&label).unwrap_or_default() {
        let mut next = path.clone();
        next.push(dep.clone());
        stack.push((dep, next));
      }
    }
    None
  }

  /// A cycle passing through `label`, if one exists.
  fn cycle_through(&self, label: &Label) -> Option<Vec<Label>> {
    for dep in self.resolve_edges(label).unwrap_or_default() {
      if let Some(mut path) = self.reaches(&dep, label) {
        path.pop();
        path.insert(0, label.clone());
        return Some(path);
      }
    }
    None
  }

  /// Add a dependency edge at runtime.
  ///
  /// The edge goes through requires/provides substitution like any declared
  /// edge. Fails if `from` already finished, if `to` cannot be found, or if
  /// the edge would close a cycle.
  pub fn add_dependency(&self, from: &Label, to: &Label) -> Result<Label, GraphMutationError> {
    let _guard = lock(&self.mutation);

    let source = self
      .target(from)
      .ok_or_else(|| GraphMutationError::UnknownTarget { label: from.clone() })?;
    if source.state().is_terminal() {
      return Err(GraphMutationError::AlreadyComplete { label: from.clone() });
    }

    self.resolve(to, Some(from)).map_err(|e| match e {
      DependencyError::Missing { .. } => GraphMutationError::UnknownTarget { label: to.clone() },
      other => GraphMutationError::InvalidTarget {
        label: to.clone(),
        source: other,
      },
    })?;

    let effective = self
      .effective_dependency(&source, to)
      .map_err(|source| GraphMutationError::InvalidTarget {
        label: to.clone(),
        source,
      })?;

    if effective == *from || self.reaches(&effective, from).is_some() {
      return Err(GraphMutationError::Cycle {
        from: from.clone(),
        to: effective,
      });
    }

    source.push_late_dependency(Dependency::new(to.clone()));
    lock(&self.properties).retain(|(label, _), _| label != from);
    info!(from = %from, to = %effective, "dependency added");

    if let Some(observer) = lock(&self.observer).as_ref() {
      let event = GraphEvent::DependencyAdded {
        from: from.clone(),
        to: effective.clone(),
      };
      if observer.send(event).is_err() {
        warn!(from = %from, "scheduler went away before dependency was announced");
      }
    }

    Ok(effective)
  }

  /// Tags of `namespace` from the transitive effective dependencies of
  /// `label`, computed once per build.
  pub fn collect_properties(&self, label: &Label, namespace: &str) -> Result<Arc<PropertySet>, DependencyError> {
    let key = (label.clone(), namespace.to_string());
    if let Some(cached) = lock(&self.properties).get(&key) {
      return Ok(cached.clone());
    }

    let mut set = PropertySet::new(namespace);
    let mut seen: HashSet<Label> = HashSet::new();
    let mut stack: Vec<Label> = self.resolve_edges(label)?.into_iter().rev().collect();
    while let Some(dep) = stack.pop() {
      if !seen.insert(dep.clone()) {
        continue;
      }
      let target = self.resolve(&dep, Some(label))?;
      set.extend_from_tags(&target.descriptor().labels);
      for next in self.resolve_edges(&dep)?.into_iter().rev() {
        stack.push(next);
      }
    }

    let set = Arc::new(set);
    lock(&self.properties).insert(key, set.clone());
    Ok(set)
  }

  /// Route structural events to a running scheduler.
  pub fn attach_observer(&self, observer: UnboundedSender<GraphEvent>) {
    let _guard = lock(&self.mutation);
    *lock(&self.observer) = Some(observer);
  }

  pub fn detach_observer(&self) {
    let _guard = lock(&self.mutation);
    *lock(&self.observer) = None;
  }

  /// Forget per-build state so the graph can be built again.
  ///
  /// Hooks run again on the next build, so targets and dependencies they
  /// added are dropped along with resolved edges and collected properties.
  pub fn reset(&self) {
    let _guard = lock(&self.mutation);
    lock(&self.edges).clear();
    lock(&self.properties).clear();
    let dynamic = std::mem::take(&mut *lock(&self.dynamic));
    let mut targets = self.write_targets();
    for label in &dynamic {
      targets.remove(label);
    }
    for target in targets.values() {
      target.reset();
    }
  }
}
