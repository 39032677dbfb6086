use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::Fingerprint;
use crate::consts::DEFAULT_PROFILE_KEY;
use crate::hooks::{PostBuildHook, PreBuildHook};
use crate::label::Label;
use crate::util::hash::ContentHash;
use crate::util::lock;

use super::state::{StateError, TargetState};

/// A declared dependency edge.
///
/// Exported dependencies propagate: anything depending on this target also
/// depends on the exported label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct Dependency {
  pub label: Label,
  #[serde(default)]
  pub exported: bool,
}

impl Dependency {
  pub fn new(label: Label) -> Self {
    Self { label, exported: false }
  }

  pub fn exported(label: Label) -> Self {
    Self { label, exported: true }
  }
}

/// Accepts either `"//pkg:name"` or `{ "label": "//pkg:name", "exported": true }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
  Bare(Label),
  Full {
    label: Label,
    #[serde(default)]
    exported: bool,
  },
}

impl From<DependencyRepr> for Dependency {
  fn from(repr: DependencyRepr) -> Self {
    match repr {
      DependencyRepr::Bare(label) => Dependency::new(label),
      DependencyRepr::Full { label, exported } => Dependency { label, exported },
    }
  }
}

/// Pre- and post-build callbacks attached to a target.
///
/// Hooks are code, not data, so they are attached programmatically and never
/// serialized.
#[derive(Clone, Default)]
pub struct Hooks {
  pub pre_build: Option<Arc<dyn PreBuildHook>>,
  pub post_build: Option<Arc<dyn PostBuildHook>>,
}

impl fmt::Debug for Hooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hooks")
      .field("pre_build", &self.pre_build.is_some())
      .field("post_build", &self.post_build.is_some())
      .finish()
  }
}

/// A target as delivered by the rule-definition collaborator.
///
/// # Example
///
/// ```json
/// {
///   "label": "//src/app:bin",
///   "sources": ["src/app/main.c"],
///   "outputs": ["app"],
///   "deps": ["//src/lib:lib", { "label": "//src/proto:proto", "exported": true }],
///   "commands": { "opt": "cc -O2 -o $OUT $SRCS", "dbg": "cc -g -o $OUT $SRCS" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
  pub label: Label,
  /// Source paths relative to the repository root (files or directories).
  #[serde(default)]
  pub sources: Vec<String>,
  /// Declared outputs relative to the build directory.
  #[serde(default)]
  pub outputs: Vec<String>,
  /// Glob patterns for outputs that may or may not be produced.
  #[serde(default)]
  pub optional_outputs: Vec<String>,
  #[serde(default)]
  pub deps: Vec<Dependency>,
  /// Capability tags wanted from dependencies, in priority order.
  #[serde(default)]
  pub requires: Vec<String>,
  /// Capability tag -> label substituted for requiring dependents.
  #[serde(default)]
  pub provides: BTreeMap<String, Label>,
  /// Free-form namespaced tags, collected transitively by dependents.
  #[serde(default)]
  pub labels: Vec<String>,
  /// Build profile -> command.
  #[serde(default)]
  pub commands: BTreeMap<String, String>,
  /// If non-empty, the output digest must match one of these.
  #[serde(default)]
  pub accepted_hashes: Vec<String>,
  #[serde(default)]
  pub test_only: bool,
  #[serde(default)]
  pub visibility: Vec<String>,
  /// Whether the target is a test whose results decide success.
  #[serde(default)]
  pub test: bool,
  /// Retry budget for failed attempts; zero means not flaky.
  #[serde(default)]
  pub flaky: u32,
  #[serde(default)]
  pub timeout_secs: Option<u64>,
  #[serde(skip)]
  pub hooks: Hooks,
}

impl TargetDescriptor {
  pub fn new(label: Label) -> Self {
    Self {
      label,
      sources: Vec::new(),
      outputs: Vec::new(),
      optional_outputs: Vec::new(),
      deps: Vec::new(),
      requires: Vec::new(),
      provides: BTreeMap::new(),
      labels: Vec::new(),
      commands: BTreeMap::new(),
      accepted_hashes: Vec::new(),
      test_only: false,
      visibility: Vec::new(),
      test: false,
      flaky: 0,
      timeout_secs: None,
      hooks: Hooks::default(),
    }
  }

  pub fn with_dep(mut self, label: Label) -> Self {
    self.deps.push(Dependency::new(label));
    self
  }

  pub fn with_exported_dep(mut self, label: Label) -> Self {
    self.deps.push(Dependency::exported(label));
    self
  }

  pub fn with_command(mut self, profile: &str, cmd: &str) -> Self {
    self.commands.insert(profile.to_string(), cmd.to_string());
    self
  }

  pub fn with_source(mut self, source: &str) -> Self {
    self.sources.push(source.to_string());
    self
  }

  pub fn with_output(mut self, output: &str) -> Self {
    self.outputs.push(output.to_string());
    self
  }

  pub fn with_requires(mut self, tag: &str) -> Self {
    self.requires.push(tag.to_string());
    self
  }

  pub fn with_provides(mut self, tag: &str, label: Label) -> Self {
    self.provides.insert(tag.to_string(), label);
    self
  }

  pub fn with_label(mut self, tag: &str) -> Self {
    self.labels.push(tag.to_string());
    self
  }

  pub fn with_pre_build(mut self, hook: impl PreBuildHook + 'static) -> Self {
    self.hooks.pre_build = Some(Arc::new(hook));
    self
  }

  pub fn with_post_build(mut self, hook: impl PostBuildHook + 'static) -> Self {
    self.hooks.post_build = Some(Arc::new(hook));
    self
  }
}

/// Results recorded for a target after execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
  pub num_tests: u32,
  pub failed: u32,
  pub cached: bool,
}

/// A node of the build graph.
///
/// The descriptor part is fixed once the target is added; everything that
/// changes during a build lives behind per-target locks so that unrelated
/// targets never contend.
#[derive(Debug)]
pub struct BuildTarget {
  label: Label,
  descriptor: TargetDescriptor,
  state: Mutex<TargetState>,
  commands: Mutex<BTreeMap<String, String>>,
  late_deps: Mutex<Vec<Dependency>>,
  discovered_outputs: Mutex<Vec<String>>,
  results: Mutex<TestResults>,
  fingerprint: Mutex<Option<Fingerprint>>,
  output_hash: Mutex<Option<ContentHash>>,
}

impl BuildTarget {
  pub(crate) fn new(descriptor: TargetDescriptor) -> Self {
    let label = descriptor.label.clone();
    let commands = descriptor.commands.clone();
    Self {
      label,
      descriptor,
      state: Mutex::new(TargetState::Inactive),
      commands: Mutex::new(commands),
      late_deps: Mutex::new(Vec::new()),
      discovered_outputs: Mutex::new(Vec::new()),
      results: Mutex::new(TestResults::default()),
      fingerprint: Mutex::new(None),
      output_hash: Mutex::new(None),
    }
  }

  pub fn label(&self) -> &Label {
    &self.label
  }

  pub fn descriptor(&self) -> &TargetDescriptor {
    &self.descriptor
  }

  pub fn hooks(&self) -> &Hooks {
    &self.descriptor.hooks
  }

  pub fn state(&self) -> TargetState {
    *lock(&self.state)
  }

  /// Move to `next`, rejecting transitions the state machine does not allow.
  pub fn transition(&self, next: TargetState) -> Result<TargetState, StateError> {
    let mut state = lock(&self.state);
    if !state.can_transition_to(next) {
      return Err(StateError { from: *state, to: next });
    }
    let previous = *state;
    *state = next;
    Ok(previous)
  }

  /// Declared plus late dependencies, in insertion order.
  pub fn dependencies(&self) -> Vec<Dependency> {
    let mut deps = self.descriptor.deps.clone();
    deps.extend(lock(&self.late_deps).iter().cloned());
    deps
  }

  pub(crate) fn push_late_dependency(&self, dep: Dependency) {
    lock(&self.late_deps).push(dep);
  }

  pub fn has_late_dependencies(&self) -> bool {
    !lock(&self.late_deps).is_empty()
  }

  /// The command for `profile`, falling back to the `default` entry.
  pub fn command_for(&self, profile: &str) -> Option<String> {
    let commands = lock(&self.commands);
    commands
      .get(profile)
      .or_else(|| commands.get(DEFAULT_PROFILE_KEY))
      .cloned()
  }

  pub(crate) fn commands_snapshot(&self) -> BTreeMap<String, String> {
    lock(&self.commands).clone()
  }

  pub(crate) fn replace_commands(&self, commands: BTreeMap<String, String>) {
    *lock(&self.commands) = commands;
  }

  /// Declared outputs plus outputs registered by a post-build hook.
  pub fn outputs(&self) -> Vec<String> {
    let mut outputs = self.descriptor.outputs.clone();
    for extra in lock(&self.discovered_outputs).iter() {
      if !outputs.contains(extra) {
        outputs.push(extra.clone());
      }
    }
    outputs
  }

  pub(crate) fn add_discovered_output(&self, output: String) {
    lock(&self.discovered_outputs).push(output);
  }

  pub(crate) fn clear_discovered_outputs(&self) {
    lock(&self.discovered_outputs).clear();
  }

  pub fn results(&self) -> TestResults {
    lock(&self.results).clone()
  }

  pub(crate) fn set_results(&self, results: TestResults) {
    *lock(&self.results) = results;
  }

  pub fn fingerprint(&self) -> Option<Fingerprint> {
    lock(&self.fingerprint).clone()
  }

  pub(crate) fn set_fingerprint(&self, fingerprint: Fingerprint) {
    *lock(&self.fingerprint) = Some(fingerprint);
  }

  pub fn output_hash(&self) -> Option<ContentHash> {
    lock(&self.output_hash).clone()
  }

  pub(crate) fn set_output_hash(&self, hash: ContentHash) {
    *lock(&self.output_hash) = Some(hash);
  }

  /// Capability tags provided by this target.
  pub fn provides(&self) -> &BTreeMap<String, Label> {
    &self.descriptor.provides
  }

  pub fn requires(&self) -> &[String] {
    &self.descriptor.requires
  }

  pub fn is_test(&self) -> bool {
    self.descriptor.test
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.descriptor.timeout_secs.map(Duration::from_secs)
  }

  /// Forget everything recorded by a previous build of this target,
  /// including dependencies added by its post-build hook.
  pub(crate) fn reset(&self) {
    *lock(&self.state) = TargetState::Inactive;
    *lock(&self.commands) = self.descriptor.commands.clone();
    lock(&self.late_deps).clear();
    lock(&self.discovered_outputs).clear();
    *lock(&self.results) = TestResults::default();
    *lock(&self.fingerprint) = None;
    *lock(&self.output_hash) = None;
  }
}
