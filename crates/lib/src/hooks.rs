//! Pre- and post-build callbacks.
//!
//! Hooks see a target through a context object. The contexts expose only the
//! controlled operations: reading collected properties and rewriting
//! commands before a build, registering outputs and growing the graph
//! through [`BuildGraph::add_target`] / [`BuildGraph::add_dependency`] after
//! one.
//!
//! Closures with the right signature implement the hook traits directly:
//!
//! ```ignore
//! let desc = TargetDescriptor::new(label).with_post_build(|ctx: &mut PostBuildContext, stdout: &str| {
//!   for line in stdout.lines() {
//!     ctx.add_output(line);
//!   }
//!   Ok(())
//! });
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::graph::{BuildGraph, DependencyError, GraphMutationError, PropertySet};
use crate::label::Label;
use crate::target::{BuildTarget, TargetDescriptor, TestResults};

#[derive(Debug, Error)]
pub enum HookError {
  #[error(transparent)]
  Mutation(#[from] GraphMutationError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error("{0}")]
  Failed(String),
}

impl HookError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }
}

/// Runs before a target's command executes.
pub trait PreBuildHook: Send + Sync {
  fn pre_build(&self, ctx: &mut PreBuildContext) -> Result<(), HookError>;
}

/// Runs after a target's command succeeded, with its captured stdout.
pub trait PostBuildHook: Send + Sync {
  fn post_build(&self, ctx: &mut PostBuildContext, stdout: &str) -> Result<(), HookError>;
}

impl<F> PreBuildHook for F
where
  F: Fn(&mut PreBuildContext) -> Result<(), HookError> + Send + Sync,
{
  fn pre_build(&self, ctx: &mut PreBuildContext) -> Result<(), HookError> {
    self(ctx)
  }
}

impl<F> PostBuildHook for F
where
  F: Fn(&mut PostBuildContext, &str) -> Result<(), HookError> + Send + Sync,
{
  fn post_build(&self, ctx: &mut PostBuildContext, stdout: &str) -> Result<(), HookError> {
    self(ctx, stdout)
  }
}

pub struct PreBuildContext {
  graph: Arc<BuildGraph>,
  target: Arc<BuildTarget>,
  profile: String,
  commands: BTreeMap<String, String>,
}

impl PreBuildContext {
  pub(crate) fn new(graph: Arc<BuildGraph>, target: Arc<BuildTarget>, profile: &str) -> Self {
    let commands = target.commands_snapshot();
    Self {
      graph,
      target,
      profile: profile.to_string(),
      commands,
    }
  }

  pub fn label(&self) -> &Label {
    self.target.label()
  }

  /// The active build profile.
  pub fn profile(&self) -> &str {
    &self.profile
  }

  /// Tags of `namespace` collected from the target's transitive dependencies.
  pub fn properties(&self, namespace: &str) -> Result<Arc<PropertySet>, HookError> {
    Ok(self.graph.collect_properties(self.target.label(), namespace)?)
  }

  /// The command for `profile` as it currently stands.
  pub fn command(&self, profile: &str) -> Option<&str> {
    self.commands.get(profile).map(String::as_str)
  }

  /// Every profile's command as it currently stands.
  pub fn commands(&self) -> &BTreeMap<String, String> {
    &self.commands
  }

  pub fn set_command(&mut self, profile: &str, command: impl Into<String>) {
    self.commands.insert(profile.to_string(), command.into());
  }

  /// Write the (possibly rewritten) commands back to the target.
  pub(crate) fn finish(self) {
    if self.commands != self.target.commands_snapshot() {
      debug!(label = %self.target.label(), "pre-build hook rewrote commands");
      self.target.replace_commands(self.commands);
    }
  }
}

pub struct PostBuildContext {
  graph: Arc<BuildGraph>,
  target: Arc<BuildTarget>,
  test_results: Option<TestResults>,
  mutation_error: Option<GraphMutationError>,
}

impl PostBuildContext {
  pub(crate) fn new(graph: Arc<BuildGraph>, target: Arc<BuildTarget>) -> Self {
    Self {
      graph,
      target,
      test_results: None,
      mutation_error: None,
    }
  }

  pub fn label(&self) -> &Label {
    self.target.label()
  }

  /// Register an output discovered while building, relative to the build
  /// directory.
  pub fn add_output(&mut self, output: impl Into<String>) {
    self.target.add_discovered_output(output.into());
  }

  /// Insert a new target into the running build.
  pub fn add_target(&mut self, descriptor: TargetDescriptor) -> Result<Label, HookError> {
    let target = self.graph.add_target(descriptor)?;
    Ok(target.label().clone())
  }

  /// Make the current target depend on `to`.
  ///
  /// Returns the effective label after requires/provides substitution. The
  /// current target does not finish until `to` has.
  pub fn add_dependency(&mut self, to: &Label) -> Result<Label, HookError> {
    match self.graph.add_dependency(self.target.label(), to) {
      Ok(effective) => Ok(effective),
      Err(e) => {
        self.mutation_error.get_or_insert_with(|| e.clone());
        Err(e.into())
      }
    }
  }

  /// Report results for a test target.
  pub fn set_test_results(&mut self, num_tests: u32, failed: u32) {
    self.test_results = Some(TestResults {
      num_tests,
      failed,
      cached: false,
    });
  }

  pub(crate) fn into_parts(self) -> (Option<TestResults>, Option<GraphMutationError>) {
    (self.test_results, self.mutation_error)
  }
}
