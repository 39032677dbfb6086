//! Building a single target.
//!
//! A worker takes one dispatched target through the build pipeline: pre-build
//! hook, fingerprint, cache lookup, and on a miss the action, post-build hook,
//! output collection, test results, hash verification, cache store and
//! install. It never touches target state; the coordinator applies the result.
//!
//! A target that gained late dependencies in its post-build hook comes back
//! [`Attempt::Staged`]. Nothing is stored or installed until the coordinator
//! calls [`publish`] once those dependencies have succeeded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::types::{BuildError, FailureCause};
use crate::cache::{Artifact, ArtifactMetadata, Cache, CacheError, Fingerprint, StoreOutcome, fingerprint_target};
use crate::config::{BuildConfig, VerificationMode};
use crate::execute::{BuildExecutor, ExecuteError};
use crate::graph::{BuildGraph, GraphMutationError};
use crate::hooks::{HookError, PostBuildContext, PreBuildContext};
use crate::label::Label;
use crate::target::{BuildTarget, TargetState, TestResults};
use crate::util::hash::ContentHash;
use crate::util::lock;

/// Everything workers share for the lifetime of a scheduler.
pub(super) struct Shared {
  pub graph: Arc<BuildGraph>,
  pub cache: Arc<dyn Cache>,
  pub executor: BuildExecutor,
  pub config: BuildConfig,
  /// Output digests of targets built earlier in this session.
  pub previous: Mutex<HashMap<Label, ContentHash>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Success {
  pub state: TargetState,
  pub cache_hit: bool,
}

/// A built artifact that is neither cached nor installed yet.
#[derive(Debug)]
pub(super) struct Staged {
  fingerprint: Fingerprint,
  artifact: Artifact,
}

#[derive(Debug)]
pub(super) enum Attempt {
  Finished(Success),
  /// Waits for late dependencies before [`publish`].
  Staged(Staged),
}

#[derive(Debug)]
pub(super) enum Failure {
  /// May succeed if attempted again.
  Retryable(FailureCause),
  /// Fails the target.
  Terminal(FailureCause),
  /// Fails the target and stops the build.
  Fatal(FailureCause, BuildError),
}

/// Run the pipeline for one attempt at `target`.
pub(super) async fn build_target(shared: &Shared, target: &Arc<BuildTarget>) -> Result<Attempt, Failure> {
  let label = target.label();
  let profile = shared.config.profile.as_str();

  // Each attempt starts from the declared commands and no discovered outputs.
  target.replace_commands(target.descriptor().commands.clone());
  target.clear_discovered_outputs();

  if let Some(hook) = target.hooks().pre_build.clone() {
    let mut ctx = PreBuildContext::new(shared.graph.clone(), target.clone(), profile);
    hook.pre_build(&mut ctx).map_err(|e| hook_failure(label, e))?;
    ctx.finish();
  }

  let fingerprint = fingerprint_target(&shared.graph, target, &shared.config.root, profile).map_err(|e| {
    Failure::Terminal(FailureCause::Fingerprint { message: e.to_string() })
  })?;
  target.set_fingerprint(fingerprint.clone());

  match shared.cache.lookup(&fingerprint).await {
    Ok(Some(artifact)) => return restore(shared, target, artifact).await.map(Attempt::Finished),
    Ok(None) => debug!(label = %label, fingerprint = %fingerprint, "cache miss"),
    Err(e) if e.is_corruption() => return Err(corruption(label, e)),
    Err(e) => warn!(label = %label, error = %e, "cache lookup failed, building instead"),
  }

  let output = shared.executor.execute(target, profile).await.map_err(action_failure)?;

  let mut results = None;
  if let Some(hook) = target.hooks().post_build.clone() {
    let mut ctx = PostBuildContext::new(shared.graph.clone(), target.clone());
    let outcome = hook.post_build(&mut ctx, &output.stdout);
    let (reported, mutation) = ctx.into_parts();
    if let Some(source) = mutation {
      return Err(mutation_failure(label, source));
    }
    outcome.map_err(|e| hook_failure(label, e))?;
    results = reported;
  }

  let files = shared.executor.collect_outputs(target, profile).map_err(action_failure)?;
  let artifact = Artifact::new(files);

  let results = if target.is_test() {
    let results = results.unwrap_or(TestResults {
      num_tests: 1,
      failed: 0,
      cached: false,
    });
    target.set_results(results.clone());
    if results.failed > 0 {
      return Err(Failure::Retryable(FailureCause::TestsFailed {
        failed: results.failed,
        total: results.num_tests,
      }));
    }
    results
  } else {
    let results = results.unwrap_or_default();
    target.set_results(results.clone());
    results
  };

  verify_hashes(shared, target, &artifact.digest)?;

  let staged = Staged {
    fingerprint,
    artifact: artifact.with_metadata(ArtifactMetadata {
      label: Some(label.clone()),
      results,
    }),
  };
  if target.has_late_dependencies() {
    debug!(label = %label, digest = %staged.artifact.digest, "built, publishing after late dependencies");
    return Ok(Attempt::Staged(staged));
  }
  publish(shared, target, staged).await.map(Attempt::Finished)
}

/// Store and install a built artifact.
pub(super) async fn publish(shared: &Shared, target: &BuildTarget, staged: Staged) -> Result<Success, Failure> {
  let label = target.label();
  let Staged { fingerprint, artifact } = staged;

  store(shared, label, &fingerprint, &artifact).await?;
  shared
    .executor
    .install(label, &artifact.files)
    .await
    .map_err(|e| Failure::Terminal(FailureCause::Action { message: e.to_string() }))?;
  target.set_output_hash(artifact.digest.clone());

  let state = match lock(&shared.previous).insert(label.clone(), artifact.digest.clone()) {
    Some(digest) if digest == artifact.digest => TargetState::Reused,
    _ => TargetState::Built,
  };
  info!(label = %label, state = %state, digest = %artifact.digest, "target built");
  Ok(Success { state, cache_hit: false })
}

/// Install a cached artifact instead of building.
async fn restore(shared: &Shared, target: &BuildTarget, artifact: Artifact) -> Result<Success, Failure> {
  let label = target.label();
  // Pins may have changed since the entry was stored.
  verify_hashes(shared, target, &artifact.digest)?;
  shared
    .executor
    .install(label, &artifact.files)
    .await
    .map_err(|e| Failure::Terminal(FailureCause::Action { message: e.to_string() }))?;

  target.set_output_hash(artifact.digest.clone());
  let mut results = artifact.metadata.results;
  results.cached = true;
  target.set_results(results);

  lock(&shared.previous).insert(label.clone(), artifact.digest.clone());
  info!(label = %label, digest = %artifact.digest, "restored from cache");
  Ok(Success {
    state: TargetState::Cached,
    cache_hit: true,
  })
}

async fn store(shared: &Shared, label: &Label, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<(), Failure> {
  match shared.cache.store(fingerprint, artifact).await {
    Ok(StoreOutcome::Stored) => debug!(label = %label, fingerprint = %fingerprint, "stored in cache"),
    Ok(StoreOutcome::AlreadyPresent) => debug!(label = %label, "cache entry already present"),
    Err(e) if e.is_corruption() => return Err(corruption(label, e)),
    Err(e) => warn!(label = %label, error = %e, "failed to store cache entry"),
  }
  Ok(())
}

fn verify_hashes(shared: &Shared, target: &BuildTarget, digest: &ContentHash) -> Result<(), Failure> {
  let accepted = &target.descriptor().accepted_hashes;
  if accepted.is_empty() || accepted.iter().any(|h| digest.matches(h)) {
    return Ok(());
  }
  match shared.config.verification {
    VerificationMode::Strict => Err(Failure::Terminal(FailureCause::HashMismatch { digest: digest.clone() })),
    VerificationMode::Lenient => {
      warn!(
        label = %target.label(),
        digest = %digest,
        accepted = ?accepted,
        "output hash not accepted, continuing"
      );
      Ok(())
    }
  }
}

fn action_failure(error: ExecuteError) -> Failure {
  let message = error.to_string();
  if error.is_timeout() {
    Failure::Retryable(FailureCause::Timeout { message })
  } else {
    Failure::Retryable(FailureCause::Action { message })
  }
}

fn hook_failure(label: &Label, error: HookError) -> Failure {
  match error {
    HookError::Mutation(source) => mutation_failure(label, source),
    HookError::Dependency(source) => Failure::Fatal(
      FailureCause::Dependency { message: source.to_string() },
      BuildError::Dependency(source),
    ),
    HookError::Failed(message) => Failure::Terminal(FailureCause::Hook { message }),
  }
}

fn mutation_failure(label: &Label, source: GraphMutationError) -> Failure {
  Failure::Fatal(
    FailureCause::GraphMutation { message: source.to_string() },
    BuildError::GraphMutation {
      label: label.clone(),
      source,
    },
  )
}

fn corruption(label: &Label, source: CacheError) -> Failure {
  Failure::Fatal(
    FailureCause::Cache { message: source.to_string() },
    BuildError::CacheCorruption {
      label: label.clone(),
      source,
    },
  )
}
