//! Scheduling targets onto a bounded worker pool.
//!
//! [`Scheduler::run`] activates the requested targets and then drives a
//! single coordinator loop that owns all readiness bookkeeping: the unmet
//! dependencies of every entry, a reverse index of waiters, the ready queue
//! and the set of in-flight workers. Workers only build; the coordinator
//! applies their results, releases dependents and absorbs graph growth
//! reported by post-build hooks.

mod types;
mod worker;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use types::{BuildError, BuildSummary, FailureCause, RetryBudget, TargetOutcome};

use crate::cache::{Cache, DirCache};
use crate::config::{BuildConfig, FailureMode};
use crate::events::{BuildEvent, Reporter};
use crate::execute::{ActionRunner, BuildExecutor, ShellRunner};
use crate::graph::{BuildGraph, GraphEvent};
use crate::label::Label;
use crate::target::{BuildTarget, TargetState};
use worker::{Attempt, Failure, Shared, Staged, Success};

/// Builds targets of a graph, one `run` at a time.
///
/// A scheduler is a build session: output digests from earlier runs are
/// remembered so an identical rebuild ends in `Reused`.
pub struct Scheduler {
  shared: Arc<Shared>,
  reporter: Reporter,
}

impl std::fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scheduler")
      .field("parallelism", &self.shared.config.parallelism)
      .field("profile", &self.shared.config.profile)
      .finish()
  }
}

impl Scheduler {
  pub fn new(
    graph: Arc<BuildGraph>,
    cache: Arc<dyn Cache>,
    runner: Arc<dyn ActionRunner>,
    config: BuildConfig,
    reporter: Reporter,
  ) -> Self {
    let executor = BuildExecutor::new(
      config.root.clone(),
      config.out_dir.clone(),
      runner,
      config.path.clone(),
      config.action_timeout,
    );
    Self {
      shared: Arc::new(Shared {
        graph,
        cache,
        executor,
        config,
        previous: Mutex::new(HashMap::new()),
      }),
      reporter,
    }
  }

  /// A scheduler using the on-disk cache and shell runner named by `config`.
  pub fn from_config(graph: Arc<BuildGraph>, config: BuildConfig, reporter: Reporter) -> Self {
    let cache = Arc::new(DirCache::new(config.cache_dir.clone()));
    let runner = Arc::new(ShellRunner::new(config.shell.clone()));
    Self::new(graph, cache, runner, config, reporter)
  }

  pub fn graph(&self) -> &Arc<BuildGraph> {
    &self.shared.graph
  }

  pub fn config(&self) -> &BuildConfig {
    &self.shared.config
  }

  /// Build `roots` and everything they depend on.
  ///
  /// Target failures are reported in the summary. An `Err` means the build
  /// was aborted: activation failed, a hook made an illegal graph change or
  /// the cache is corrupt. Even then every activated target has reached a
  /// terminal state when this returns.
  pub async fn run(&self, roots: &[Label]) -> Result<BuildSummary, BuildError> {
    let started = Instant::now();
    let graph = &self.shared.graph;

    graph.reset();
    let order = graph.activate(roots)?;
    info!(
      roots = roots.len(),
      targets = order.len(),
      parallelism = self.shared.config.parallelism,
      profile = %self.shared.config.profile,
      "starting build"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    graph.attach_observer(tx);
    let mut run = Run::new(self, rx);
    run.register(&order);
    run.drive().await;
    graph.detach_observer();
    // Mutations that raced with the last completion.
    run.drain_events();
    run.cancel_remaining();

    let summary = BuildSummary {
      outcomes: run.outcomes,
      elapsed: started.elapsed(),
    };
    info!(
      built = summary.count(TargetState::Built),
      cached = summary.count(TargetState::Cached),
      reused = summary.count(TargetState::Reused),
      failed = summary.count(TargetState::Failed),
      elapsed = ?summary.elapsed,
      "build finished"
    );

    match run.fatal {
      Some(e) => Err(e),
      None => Ok(summary),
    }
  }
}

/// Scheduling entry of one activated target.
struct Entry {
  target: Arc<BuildTarget>,
  /// Unmet dependencies; for a `Building` target these are late ones.
  waiting_on: HashSet<Label>,
  retry: RetryBudget,
  attempts: u32,
  started: Option<Instant>,
  in_flight: bool,
  /// A finished attempt waiting for its late dependencies.
  held: Option<Attempt>,
}

/// Coordinator state for a single `run`.
struct Run<'a> {
  scheduler: &'a Scheduler,
  events: UnboundedReceiver<GraphEvent>,
  entries: HashMap<Label, Entry>,
  waiters: HashMap<Label, HashSet<Label>>,
  ready: VecDeque<Label>,
  workers: JoinSet<(Label, Result<Attempt, Failure>)>,
  outcomes: BTreeMap<Label, TargetOutcome>,
  fatal: Option<BuildError>,
  /// No new dispatches once set.
  stopped: bool,
}

impl<'a> Run<'a> {
  fn new(scheduler: &'a Scheduler, events: UnboundedReceiver<GraphEvent>) -> Self {
    Self {
      scheduler,
      events,
      entries: HashMap::new(),
      waiters: HashMap::new(),
      ready: VecDeque::new(),
      workers: JoinSet::new(),
      outcomes: BTreeMap::new(),
      fatal: None,
      stopped: false,
    }
  }

  fn graph(&self) -> &BuildGraph {
    &self.scheduler.shared.graph
  }

  async fn drive(&mut self) {
    loop {
      self.drain_events();
      self.dispatch();

      if self.workers.is_empty() {
        if !self.stopped && self.entries.values().any(|e| !e.target.state().is_terminal()) {
          warn!("no runnable targets left, cancelling the rest");
        }
        break;
      }

      match self.workers.join_next().await {
        Some(Ok((label, result))) => {
          self.drain_events();
          self.complete(label, result);
        }
        Some(Err(e)) => {
          error!(error = %e, "build worker panicked, stopping");
          self.stopped = true;
        }
        None => break,
      }
    }
  }

  /// Create entries for newly activated targets, dependencies first.
  fn register(&mut self, order: &[Label]) {
    for label in order {
      if self.entries.contains_key(label) {
        continue;
      }
      let Some(target) = self.graph().target(label) else {
        continue;
      };
      if target.state().is_terminal() {
        continue;
      }

      let deps = match self.graph().resolve_edges(label) {
        Ok(deps) => deps,
        Err(e) => {
          self.insert_entry(target);
          let cause = FailureCause::Dependency { message: e.to_string() };
          self.record_fatal(e.into());
          self.fail(label, cause);
          continue;
        }
      };

      let mut waiting_on = HashSet::new();
      let mut failed_dep = None;
      for dep in deps {
        match self.graph().target(&dep).map(|t| t.state()) {
          Some(state) if state.is_success() => {}
          Some(TargetState::Failed) => {
            failed_dep.get_or_insert(dep);
          }
          _ => {
            waiting_on.insert(dep);
          }
        }
      }

      self.insert_entry(target);
      if let Some(dependency) = failed_dep {
        self.fail(label, FailureCause::DependencyFailed { dependency });
      } else if waiting_on.is_empty() {
        self.make_ready(label);
      } else {
        for dep in &waiting_on {
          self.waiters.entry(dep.clone()).or_default().insert(label.clone());
        }
        if let Some(entry) = self.entries.get_mut(label) {
          entry.waiting_on = waiting_on;
        }
      }
    }
  }

  fn insert_entry(&mut self, target: Arc<BuildTarget>) {
    let retry = RetryBudget::new(target.descriptor().flaky);
    self.entries.insert(
      target.label().clone(),
      Entry {
        target,
        waiting_on: HashSet::new(),
        retry,
        attempts: 0,
        started: None,
        in_flight: false,
        held: None,
      },
    );
  }

  fn make_ready(&mut self, label: &Label) {
    let Some(entry) = self.entries.get(label) else {
      return;
    };
    if entry.target.state() == TargetState::Active
      && let Err(e) = entry.target.transition(TargetState::Pending)
    {
      warn!(label = %label, error = %e, "cannot mark target pending");
      return;
    }
    debug!(label = %label, "target ready");
    self.ready.push_back(label.clone());
  }

  fn dispatch(&mut self) {
    let parallelism = self.scheduler.shared.config.parallelism.max(1);
    while !self.stopped && self.workers.len() < parallelism {
      let Some(label) = self.ready.pop_front() else {
        break;
      };
      let Some(entry) = self.entries.get_mut(&label) else {
        continue;
      };
      // Released again once its new dependencies finish.
      if !entry.waiting_on.is_empty() || entry.target.state().is_terminal() {
        continue;
      }
      if entry.target.state() == TargetState::Pending
        && let Err(e) = entry.target.transition(TargetState::Building)
      {
        warn!(label = %label, error = %e, "cannot dispatch target");
        continue;
      }

      entry.attempts += 1;
      entry.in_flight = true;
      entry.started.get_or_insert_with(Instant::now);
      debug!(label = %label, attempt = entry.attempts, "dispatching");

      let shared = self.scheduler.shared.clone();
      let target = entry.target.clone();
      self.workers.spawn(async move {
        let result = worker::build_target(&shared, &target).await;
        (target.label().clone(), result)
      });
    }
  }

  /// Apply graph changes made by hooks since the last call.
  fn drain_events(&mut self) {
    while let Ok(event) = self.events.try_recv() {
      match event {
        GraphEvent::TargetAdded(label) => {
          debug!(label = %label, "absorbing added target");
          self.activate_added(&label);
        }
        GraphEvent::DependencyAdded { from, to } => {
          debug!(from = %from, to = %to, "absorbing added dependency");
          self.activate_added(&to);
          self.add_late_wait(&from, &to);
        }
      }
    }
  }

  fn activate_added(&mut self, label: &Label) {
    if self.entries.contains_key(label) {
      return;
    }
    if self.graph().target(label).is_some_and(|t| t.state().is_terminal()) {
      return;
    }
    match self.graph().activate(std::slice::from_ref(label)) {
      Ok(order) => self.register(&order),
      Err(e) => {
        error!(label = %label, error = %e, "cannot activate added target");
        self.record_fatal(e.into());
      }
    }
  }

  fn add_late_wait(&mut self, from: &Label, to: &Label) {
    let Some(entry) = self.entries.get(from) else {
      return;
    };
    if entry.target.state().is_terminal() {
      return;
    }
    match self.graph().target(to).map(|t| t.state()) {
      Some(state) if state.is_success() => {}
      Some(TargetState::Failed) => {
        self.fail(from, FailureCause::DependencyFailed { dependency: to.clone() });
      }
      _ => {
        if let Some(entry) = self.entries.get_mut(from) {
          entry.waiting_on.insert(to.clone());
        }
        self.waiters.entry(to.clone()).or_default().insert(from.clone());
      }
    }
  }

  /// Apply a worker result.
  fn complete(&mut self, label: Label, result: Result<Attempt, Failure>) {
    let stopped = self.stopped;
    let Some(entry) = self.entries.get_mut(&label) else {
      return;
    };
    entry.in_flight = false;
    if entry.target.state().is_terminal() {
      debug!(label = %label, "ignoring result for finished target");
      return;
    }

    match result {
      Ok(attempt) if entry.waiting_on.is_empty() => self.accept(&label, attempt),
      Ok(attempt) => {
        debug!(label = %label, waiting = entry.waiting_on.len(), "built, waiting on added dependencies");
        entry.held = Some(attempt);
      }
      Err(Failure::Retryable(cause)) => {
        if !stopped && entry.retry.try_consume() {
          warn!(
            label = %label,
            attempt = entry.attempts,
            retries_left = entry.retry.remaining(),
            cause = %cause,
            "flaky target failed, retrying"
          );
          self.ready.push_back(label);
        } else {
          self.fail(&label, cause);
        }
      }
      Err(Failure::Terminal(cause)) => self.fail(&label, cause),
      Err(Failure::Fatal(cause, e)) => {
        self.record_fatal(e);
        self.fail(&label, cause);
      }
    }
  }

  fn accept(&mut self, label: &Label, attempt: Attempt) {
    match attempt {
      Attempt::Finished(success) => self.succeed(label, success),
      Attempt::Staged(staged) => self.publish(label, staged),
    }
  }

  /// Cache and install a staged build now that its late dependencies are done.
  fn publish(&mut self, label: &Label, staged: Staged) {
    let Some(entry) = self.entries.get_mut(label) else {
      return;
    };
    entry.in_flight = true;
    debug!(label = %label, "publishing staged build");

    let shared = self.scheduler.shared.clone();
    let target = entry.target.clone();
    self.workers.spawn(async move {
      let result = worker::publish(&shared, &target, staged).await.map(Attempt::Finished);
      (target.label().clone(), result)
    });
  }

  fn succeed(&mut self, label: &Label, success: Success) {
    let Some(entry) = self.entries.get(label) else {
      return;
    };
    if let Err(e) = entry.target.transition(success.state) {
      warn!(label = %label, error = %e, "unexpected state on success");
    }
    info!(label = %label, state = %success.state, attempts = entry.attempts, "target finished");
    self.record(label, success.cache_hit, None);
    self.release(label);
  }

  /// Mark `label` failed and fail everything waiting on it.
  fn fail(&mut self, label: &Label, cause: FailureCause) {
    let Some(entry) = self.entries.get(label) else {
      return;
    };
    if entry.target.state().is_terminal() {
      return;
    }
    if let Err(e) = entry.target.transition(TargetState::Failed) {
      warn!(label = %label, error = %e, "unexpected state on failure");
    }

    if cause.is_root_cause() {
      error!(label = %label, attempts = entry.attempts, cause = %cause, "target failed");
      if self.scheduler.shared.config.failure_mode == FailureMode::Strict && !self.stopped {
        info!("stopping dispatch after failure");
        self.stopped = true;
      }
    } else {
      debug!(label = %label, cause = %cause, "target skipped");
    }
    self.record(label, false, Some(cause));

    let waiters = self.waiters.remove(label).unwrap_or_default();
    let mut waiters = waiters.into_iter().collect::<Vec<_>>();
    waiters.sort();
    for waiter in waiters {
      self.fail(&waiter, FailureCause::DependencyFailed { dependency: label.clone() });
    }
  }

  /// `label` succeeded: wake whatever was waiting on it.
  fn release(&mut self, label: &Label) {
    let Some(waiters) = self.waiters.remove(label) else {
      return;
    };
    let mut waiters = waiters.into_iter().collect::<Vec<_>>();
    waiters.sort();

    for waiter in waiters {
      let Some(entry) = self.entries.get_mut(&waiter) else {
        continue;
      };
      entry.waiting_on.remove(label);
      if !entry.waiting_on.is_empty() {
        continue;
      }
      match entry.target.state() {
        TargetState::Active => self.make_ready(&waiter),
        TargetState::Pending => self.ready.push_back(waiter),
        TargetState::Building => {
          if let Some(attempt) = entry.held.take() {
            self.accept(&waiter, attempt);
          } else if !entry.in_flight {
            // A retry that picked up new dependencies on an earlier attempt.
            self.ready.push_back(waiter);
          }
        }
        _ => {}
      }
    }
  }

  fn record(&mut self, label: &Label, cache_hit: bool, cause: Option<FailureCause>) {
    let Some(entry) = self.entries.get(label) else {
      return;
    };
    let target = &entry.target;
    let state = target.state();
    let duration = entry.started.map(|s| s.elapsed()).unwrap_or(Duration::ZERO);
    let results = target.results();
    let tests = (target.is_test() || results.num_tests > 0).then_some(results);

    self.scheduler.reporter.emit(BuildEvent {
      label: label.clone(),
      state,
      elapsed: duration,
      cache_hit,
      attempts: entry.attempts,
      tests: tests.clone(),
    });
    self.outcomes.insert(
      label.clone(),
      TargetOutcome {
        state,
        duration,
        attempts: entry.attempts,
        cache_hit,
        cause,
        tests,
        output_hash: target.output_hash(),
      },
    );
  }

  fn record_fatal(&mut self, error: BuildError) {
    self.stopped = true;
    if self.fatal.is_none() {
      error!(error = %error, "aborting build");
      self.fatal = Some(error);
    }
  }

  /// Fail every entry that never finished.
  fn cancel_remaining(&mut self) {
    let mut pending = self
      .entries
      .iter()
      .filter(|(_, e)| !e.target.state().is_terminal())
      .map(|(label, _)| label.clone())
      .collect::<Vec<_>>();
    pending.sort();
    for label in pending {
      self.waiters.remove(&label);
      self.fail(&label, FailureCause::Cancelled);
    }
  }
}
