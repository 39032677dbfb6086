//! Shared helpers for library integration tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use brick_lib::cache::{Cache, MemoryCache};
use brick_lib::config::BuildConfig;
use brick_lib::events::{BuildEvent, EventObserver, Reporter};
use brick_lib::execute::{Action, ActionOutput, ActionRunner, ExecuteError};
use brick_lib::graph::BuildGraph;
use brick_lib::label::Label;
use brick_lib::schedule::{BuildSummary, Scheduler};
use brick_lib::target::TargetDescriptor;

pub fn l(s: &str) -> Label {
  Label::parse(s).unwrap()
}

/// A target with one output `out` and a `default` command.
pub fn target(label: &str) -> TargetDescriptor {
  TargetDescriptor::new(l(label))
    .with_command("default", &format!("build {label}"))
    .with_output("out")
}

/// What one invocation of a target's action does.
#[derive(Debug, Clone)]
pub enum Step {
  Succeed,
  Fail,
  Timeout,
  /// Succeed and print this on stdout.
  Stdout(String),
}

/// Action runner that follows per-target scripts instead of spawning
/// processes. Each declared output is written with the target's content,
/// which defaults to its name.
#[derive(Default)]
pub struct MockRunner {
  scripts: Mutex<HashMap<Label, VecDeque<Step>>>,
  contents: Mutex<HashMap<Label, String>>,
  extra_files: Mutex<HashMap<Label, Vec<String>>>,
  delays: Mutex<HashMap<Label, Duration>>,
  calls: Mutex<BTreeMap<Label, u32>>,
  commands: Mutex<HashMap<Label, String>>,
  finished: Mutex<Vec<Label>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl MockRunner {
  pub fn script(&self, label: &str, steps: Vec<Step>) {
    self.scripts.lock().unwrap().insert(l(label), steps.into());
  }

  pub fn set_content(&self, label: &str, content: &str) {
    self.contents.lock().unwrap().insert(l(label), content.to_string());
  }

  /// Also write `name` into the build directory.
  pub fn extra_file(&self, label: &str, name: &str) {
    self.extra_files.lock().unwrap().entry(l(label)).or_default().push(name.to_string());
  }

  pub fn delay(&self, label: &str, delay: Duration) {
    self.delays.lock().unwrap().insert(l(label), delay);
  }

  pub fn calls(&self, label: &str) -> u32 {
    self.calls.lock().unwrap().get(&l(label)).copied().unwrap_or(0)
  }

  pub fn total_calls(&self) -> u32 {
    self.calls.lock().unwrap().values().sum()
  }

  pub fn command(&self, label: &str) -> Option<String> {
    self.commands.lock().unwrap().get(&l(label)).cloned()
  }

  /// Labels in the order their actions succeeded.
  pub fn finished(&self) -> Vec<Label> {
    self.finished.lock().unwrap().clone()
  }

  pub fn max_running(&self) -> usize {
    self.max_running.load(Ordering::SeqCst)
  }

  fn write(&self, action: &Action, name: &str, content: &str) -> Result<(), ExecuteError> {
    let path = action.work_dir.join(name);
    std::fs::write(&path, content).map_err(|source| ExecuteError::Io {
      path: path.display().to_string(),
      source,
    })
  }

  async fn attempt(&self, action: &Action) -> Result<ActionOutput, ExecuteError> {
    let label = &action.label;
    let delay = self.delays.lock().unwrap().get(label).copied();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let step = self
      .scripts
      .lock()
      .unwrap()
      .get_mut(label)
      .and_then(|steps| steps.pop_front())
      .unwrap_or(Step::Succeed);

    let stdout = match step {
      Step::Fail => {
        return Err(ExecuteError::CmdFailed {
          label: label.clone(),
          code: Some(1),
          stderr: "scripted failure".to_string(),
        });
      }
      Step::Timeout => {
        return Err(ExecuteError::Timeout {
          label: label.clone(),
          timeout: action.timeout,
        });
      }
      Step::Succeed => String::new(),
      Step::Stdout(stdout) => stdout,
    };

    let content = self
      .contents
      .lock()
      .unwrap()
      .get(label)
      .cloned()
      .unwrap_or_else(|| label.name().to_string());
    for out in action.env["OUTS"].split_whitespace() {
      self.write(action, out, &content)?;
    }
    let extra = self.extra_files.lock().unwrap().get(label).cloned().unwrap_or_default();
    for name in extra {
      self.write(action, &name, &name)?;
    }

    self.finished.lock().unwrap().push(label.clone());
    Ok(ActionOutput {
      stdout,
      stderr: String::new(),
    })
  }
}

#[async_trait]
impl ActionRunner for MockRunner {
  async fn run(&self, action: &Action) -> Result<ActionOutput, ExecuteError> {
    *self.calls.lock().unwrap().entry(action.label.clone()).or_default() += 1;
    self.commands.lock().unwrap().insert(action.label.clone(), action.command.clone());

    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_running.fetch_max(now, Ordering::SeqCst);
    let result = self.attempt(action).await;
    self.running.fetch_sub(1, Ordering::SeqCst);
    result
  }
}

/// Records every delivered build event.
#[derive(Default)]
pub struct EventLog {
  events: Mutex<Vec<BuildEvent>>,
}

impl EventLog {
  pub fn labels(&self) -> Vec<Label> {
    self.events.lock().unwrap().iter().map(|e| e.label.clone()).collect()
  }
}

impl EventObserver for EventLog {
  fn observe(&self, event: &BuildEvent) {
    self.events.lock().unwrap().push(event.clone());
  }
}

/// Isolated build environment: scratch repository, graph, mock runner and an
/// in-memory cache.
pub struct TestEnv {
  pub dir: TempDir,
  pub graph: Arc<BuildGraph>,
  pub runner: Arc<MockRunner>,
  pub cache: Arc<dyn Cache>,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with_graph(BuildGraph::new())
  }

  pub fn with_graph(graph: BuildGraph) -> Self {
    Self {
      dir: TempDir::new().unwrap(),
      graph: Arc::new(graph),
      runner: Arc::new(MockRunner::default()),
      cache: Arc::new(MemoryCache::new()),
    }
  }

  pub fn add(&self, descriptor: TargetDescriptor) {
    self.graph.add_target(descriptor).unwrap();
  }

  /// Write a source file relative to the repository root.
  pub fn write_source(&self, relative: &str, content: &str) {
    let path = self.dir.path().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }

  pub fn config(&self) -> BuildConfig {
    let mut config = BuildConfig::for_root(self.dir.path());
    config.parallelism = 4;
    config.cache_dir = self.dir.path().join("cache");
    config
  }

  pub fn scheduler(&self, config: BuildConfig) -> Scheduler {
    self.scheduler_with(config, Reporter::disabled())
  }

  pub fn scheduler_with(&self, config: BuildConfig, reporter: Reporter) -> Scheduler {
    Scheduler::new(
      self.graph.clone(),
      self.cache.clone(),
      self.runner.clone(),
      config,
      reporter,
    )
  }

  pub async fn build(&self, roots: &[&str]) -> BuildSummary {
    let roots = roots.iter().map(|r| l(r)).collect::<Vec<_>>();
    self.scheduler(self.config()).run(&roots).await.unwrap()
  }
}

/// Every target in the summary finished, and every activated target is in it.
pub fn assert_all_terminal(summary: &BuildSummary, graph: &BuildGraph) {
  for (label, outcome) in &summary.outcomes {
    assert!(outcome.state.is_terminal(), "{label} ended in {}", outcome.state);
  }
  for label in graph.labels() {
    let state = graph.target(&label).unwrap().state();
    if state != brick_lib::target::TargetState::Inactive {
      assert!(summary.outcomes.contains_key(&label), "{label} missing from summary");
      assert!(state.is_terminal(), "{label} left in {state}");
    }
  }
}
