//! Implementation of the `brick build` command.
//!
//! Loads a manifest, schedules the requested targets (all of them when no
//! labels are given) and prints one line per target followed by a summary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use brick_lib::config::{BuildConfig, FailureMode, VerificationMode};
use brick_lib::events::{EventObserver, Reporter};
use brick_lib::label::Label;
use brick_lib::manifest::Manifest;
use brick_lib::metrics::{BuildMetrics, MetricsSnapshot};
use brick_lib::schedule::{BuildSummary, Scheduler};
use brick_lib::target::TargetState;

use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_stat, print_success, print_target, print_warning,
  state_symbol, truncate_hash,
};

pub struct BuildArgs {
  pub manifest: PathBuf,
  pub labels: Vec<String>,
  pub jobs: Option<usize>,
  pub profile: Option<String>,
  pub keep_going: bool,
  pub lenient_hashes: bool,
  pub timeout: Option<Duration>,
  pub cache_dir: Option<PathBuf>,
  pub out_dir: Option<PathBuf>,
  pub output: OutputFormat,
}

#[derive(Serialize)]
struct BuildReport<'a> {
  summary: &'a BuildSummary,
  metrics: &'a MetricsSnapshot,
  dropped_events: u64,
}

/// Resolve the manifest path and the repository root it lives in.
pub(crate) fn locate_manifest(path: &Path) -> Result<(PathBuf, PathBuf)> {
  let manifest = dunce::canonicalize(path).with_context(|| format!("Manifest not found: {}", path.display()))?;
  let root = manifest
    .parent()
    .map(Path::to_path_buf)
    .with_context(|| format!("Manifest has no parent directory: {}", manifest.display()))?;
  Ok((manifest, root))
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let (manifest_path, root) = locate_manifest(&args.manifest)?;

  let mut config = BuildConfig::from_env(&root).context("Invalid BRICK_* environment")?;
  if let Some(jobs) = args.jobs {
    if jobs == 0 {
      bail!("--jobs must be at least 1");
    }
    config.parallelism = jobs;
  }
  if let Some(profile) = args.profile {
    config.profile = profile;
  }
  if args.keep_going {
    config.failure_mode = FailureMode::BestEffort;
  }
  if args.lenient_hashes {
    config.verification = VerificationMode::Lenient;
  }
  if let Some(timeout) = args.timeout {
    config.action_timeout = timeout;
  }
  if let Some(cache_dir) = args.cache_dir {
    config.cache_dir = cache_dir;
  }
  if let Some(out_dir) = args.out_dir {
    config.out_dir = out_dir;
  }

  let manifest = Manifest::load(&manifest_path)?;
  let (graph, roots) = if args.labels.is_empty() {
    let roots = manifest.targets.iter().map(|t| t.label.clone()).collect::<Vec<_>>();
    (manifest.into_graph(config.provides_policy)?, roots)
  } else {
    let roots = args
      .labels
      .iter()
      .map(|s| Label::parse(s).with_context(|| format!("Invalid label: {s}")))
      .collect::<Result<Vec<_>>>()?;
    (manifest.into_lazy_graph(config.provides_policy), roots)
  };
  info!(manifest = %manifest_path.display(), roots = roots.len(), "building");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let (result, stats, metrics) = rt.block_on(async {
    let metrics = Arc::new(BuildMetrics::default());
    let reporter = Reporter::init(vec![metrics.clone() as Arc<dyn EventObserver>], config.event_buffer);
    let scheduler = Scheduler::from_config(Arc::new(graph), config, reporter.clone());
    let result = scheduler.run(&roots).await;
    let stats = reporter.shutdown().await;
    (result, stats, metrics.snapshot())
  });
  let summary = result.context("Build aborted")?;

  if args.output.is_json() {
    print_json(&BuildReport {
      summary: &summary,
      metrics: &metrics,
      dropped_events: stats.dropped,
    })?;
  } else {
    print_summary(&summary);
    if stats.dropped > 0 {
      print_warning(&format!("{} build events were dropped", stats.dropped));
    }
  }

  let failed = summary.failed().count();
  if failed > 0 {
    bail!("{failed} target(s) failed");
  }
  Ok(())
}

fn print_summary(summary: &BuildSummary) {
  for (label, outcome) in &summary.outcomes {
    let symbol = state_symbol(outcome.state, outcome.attempts > 0);
    let mut detail = format!("{} in {}", outcome.state, format_duration(outcome.duration));
    if outcome.attempts > 1 {
      detail.push_str(&format!(", {} attempts", outcome.attempts));
    }
    if let Some(hash) = &outcome.output_hash {
      detail.push_str(&format!(" [{}]", truncate_hash(&hash.0)));
    }
    print_target(symbol, outcome.state, &label.to_string(), &detail);
    if let Some(cause) = &outcome.cause
      && cause.is_root_cause()
    {
      print_error(&format!("{label}: {cause}"));
    }
  }

  println!();
  if summary.is_success() {
    print_success("Build complete!");
  }
  print_stat("Built", &summary.count(TargetState::Built).to_string());
  print_stat("Cached", &summary.count(TargetState::Cached).to_string());
  print_stat("Reused", &summary.count(TargetState::Reused).to_string());
  print_stat("Failed", &summary.count(TargetState::Failed).to_string());
  print_stat("Duration", &format_duration(summary.elapsed));
}
