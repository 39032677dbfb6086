//! In-process build metrics.
//!
//! [`BuildMetrics`] is an [`EventObserver`] that aggregates counters and
//! duration histograms over a build:
//!
//! - `build_counts{success, incremental}` for targets that are not tests
//! - `cache_hits{hit}` for every target
//! - `test_runs{pass}`, optionally per test label
//! - linear-bucket histograms of build (0.1s buckets), cache retrieval
//!   (0.1s) and test (1s) durations
//!
//! [`BuildMetrics::snapshot`] returns everything as a serializable
//! [`MetricsSnapshot`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::{BuildEvent, EventObserver};
use crate::target::TargetState;
use crate::util::lock;

const HISTOGRAM_BUCKETS: usize = 100;

/// Counts per label set. Keys are rendered as `name=value,name=value`.
pub type CounterSnapshot = BTreeMap<String, u64>;

/// Linear histogram: bucket `i` counts observations in `((i-1)*width, i*width]`,
/// bucket 0 counts zero-length observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
  pub width_secs: f64,
  pub buckets: Vec<u64>,
  /// Observations above the last bucket.
  pub overflow: u64,
  pub count: u64,
  pub sum_secs: f64,
}

impl Histogram {
  fn linear(width_secs: f64) -> Self {
    Self {
      width_secs,
      buckets: vec![0; HISTOGRAM_BUCKETS],
      overflow: 0,
      count: 0,
      sum_secs: 0.0,
    }
  }

  fn observe(&mut self, duration: Duration) {
    let secs = duration.as_secs_f64();
    let index = (secs / self.width_secs).ceil() as usize;
    match self.buckets.get_mut(index) {
      Some(bucket) => *bucket += 1,
      None => self.overflow += 1,
    }
    self.count += 1;
    self.sum_secs += secs;
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
  pub build_counts: CounterSnapshot,
  pub cache_hits: CounterSnapshot,
  pub test_runs: CounterSnapshot,
  pub build_durations: Histogram,
  pub cache_durations: Histogram,
  /// Keyed by test label when per-test metrics are on, else by `""`.
  pub test_durations: BTreeMap<String, Histogram>,
}

impl MetricsSnapshot {
  pub fn build_count(&self, success: bool, incremental: bool) -> u64 {
    let key = key(&[("success", b(success)), ("incremental", b(incremental))]);
    self.build_counts.get(&key).copied().unwrap_or(0)
  }

  pub fn cache_hit_count(&self, hit: bool) -> u64 {
    self.cache_hits.get(&key(&[("hit", b(hit))])).copied().unwrap_or(0)
  }

  /// Test runs with the given outcome, summed over all tests.
  pub fn test_run_count(&self, pass: bool) -> u64 {
    let prefix = key(&[("pass", b(pass))]);
    self
      .test_runs
      .iter()
      .filter(|(k, _)| *k == &prefix || k.starts_with(&format!("{prefix},")))
      .map(|(_, v)| v)
      .sum()
  }
}

fn b(value: bool) -> &'static str {
  if value { "true" } else { "false" }
}

fn key(pairs: &[(&str, &str)]) -> String {
  pairs
    .iter()
    .map(|(k, v)| format!("{k}={v}"))
    .collect::<Vec<_>>()
    .join(",")
}

/// Aggregates build events into counters and histograms.
#[derive(Debug)]
pub struct BuildMetrics {
  per_test: bool,
  state: Mutex<MetricsSnapshot>,
}

impl Default for BuildMetrics {
  fn default() -> Self {
    Self::new(false)
  }
}

impl BuildMetrics {
  /// `per_test` adds the test label to test counters and histograms.
  pub fn new(per_test: bool) -> Self {
    Self {
      per_test,
      state: Mutex::new(MetricsSnapshot {
        build_counts: BTreeMap::new(),
        cache_hits: BTreeMap::new(),
        test_runs: BTreeMap::new(),
        build_durations: Histogram::linear(0.1),
        cache_durations: Histogram::linear(0.1),
        test_durations: BTreeMap::new(),
      }),
    }
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    lock(&self.state).clone()
  }

  fn record(&self, event: &BuildEvent) {
    let mut guard = lock(&self.state);
    let m = &mut *guard;

    if let Some(tests) = event.tests.as_ref().filter(|t| t.num_tests > 0) {
      let pass = tests.failed == 0 && event.state.is_success();
      let cached = tests.cached || event.cache_hit;
      *m.cache_hits.entry(key(&[("hit", b(cached))])).or_default() += 1;

      let test_label = if self.per_test { event.label.to_string() } else { String::new() };
      let mut run_key = vec![("pass", b(pass))];
      if self.per_test {
        run_key.push(("test", test_label.as_str()));
      }
      *m.test_runs.entry(key(&run_key)).or_default() += 1;

      if cached {
        m.cache_durations.observe(event.elapsed);
      } else if pass {
        m.test_durations
          .entry(test_label)
          .or_insert_with(|| Histogram::linear(1.0))
          .observe(event.elapsed);
      }
      return;
    }

    let outcome = event.state;
    *m.cache_hits.entry(key(&[("hit", b(outcome == TargetState::Cached))])).or_default() += 1;
    let build_key = key(&[
      ("success", b(outcome != TargetState::Failed)),
      ("incremental", b(outcome != TargetState::Reused)),
    ]);
    *m.build_counts.entry(build_key).or_default() += 1;

    if outcome == TargetState::Cached {
      m.cache_durations.observe(event.elapsed);
    } else if outcome.is_success() {
      m.build_durations.observe(event.elapsed);
    }
  }
}

impl EventObserver for BuildMetrics {
  fn observe(&self, event: &BuildEvent) {
    self.record(event);
  }
}
