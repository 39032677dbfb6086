//! Build events and their delivery to observers.
//!
//! The scheduler emits one [`BuildEvent`] per terminal state transition. A
//! [`Reporter`] carries them to the registered [`EventObserver`]s on a
//! background task through a bounded channel. Emitting never waits: when the
//! channel is full the event is dropped and counted.
//!
//! A reporter is an explicit, process-scoped context. Create it with
//! [`Reporter::init`], pass it to the scheduler, and call
//! [`Reporter::shutdown`] to flush pending events before exiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::label::Label;
use crate::target::{TargetState, TestResults};
use crate::util::lock;

/// A target reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
  pub label: Label,
  pub state: TargetState,
  /// Time from dispatch (or from skipping) to the terminal state.
  pub elapsed: Duration,
  pub cache_hit: bool,
  /// Attempts made, including retries. Zero if never dispatched.
  pub attempts: u32,
  /// Results of a test target.
  pub tests: Option<TestResults>,
}

/// Receives build events on the reporter's task.
pub trait EventObserver: Send + Sync {
  fn observe(&self, event: &BuildEvent);

  /// Called once after the last event.
  fn flush(&self) {}
}

/// Counts reported by [`Reporter::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
  pub delivered: u64,
  pub dropped: u64,
}

struct ReporterInner {
  tx: Mutex<Option<mpsc::Sender<BuildEvent>>>,
  task: Mutex<Option<JoinHandle<()>>>,
  delivered: Arc<AtomicU64>,
  dropped: AtomicU64,
}

/// Fire-and-forget event sink shared by the scheduler and its workers.
#[derive(Clone)]
pub struct Reporter {
  inner: Arc<ReporterInner>,
}

impl std::fmt::Debug for Reporter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Reporter")
      .field("active", &lock(&self.inner.tx).is_some())
      .field("dropped", &self.dropped())
      .finish()
  }
}

impl Reporter {
  /// Start delivering events to `observers`.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn init(observers: Vec<Arc<dyn EventObserver>>, capacity: usize) -> Self {
    let (tx, mut rx) = mpsc::channel::<BuildEvent>(capacity.max(1));
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = delivered.clone();

    let task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        for observer in &observers {
          observer.observe(&event);
        }
        counter.fetch_add(1, Ordering::Relaxed);
      }
      for observer in &observers {
        observer.flush();
      }
    });

    Self {
      inner: Arc::new(ReporterInner {
        tx: Mutex::new(Some(tx)),
        task: Mutex::new(Some(task)),
        delivered,
        dropped: AtomicU64::new(0),
      }),
    }
  }

  /// A reporter that discards everything.
  pub fn disabled() -> Self {
    Self {
      inner: Arc::new(ReporterInner {
        tx: Mutex::new(None),
        task: Mutex::new(None),
        delivered: Arc::new(AtomicU64::new(0)),
        dropped: AtomicU64::new(0),
      }),
    }
  }

  /// Queue an event without waiting.
  pub fn emit(&self, event: BuildEvent) {
    let tx = lock(&self.inner.tx);
    let Some(tx) = tx.as_ref() else {
      return;
    };
    if let Err(e) = tx.try_send(event) {
      let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
      debug!(label = %e.into_inner().label, dropped, "event dropped");
    }
  }

  /// Events dropped so far because the channel was full.
  pub fn dropped(&self) -> u64 {
    self.inner.dropped.load(Ordering::Relaxed)
  }

  /// Stop accepting events and wait until every queued one is delivered.
  ///
  /// Later calls return the same counts without waiting.
  pub async fn shutdown(&self) -> ReporterStats {
    drop(lock(&self.inner.tx).take());
    let task = lock(&self.inner.task).take();
    if let Some(task) = task
      && let Err(e) = task.await
    {
      warn!(error = %e, "event reporter task failed");
    }

    let stats = ReporterStats {
      delivered: self.inner.delivered.load(Ordering::Relaxed),
      dropped: self.dropped(),
    };
    if stats.dropped > 0 {
      warn!(dropped = stats.dropped, "build events dropped under backpressure");
    }
    stats
  }
}
