//! Shared utilities.
//!
//! Content hashing and small synchronization helpers used across the crate.

pub mod hash;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Target and graph state stays usable after a worker panic; the panic itself
/// is surfaced through the task's join result.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
