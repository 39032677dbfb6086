use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Artifact, Cache, CacheError, Fingerprint, StoreOutcome};
use crate::util::lock;

/// In-process cache, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<Fingerprint, Artifact>>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    lock(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl Cache for MemoryCache {
  async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
    Ok(lock(&self.entries).get(fingerprint).cloned())
  }

  async fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<StoreOutcome, CacheError> {
    let mut entries = lock(&self.entries);
    if let Some(existing) = entries.get(fingerprint) {
      if existing.digest == artifact.digest {
        return Ok(StoreOutcome::AlreadyPresent);
      }
      return Err(CacheError::Corruption {
        fingerprint: fingerprint.clone(),
        expected: existing.digest.clone(),
        actual: artifact.digest.clone(),
      });
    }
    entries.insert(fingerprint.clone(), artifact.clone());
    Ok(StoreOutcome::Stored)
  }
}
