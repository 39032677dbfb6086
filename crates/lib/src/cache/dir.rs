//! Content-addressed on-disk cache.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   ab/
//!     ab12...ef/            # one entry per fingerprint
//!       <output files>
//!       .brick-complete     # marker, written last
//! ```
//!
//! An entry is written into a temporary sibling directory and renamed into
//! place, so a visible entry is always complete. Directories without a marker
//! are leftovers of an interrupted write and are removed on lookup.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{Artifact, ArtifactMetadata, Cache, CacheError, Fingerprint, StoreOutcome};
use crate::consts::{CACHE_COMPLETE_MARKER, CACHE_MARKER_VERSION};
use crate::util::hash::{ContentHash, hash_outputs};
use crate::util::lock;

/// Contents of the completion marker.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMarker {
  version: u32,
  /// Digest of the entry's output files.
  output_hash: ContentHash,
  #[serde(flatten)]
  metadata: ArtifactMetadata,
}

#[derive(Debug)]
pub struct DirCache {
  root: PathBuf,
  /// Serializes writers of one fingerprint without blocking others.
  locks: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    path: path.display().to_string(),
    source,
  }
}

impl DirCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      locks: Mutex::new(HashMap::new()),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.root.join(fingerprint.shard()).join(&fingerprint.0)
  }

  fn entry_lock(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
    lock(&self.locks).entry(fingerprint.clone()).or_default().clone()
  }

  /// Drop a writer's handle, forgetting the lock once no writer holds it.
  fn release_lock(&self, fingerprint: &Fingerprint, entry_lock: Arc<tokio::sync::Mutex<()>>) {
    let mut locks = lock(&self.locks);
    drop(entry_lock);
    if locks.get(fingerprint).is_some_and(|l| Arc::strong_count(l) == 1) {
      locks.remove(fingerprint);
    }
  }

  async fn store_locked(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<StoreOutcome, CacheError> {
    let entry = self.entry_path(fingerprint);
    if entry.exists() {
      match self.read_marker(&entry).await? {
        Some(marker) if marker.output_hash == artifact.digest => {
          debug!(fingerprint = %fingerprint, "artifact already cached");
          return Ok(StoreOutcome::AlreadyPresent);
        }
        Some(marker) => {
          return Err(CacheError::Corruption {
            fingerprint: fingerprint.clone(),
            expected: marker.output_hash,
            actual: artifact.digest.clone(),
          });
        }
        None => {
          debug!(path = ?entry, "replacing incomplete cache entry");
          fs::remove_dir_all(&entry).await.map_err(io_err(&entry))?;
        }
      }
    }

    self.write_entry(&entry, artifact).await?;
    info!(fingerprint = %fingerprint, files = artifact.files.len(), "artifact cached");
    Ok(StoreOutcome::Stored)
  }

  async fn read_marker(&self, entry: &Path) -> Result<Option<CacheMarker>, CacheError> {
    let path = entry.join(CACHE_COMPLETE_MARKER);
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_err(&path)(e)),
    };
    let marker = serde_json::from_str(&content).map_err(|e| CacheError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    Ok(Some(marker))
  }

  /// Read every output file of an entry, excluding the marker.
  fn read_files(entry: &Path) -> Result<BTreeMap<String, Vec<u8>>, CacheError> {
    let mut files = BTreeMap::new();
    for item in WalkDir::new(entry).sort_by_file_name() {
      let item = item.map_err(|e| CacheError::Io {
        path: entry.display().to_string(),
        source: e.into(),
      })?;
      if !item.file_type().is_file() || item.file_name() == CACHE_COMPLETE_MARKER {
        continue;
      }
      let rel = item
        .path()
        .strip_prefix(entry)
        .unwrap_or(item.path())
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      let content = std::fs::read(item.path()).map_err(io_err(item.path()))?;
      files.insert(rel, content);
    }
    Ok(files)
  }

  async fn write_entry(&self, entry: &Path, artifact: &Artifact) -> Result<(), CacheError> {
    let parent = entry.parent().unwrap_or(&self.root);
    fs::create_dir_all(parent).await.map_err(io_err(parent))?;

    let staging = tempfile::Builder::new()
      .prefix(".tmp-")
      .tempdir_in(parent)
      .map_err(io_err(parent))?;

    for (name, content) in &artifact.files {
      let path = staging.path().join(name);
      if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await.map_err(io_err(dir))?;
      }
      fs::write(&path, content).await.map_err(io_err(&path))?;
    }

    let marker = CacheMarker {
      version: CACHE_MARKER_VERSION,
      output_hash: artifact.digest.clone(),
      metadata: artifact.metadata.clone(),
    };
    let content = serde_json::to_string(&marker).map_err(|e| CacheError::Parse {
      path: entry.display().to_string(),
      message: e.to_string(),
    })?;
    let marker_path = staging.path().join(CACHE_COMPLETE_MARKER);
    fs::write(&marker_path, format!("{}\n", content))
      .await
      .map_err(io_err(&marker_path))?;

    // The staging directory no longer exists once renamed, so its drop is a no-op.
    fs::rename(staging.path(), entry).await.map_err(io_err(entry))?;
    Ok(())
  }
}

#[async_trait]
impl Cache for DirCache {
  async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, CacheError> {
    let entry = self.entry_path(fingerprint);
    if !entry.exists() {
      return Ok(None);
    }

    let marker = match self.read_marker(&entry).await {
      Ok(Some(marker)) => marker,
      Ok(None) => {
        debug!(path = ?entry, "incomplete cache entry found, removing");
        fs::remove_dir_all(&entry).await.map_err(io_err(&entry))?;
        return Ok(None);
      }
      Err(e) => {
        warn!(path = ?entry, error = %e, "invalid cache marker, removing entry");
        fs::remove_dir_all(&entry).await.map_err(io_err(&entry))?;
        return Ok(None);
      }
    };

    let files = Self::read_files(&entry)?;
    let actual = hash_outputs(&files);
    if actual != marker.output_hash {
      return Err(CacheError::Corruption {
        fingerprint: fingerprint.clone(),
        expected: marker.output_hash,
        actual,
      });
    }

    debug!(fingerprint = %fingerprint, "cache hit");
    Ok(Some(Artifact {
      files,
      digest: actual,
      metadata: marker.metadata,
    }))
  }

  async fn store(&self, fingerprint: &Fingerprint, artifact: &Artifact) -> Result<StoreOutcome, CacheError> {
    let entry_lock = self.entry_lock(fingerprint);
    let result = {
      let _guard = entry_lock.lock().await;
      self.store_locked(fingerprint, artifact).await
    };
    self.release_lock(fingerprint, entry_lock);
    result
  }
}
