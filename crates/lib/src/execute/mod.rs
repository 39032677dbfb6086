//! Build action execution.
//!
//! This module turns a target into files:
//! - [`ActionRunner`]: the process boundary (run a command, capture output,
//!   enforce a timeout). [`ShellRunner`] is the real implementation.
//! - [`BuildExecutor`]: prepares the build directory and environment, runs
//!   the action, collects declared, discovered and optional outputs, and
//!   installs finished outputs.
//!
//! Directory layout under the output directory:
//!
//! ```text
//! <out_dir>/
//!   tmp/<package>/<name>._build/   # scratch directory, recreated per attempt
//!   gen/<package>/                 # installed outputs
//! ```

pub mod cmd;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::SOURCE_DATE_EPOCH;
use crate::label::Label;
use crate::target::BuildTarget;

pub use cmd::ShellRunner;

/// Scratch space for the action inside its build directory; never an output.
const ACTION_TMP_DIR: &str = "_tmp";

#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("failed to run action for {label}: {source}")]
  Spawn {
    label: Label,
    #[source]
    source: std::io::Error,
  },

  #[error("action for {label} failed with exit code {code:?}{}", stderr_suffix(.stderr))]
  CmdFailed {
    label: Label,
    code: Option<i32>,
    stderr: String,
  },

  #[error("action for {label} timed out after {}", format_timeout(.timeout))]
  Timeout { label: Label, timeout: Duration },

  #[error("{label} did not produce declared output {output}")]
  MissingOutput { label: Label, output: String },

  #[error("invalid optional output pattern {pattern:?} on {label}: {message}")]
  InvalidGlob {
    label: Label,
    pattern: String,
    message: String,
  },

  #[error("io error at {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl ExecuteError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, Self::Timeout { .. })
  }
}

fn stderr_suffix(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!(":\n{}", stderr)
  }
}

fn format_timeout(timeout: &Duration) -> String {
  humantime::format_duration(*timeout).to_string()
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExecuteError + '_ {
  move |source| ExecuteError::Io {
    path: path.display().to_string(),
    source,
  }
}

/// A resolved command ready to run.
#[derive(Debug, Clone)]
pub struct Action {
  pub label: Label,
  pub command: String,
  pub work_dir: PathBuf,
  pub env: BTreeMap<String, String>,
  pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Runs one action as an external process.
#[async_trait]
pub trait ActionRunner: Send + Sync {
  async fn run(&self, action: &Action) -> Result<ActionOutput, ExecuteError>;
}

/// Prepares, runs and collects the build action of a target.
pub struct BuildExecutor {
  root: PathBuf,
  out_dir: PathBuf,
  runner: Arc<dyn ActionRunner>,
  path_env: String,
  default_timeout: Duration,
}

impl std::fmt::Debug for BuildExecutor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildExecutor")
      .field("root", &self.root)
      .field("out_dir", &self.out_dir)
      .field("default_timeout", &self.default_timeout)
      .finish()
  }
}

impl BuildExecutor {
  pub fn new(
    root: impl Into<PathBuf>,
    out_dir: impl Into<PathBuf>,
    runner: Arc<dyn ActionRunner>,
    path_env: impl Into<String>,
    default_timeout: Duration,
  ) -> Self {
    Self {
      root: root.into(),
      out_dir: out_dir.into(),
      runner,
      path_env: path_env.into(),
      default_timeout,
    }
  }

  /// Scratch directory the action runs in.
  pub fn build_dir(&self, label: &Label) -> PathBuf {
    self
      .out_dir
      .join("tmp")
      .join(label.package())
      .join(format!("{}._build", label.name()))
  }

  /// Where finished outputs of a package are installed.
  pub fn gen_dir(&self, label: &Label) -> PathBuf {
    self.out_dir.join("gen").join(label.package())
  }

  /// Where outputs are read from: the build directory, or the package's
  /// source directory for targets with no command.
  fn output_base(&self, target: &BuildTarget, profile: &str) -> PathBuf {
    if target.command_for(profile).is_some() {
      self.build_dir(target.label())
    } else {
      self.root.join(target.label().package())
    }
  }

  fn environment(&self, target: &BuildTarget, build_dir: &Path, profile: &str) -> BTreeMap<String, String> {
    let label = target.label();
    let descriptor = target.descriptor();
    let tmp_dir = build_dir.join(ACTION_TMP_DIR).display().to_string();
    let srcs = descriptor
      .sources
      .iter()
      .map(|s| self.root.join(s).display().to_string())
      .collect::<Vec<_>>()
      .join(" ");

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), self.path_env.clone());
    env.insert("HOME".to_string(), build_dir.display().to_string());
    env.insert("TMP_DIR".to_string(), tmp_dir.clone());
    env.insert("TMPDIR".to_string(), tmp_dir);
    env.insert("SRCS".to_string(), srcs);
    env.insert("OUTS".to_string(), descriptor.outputs.join(" "));
    env.insert(
      "OUT".to_string(),
      descriptor.outputs.first().cloned().unwrap_or_default(),
    );
    env.insert("PKG".to_string(), label.package().to_string());
    env.insert("NAME".to_string(), label.name().to_string());
    env.insert("PROFILE".to_string(), profile.to_string());
    env.insert("LANG".to_string(), "C".to_string());
    env.insert("LC_ALL".to_string(), "C".to_string());
    env.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string());
    env
  }

  /// Run the target's command for `profile` in a fresh build directory.
  ///
  /// Targets without a command for the profile run nothing.
  pub async fn execute(&self, target: &BuildTarget, profile: &str) -> Result<ActionOutput, ExecuteError> {
    let label = target.label();
    let Some(command) = target.command_for(profile) else {
      debug!(label = %label, profile = %profile, "no command, nothing to run");
      return Ok(ActionOutput::default());
    };

    let build_dir = self.build_dir(label);
    if build_dir.exists() {
      fs::remove_dir_all(&build_dir).await.map_err(io_err(&build_dir))?;
    }
    let tmp_dir = build_dir.join(ACTION_TMP_DIR);
    fs::create_dir_all(&tmp_dir).await.map_err(io_err(&tmp_dir))?;

    let action = Action {
      label: label.clone(),
      env: self.environment(target, &build_dir, profile),
      work_dir: build_dir,
      timeout: target.timeout().unwrap_or(self.default_timeout),
      command,
    };
    self.runner.run(&action).await
  }

  /// Read the target's outputs after a successful action.
  ///
  /// Declared and discovered outputs must exist; a directory output
  /// contributes every file below it. Optional outputs are globbed and
  /// included when present.
  pub fn collect_outputs(&self, target: &BuildTarget, profile: &str) -> Result<BTreeMap<String, Vec<u8>>, ExecuteError> {
    let label = target.label();
    let base = self.output_base(target, profile);
    let mut files = BTreeMap::new();

    for output in target.outputs() {
      let path = base.join(&output);
      if path.is_dir() {
        read_tree(&base, &path, &mut files)?;
      } else if path.is_file() {
        let content = std::fs::read(&path).map_err(io_err(&path))?;
        files.insert(output, content);
      } else {
        return Err(ExecuteError::MissingOutput {
          label: label.clone(),
          output,
        });
      }
    }

    let patterns = &target.descriptor().optional_outputs;
    if !patterns.is_empty() && base.is_dir() {
      let mut builder = GlobSetBuilder::new();
      for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ExecuteError::InvalidGlob {
          label: label.clone(),
          pattern: pattern.clone(),
          message: e.to_string(),
        })?;
        builder.add(glob);
      }
      let set = builder.build().map_err(|e| ExecuteError::InvalidGlob {
        label: label.clone(),
        pattern: patterns.join(","),
        message: e.to_string(),
      })?;

      let mut optional = BTreeMap::new();
      read_tree(&base, &base, &mut optional)?;
      for (name, content) in optional {
        if set.is_match(&name) && !files.contains_key(&name) {
          debug!(label = %label, output = %name, "optional output present");
          files.insert(name, content);
        }
      }
    }

    Ok(files)
  }

  /// Write outputs to the package's install directory.
  pub async fn install(&self, label: &Label, files: &BTreeMap<String, Vec<u8>>) -> Result<(), ExecuteError> {
    let gen_dir = self.gen_dir(label);
    for (name, content) in files {
      let path = gen_dir.join(name);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
      }
      fs::write(&path, content).await.map_err(io_err(&path))?;
    }
    info!(label = %label, files = files.len(), dir = ?gen_dir, "outputs installed");
    Ok(())
  }
}

/// Add every file below `dir` to `files`, named relative to `base` with `/`
/// separators. The action's scratch directory is skipped.
fn read_tree(base: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<(), ExecuteError> {
  let walker = WalkDir::new(dir)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || e.file_name() != ACTION_TMP_DIR);

  for entry in walker {
    let entry = entry.map_err(|e| ExecuteError::Io {
      path: dir.display().to_string(),
      source: e.into(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let name = entry
      .path()
      .strip_prefix(base)
      .unwrap_or(entry.path())
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");
    let content = std::fs::read(entry.path()).map_err(io_err(entry.path()))?;
    files.insert(name, content);
  }
  Ok(())
}
