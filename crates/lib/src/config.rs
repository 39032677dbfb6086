//! Build configuration.
//!
//! [`BuildConfig`] holds everything a build needs besides the graph itself.
//! Values come from [`Default`], are overridden by `BRICK_*` environment
//! variables in [`BuildConfig::from_env`], and finally by the caller (the
//! CLI applies its flags last).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_ACTION_TIMEOUT_SECS, DEFAULT_EVENT_BUFFER, DEFAULT_PROFILE};
use crate::graph::ProvidesPolicy;
use crate::platform::paths;

pub const ENV_PARALLELISM: &str = "BRICK_PARALLELISM";
pub const ENV_TIMEOUT: &str = "BRICK_TIMEOUT";
pub const ENV_PROFILE: &str = "BRICK_PROFILE";
pub const ENV_CACHE_DIR: &str = "BRICK_CACHE_DIR";
pub const ENV_OUT_DIR: &str = "BRICK_OUT_DIR";
pub const ENV_LENIENT_HASHES: &str = "BRICK_LENIENT_HASHES";
pub const ENV_KEEP_GOING: &str = "BRICK_KEEP_GOING";

/// `PATH` handed to actions unless overridden.
const DEFAULT_ACTION_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {var}: {message}")]
  InvalidValue {
    var: &'static str,
    value: String,
    message: String,
  },
}

/// What to do when an output digest is not in a target's accepted set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
  /// The target fails.
  #[default]
  Strict,
  /// Log a warning; the target still succeeds.
  Lenient,
}

/// How far a failure spreads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
  /// Stop dispatching new targets after the first failure.
  #[default]
  Strict,
  /// Only dependents of a failed target are skipped.
  BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
  /// Maximum number of targets building at once.
  pub parallelism: usize,
  pub verification: VerificationMode,
  pub failure_mode: FailureMode,
  /// Per-action timeout unless a target sets its own.
  pub action_timeout: Duration,
  /// Active build profile, selects each target's command.
  pub profile: String,
  /// Repository root; source paths are relative to it.
  pub root: PathBuf,
  pub out_dir: PathBuf,
  pub cache_dir: PathBuf,
  /// Shell override for actions.
  pub shell: Option<String>,
  /// `PATH` given to actions.
  pub path: String,
  pub provides_policy: ProvidesPolicy,
  /// Capacity of the event channel to observers.
  pub event_buffer: usize,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self::for_root(".")
  }
}

impl BuildConfig {
  /// Defaults for a repository at `root`.
  pub fn for_root(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    Self {
      parallelism: num_cpus(),
      verification: VerificationMode::default(),
      failure_mode: FailureMode::default(),
      action_timeout: Duration::from_secs(DEFAULT_ACTION_TIMEOUT_SECS),
      profile: DEFAULT_PROFILE.to_string(),
      out_dir: paths::out_dir(&root),
      cache_dir: paths::cache_dir(),
      root,
      shell: None,
      path: DEFAULT_ACTION_PATH.to_string(),
      provides_policy: ProvidesPolicy::default(),
      event_buffer: DEFAULT_EVENT_BUFFER,
    }
  }

  /// Defaults for `root` with `BRICK_*` environment overrides applied.
  pub fn from_env(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let mut config = Self::for_root(root);

    if let Some(value) = env_var(ENV_PARALLELISM) {
      config.parallelism = match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        Ok(_) => return Err(invalid(ENV_PARALLELISM, &value, "must be at least 1")),
        Err(e) => return Err(invalid(ENV_PARALLELISM, &value, &e.to_string())),
      };
    }
    if let Some(value) = env_var(ENV_TIMEOUT) {
      config.action_timeout =
        humantime::parse_duration(&value).map_err(|e| invalid(ENV_TIMEOUT, &value, &e.to_string()))?;
    }
    if let Some(value) = env_var(ENV_PROFILE) {
      config.profile = value;
    }
    if let Some(value) = env_var(ENV_CACHE_DIR) {
      config.cache_dir = PathBuf::from(value);
    }
    if let Some(value) = env_var(ENV_OUT_DIR) {
      config.out_dir = PathBuf::from(value);
    }
    if let Some(value) = env_var(ENV_LENIENT_HASHES)
      && parse_bool(ENV_LENIENT_HASHES, &value)?
    {
      config.verification = VerificationMode::Lenient;
    }
    if let Some(value) = env_var(ENV_KEEP_GOING)
      && parse_bool(ENV_KEEP_GOING, &value)?
    {
      config.failure_mode = FailureMode::BestEffort;
    }

    Ok(config)
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn invalid(var: &'static str, value: &str, message: &str) -> ConfigError {
  ConfigError::InvalidValue {
    var,
    value: value.to_string(),
    message: message.to_string(),
  }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(invalid(var, value, "expected a boolean")),
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
