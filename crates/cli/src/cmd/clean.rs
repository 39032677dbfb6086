//! Implementation of the `brick clean` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use brick_lib::config::BuildConfig;

use crate::output::{OutputFormat, print_info, print_json, print_success};

/// Remove the output directory. The cache is left alone.
pub fn cmd_clean(root: Option<PathBuf>, out_dir: Option<PathBuf>, output: OutputFormat) -> Result<()> {
  let root = match root {
    Some(root) => root,
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let config = BuildConfig::from_env(&root).context("Invalid BRICK_* environment")?;
  let out_dir = out_dir.unwrap_or(config.out_dir);

  let removed = out_dir.exists();
  if removed {
    std::fs::remove_dir_all(&out_dir).with_context(|| format!("Failed to remove {}", out_dir.display()))?;
  }

  if output.is_json() {
    print_json(&serde_json::json!({ "out_dir": out_dir, "removed": removed }))?;
  } else if removed {
    print_success(&format!("Removed {}", out_dir.display()));
  } else {
    print_info(&format!("Nothing to clean at {}", out_dir.display()));
  }
  Ok(())
}
