//! Implementation of the `brick deps` command.

use std::path::Path;

use anyhow::{Context, Result};

use brick_lib::config::BuildConfig;
use brick_lib::label::Label;
use brick_lib::manifest::Manifest;

use super::build::locate_manifest;
use crate::output::{OutputFormat, print_json, symbols};

/// Print the effective dependencies of `label` after requires/provides
/// substitution, or with `transitive` everything it needs, dependencies first.
pub fn cmd_deps(manifest: &Path, label: &str, transitive: bool, output: OutputFormat) -> Result<()> {
  let (manifest_path, root) = locate_manifest(manifest)?;
  let config = BuildConfig::from_env(&root).context("Invalid BRICK_* environment")?;
  let label = Label::parse(label).with_context(|| format!("Invalid label: {label}"))?;

  let graph = Manifest::load(&manifest_path)?.into_lazy_graph(config.provides_policy);
  let deps = if transitive {
    let mut order = graph.activate(std::slice::from_ref(&label))?;
    order.retain(|l| l != &label);
    order
  } else {
    graph.resolve_edges(&label)?
  };

  if output.is_json() {
    let deps = deps.iter().map(Label::to_string).collect::<Vec<_>>();
    print_json(&serde_json::json!({ "label": label.to_string(), "deps": deps }))?;
  } else {
    println!("{label}");
    for dep in &deps {
      println!("  {} {}", symbols::ARROW, dep);
    }
  }
  Ok(())
}
