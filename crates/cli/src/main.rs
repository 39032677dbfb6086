mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::BuildArgs;
use output::OutputFormat;

/// brick - incremental, cached build orchestration
#[derive(Parser)]
#[command(name = "brick")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets from a manifest
  Build {
    /// Path to the target manifest (JSON)
    manifest: PathBuf,

    /// Labels to build (default: every target in the manifest)
    labels: Vec<String>,

    /// Number of targets to build in parallel
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Build profile selecting each target's command
    #[arg(long)]
    profile: Option<String>,

    /// Keep building unrelated targets after a failure
    #[arg(long)]
    keep_going: bool,

    /// Warn instead of failing when an output hash is not accepted
    #[arg(long)]
    lenient_hashes: bool,

    /// Per-action timeout, e.g. "90s" or "10m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Output directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Print the build summary as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the effective dependencies of a target
  Deps {
    /// Path to the target manifest (JSON)
    manifest: PathBuf,

    /// Target label
    label: String,

    /// Print every transitive dependency, dependencies first
    #[arg(long)]
    transitive: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },

  /// Remove the output directory
  Clean {
    /// Repository root (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Output directory (default: <root>/brick-out)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = match cli.verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      manifest,
      labels,
      jobs,
      profile,
      keep_going,
      lenient_hashes,
      timeout,
      cache_dir,
      out_dir,
      json,
    } => cmd::cmd_build(BuildArgs {
      manifest,
      labels,
      jobs,
      profile,
      keep_going,
      lenient_hashes,
      timeout,
      cache_dir,
      out_dir,
      output: OutputFormat::from_json_flag(json),
    }),
    Commands::Deps {
      manifest,
      label,
      transitive,
      json,
    } => cmd::cmd_deps(&manifest, &label, transitive, OutputFormat::from_json_flag(json)),
    Commands::Clean { root, out_dir, json } => cmd::cmd_clean(root, out_dir, OutputFormat::from_json_flag(json)),
  }
}
