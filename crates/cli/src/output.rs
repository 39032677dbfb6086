//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, per-target result lines, durations, and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use brick_lib::target::TargetState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn from_json_flag(json: bool) -> Self {
    if json { OutputFormat::Json } else { OutputFormat::Text }
  }

  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const CACHED: &str = "↺";
  pub const SKIPPED: &str = "-";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// Symbol for a terminal state; failures without attempts count as skipped.
pub fn state_symbol(state: TargetState, attempted: bool) -> &'static str {
  match state {
    TargetState::Built => symbols::SUCCESS,
    TargetState::Cached | TargetState::Reused => symbols::CACHED,
    TargetState::Failed if attempted => symbols::ERROR,
    TargetState::Failed => symbols::SKIPPED,
    _ => symbols::INFO,
  }
}

/// One line per finished target.
pub fn print_target(symbol: &str, state: TargetState, label: &str, detail: &str) {
  let colored = match state {
    TargetState::Built => format!("{}", symbol.if_supports_color(Stream::Stdout, |s| s.green())),
    TargetState::Cached | TargetState::Reused => {
      format!("{}", symbol.if_supports_color(Stream::Stdout, |s| s.cyan()))
    }
    TargetState::Failed => format!("{}", symbol.if_supports_color(Stream::Stdout, |s| s.red())),
    _ => symbol.to_string(),
  };
  println!(
    "  {} {} {}",
    colored,
    label,
    detail.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
