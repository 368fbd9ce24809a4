//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status lines
//! for targets and units, the execution plan, and human-readable durations.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use phasegraph_lib::graph::{TargetGraph, TargetKind};
use phasegraph_lib::report::{SessionReport, TargetReport, TargetState, UnitState};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
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
  pub const SKIP: &str = "-";
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
  println!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()),
    message.if_supports_color(Stream::Stdout, |s| s.yellow())
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

/// Print the targets a run would execute, in order.
pub fn print_plan(plan: &[String], graph: &TargetGraph) {
  print_info(&format!("Execution plan ({} targets)", plan.len()));
  for (index, name) in plan.iter().enumerate() {
    let configs = match graph.get(name).map(|t| &t.kind) {
      Some(TargetKind::MatrixParallel { configs }) => format!(" [{}]", configs.join(" ")),
      _ => String::new(),
    };
    println!("  {}. {}{}", index + 1, name, configs);
  }
}

fn target_duration(target: &TargetReport) -> Duration {
  let millis = target
    .units
    .iter()
    .flat_map(|u| &u.commands)
    .map(|c| c.duration_ms)
    .sum();
  Duration::from_millis(millis)
}

/// Print one line per target plus failing units, then the report location.
pub fn print_summary(report: &SessionReport, report_path: &Path) {
  println!();
  for target in &report.targets {
    let line = format!("{} ({})", target.name, format_duration(target_duration(target)));
    match &target.state {
      TargetState::Succeeded => print_success(&line),
      TargetState::Tolerated => print_warning(&format!("{line} failed, tolerated")),
      TargetState::Failed => println!(
        "{} {} failed",
        symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
        line
      ),
      TargetState::Blocked { by } => println!(
        "{} {} blocked {} {}",
        symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        target.name,
        symbols::ARROW,
        by
      ),
    }

    for unit in &target.units {
      let config = unit.configuration.as_deref().unwrap_or(&target.name);
      match unit.state {
        UnitState::Succeeded => {}
        UnitState::Cancelled => println!("    {config}: cancelled"),
        UnitState::Failed => println!("    {config}: {}", unit.error.as_deref().unwrap_or("failed")),
      }
    }
  }

  println!();
  print_stat("Targets", &report.targets.len().to_string());
  print_stat("Failed", &report.failures().count().to_string());
  print_stat("Tolerated commands", &report.tolerated_count().to_string());
  print_stat("Report", &report_path.display().to_string());
}
