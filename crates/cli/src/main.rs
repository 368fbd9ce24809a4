mod cmd;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmd::RunArgs;

/// phasegraph - CI build phases over a configuration matrix
#[derive(Parser)]
#[command(name = "phasegraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (overridden by RUST_LOG)
  #[arg(short, long)]
  verbose: bool,

  #[command(flatten)]
  run: RunArgs,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cmd::cmd_run(&cli.run) {
    Ok(code) => code,
    Err(err) => {
      output::print_error(&format!("{err:#}"));
      ExitCode::from(cmd::EXIT_SETUP_ERROR)
    }
  }
}
