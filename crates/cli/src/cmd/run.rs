//! Implementation of a `phasegraph` run.
//!
//! Loads the pipeline file, resolves the configuration lists, builds the run
//! context (toolchain overlay plus run variables), then either lists, plans
//! or executes the requested targets and writes the session report.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use phasegraph_lib::context::ExecutionContext;
use phasegraph_lib::exec::toolchain_overlay;
use phasegraph_lib::package::ReleaseInfo;
use phasegraph_lib::pipeline::{DEFAULT_PIPELINE_FILE, PipelineFile, Selection};
use phasegraph_lib::repo::{GitCli, Repository};
use phasegraph_lib::schedule::{MatrixPolicy, Scheduler, SchedulerConfig};

use crate::output::{self, OutputFormat};

/// Exit status when a target failed or was blocked.
pub const EXIT_TARGET_FAILED: u8 = 1;

/// Exit status for configuration, graph and pipeline errors detected before
/// execution.
pub const EXIT_SETUP_ERROR: u8 = 2;

#[derive(Debug, Args)]
pub struct RunArgs {
  /// Targets to run (the pipeline's default targets when omitted)
  pub targets: Vec<String>,

  /// Pipeline file, relative to the workspace
  #[arg(short, long, default_value = DEFAULT_PIPELINE_FILE)]
  pub file: PathBuf,

  /// Working directory (default: current directory)
  #[arg(short, long)]
  pub workspace: Option<PathBuf>,

  /// Toolchain prefix; its bin/ and lib/ directories are prepended to the
  /// search paths of every command
  #[arg(long, env = "TOOLCHAIN_DIR")]
  pub toolchain: Option<PathBuf>,

  /// Use the pipeline's debug flags
  #[arg(long)]
  pub debug: bool,

  /// Print the registered configurations and exit
  #[arg(long)]
  pub list_configs: bool,

  /// Space-separated configurations to build (default: all)
  #[arg(long)]
  pub configs: Option<String>,

  /// Space-separated configurations to validate (default: the CI label's
  /// subset, then the build configurations)
  #[arg(long)]
  pub valid_configs: Option<String>,

  /// Package output directory
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Version constraint for the toolchain package dependency
  #[arg(long, default_value = "")]
  pub toolchain_version: String,

  /// Artifacts root given by the CI server
  #[arg(long, default_value = "")]
  pub artifacts: String,

  /// Maximum number of matrix entries running at once
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Cancel pending matrix entries after the first failure
  #[arg(long)]
  pub fail_fast: bool,

  /// Print the execution plan without running anything
  #[arg(long)]
  pub dry_run: bool,

  /// Directory for the session report (default: <workspace>/logs)
  #[arg(long)]
  pub log_dir: Option<PathBuf>,

  /// Summary format
  #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
  pub format: OutputFormat,
}

/// Execute a run.
///
/// Returns the process exit code for runs that got as far as executing
/// targets; errors before that are returned as `Err`.
pub fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
  let workdir = match &args.workspace {
    Some(dir) => std::path::absolute(dir).with_context(|| format!("Invalid workspace {}", dir.display()))?,
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let pipeline_path = workdir.join(&args.file);
  let pipeline = PipelineFile::load(&pipeline_path)?;
  let registry = pipeline.registry().context("Invalid configuration registry")?;

  if args.list_configs {
    for id in registry.ids() {
      println!("{id}");
    }
    return Ok(ExitCode::SUCCESS);
  }

  let label = std::env::var(&pipeline.label_env).ok().filter(|l| !l.is_empty());
  let selection = Selection::resolve(
    &registry,
    &pipeline.label_table(),
    args.configs.as_deref(),
    args.valid_configs.as_deref(),
    label.as_deref(),
  )?;
  info!(build = ?selection.build, valid = ?selection.valid, label = ?label, "configurations selected");

  let toolchain = match &args.toolchain {
    Some(dir) => Some(std::path::absolute(dir).with_context(|| format!("Invalid toolchain {}", dir.display()))?),
    None => None,
  };
  let mut base = ExecutionContext::from_process_env(&workdir, &pipeline.session);
  if let Some(toolchain) = &toolchain {
    base = base.overlay(&toolchain_overlay(toolchain));
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let repo = GitCli::new(Arc::new(base.clone()));
  let release = match &pipeline.release {
    Some(release) => Some(release.clone()),
    None if pipeline.needs_release() && !args.dry_run => match rt.block_on(repo.release_info()) {
      Ok(release) => Some(release),
      Err(err) => {
        warn!(error = %err, "release information unavailable; package steps will fail");
        None
      }
    },
    None => None,
  };
  let committer = match &release {
    Some(_) if !args.dry_run => rt.block_on(repo.committer()).unwrap_or_default(),
    _ => String::new(),
  };

  let ctx = run_variables(base, args, &pipeline, &workdir, toolchain.as_deref(), release.as_ref(), committer);

  let graph = Arc::new(pipeline.build_graph(&registry, &selection, release)?);
  let scheduler = Scheduler::new(Arc::clone(&graph), Arc::new(registry)).with_config(SchedulerConfig {
    jobs: args.jobs,
    matrix_policy: if args.fail_fast {
      MatrixPolicy::FailFast
    } else {
      MatrixPolicy::BestEffort
    },
  });

  if args.dry_run {
    let plan = scheduler.plan(&args.targets)?;
    output::print_plan(&plan, &graph);
    return Ok(ExitCode::SUCCESS);
  }

  let report = rt.block_on(scheduler.run(&args.targets, Arc::new(ctx)))?;

  let log_dir = args.log_dir.clone().unwrap_or_else(|| workdir.join("logs"));
  let report_path = report.persist(&log_dir).context("Failed to write session report")?;

  if args.format.is_json() {
    output::print_json(&report)?;
  } else {
    output::print_summary(&report, &report_path);
  }

  if report.is_success() {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::from(EXIT_TARGET_FAILED))
  }
}

/// Attach the run variables step templates can reference as `$${var:NAME}`.
fn run_variables(
  base: ExecutionContext,
  args: &RunArgs,
  pipeline: &PipelineFile,
  workdir: &Path,
  toolchain: Option<&Path>,
  release: Option<&ReleaseInfo>,
  committer: String,
) -> ExecutionContext {
  let path_var = |path: &Option<PathBuf>| {
    path
      .as_ref()
      .map(|p| p.to_string_lossy().into_owned())
      .unwrap_or_default()
  };
  let debug_flags = if args.debug { pipeline.debug_flags.as_str() } else { "" };
  let integration_branch = std::env::var("INTEGRATION_BRANCH").unwrap_or_default();

  let ctx = base
    .var("workspace", workdir.to_string_lossy())
    .var(
      "toolchain",
      toolchain.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
    )
    .var("toolchain_version", &args.toolchain_version)
    .var("artifacts", &args.artifacts)
    .var("output_dir", path_var(&args.output_dir))
    .var("debug_flags", debug_flags)
    .var("committer", committer)
    .var("integration_branch", integration_branch);

  match release {
    Some(release) => ctx
      .var("version", &release.version)
      .var("release_id", &release.release_id)
      .var("full_version", release.full_version())
      .var("revision", &release.commit),
    None => ctx,
  }
}
