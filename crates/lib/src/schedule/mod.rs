//! Target scheduler.
//!
//! Resolves the requested targets against the graph, validates every matrix
//! target's configurations, and only then runs the targets one by one in
//! topological order. A matrix target naming unknown configurations fails
//! without running. Matrix targets fan out into one task per configuration
//! entry. A target whose dependency failed (or was itself blocked) is not run
//! and is reported as blocked; independent branches keep going.

mod types;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub use types::{MatrixPolicy, ScheduleError, SchedulerConfig, StepError};

use crate::context::ExecutionContext;
use crate::exec::run_command;
use crate::graph::{GraphError, Step, Target, TargetGraph, TargetKind};
use crate::matrix::{ConfigError, ConfigRegistry, ConfigurationEntry};
use crate::package::{PackagingBackend, TarballBackend, assemble};
use crate::report::{CommandRecord, SessionReport, TargetReport, TargetState, UnitReport, UnitState};

/// Runs targets of a [`TargetGraph`].
pub struct Scheduler {
  graph: Arc<TargetGraph>,
  registry: Arc<ConfigRegistry>,
  backend: Arc<dyn PackagingBackend>,
  config: SchedulerConfig,
}

impl Scheduler {
  pub fn new(graph: Arc<TargetGraph>, registry: Arc<ConfigRegistry>) -> Self {
    Self {
      graph,
      registry,
      backend: Arc::new(TarballBackend),
      config: SchedulerConfig::default(),
    }
  }

  pub fn with_backend(mut self, backend: Arc<dyn PackagingBackend>) -> Self {
    self.backend = backend;
    self
  }

  pub fn with_config(mut self, config: SchedulerConfig) -> Self {
    self.config = config;
    self
  }

  /// Names of the targets `requested` would run, in execution order.
  pub fn plan<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<String>, GraphError> {
    Ok(
      self
        .graph
        .resolve(requested)?
        .iter()
        .map(|t| t.name.clone())
        .collect(),
    )
  }

  /// Run `requested` (or the graph's defaults) and return the session report.
  ///
  /// # Errors
  ///
  /// Graph errors (cycle, missing or unknown target) are returned before any
  /// command runs. Everything else, including unknown matrix configurations,
  /// is recorded in the report as a failure of the affected target.
  pub async fn run<S: AsRef<str>>(
    &self,
    requested: &[S],
    ctx: Arc<ExecutionContext>,
  ) -> Result<SessionReport, ScheduleError> {
    let plan = self.graph.resolve(requested)?;
    info!(targets = plan.len(), session = %ctx.session(), "resolved execution plan");

    // Every matrix target is validated before the first action runs; a
    // target with unknown configurations fails on its own.
    let mut expansions: HashMap<&str, Result<Vec<Arc<ConfigurationEntry>>, ConfigError>> = HashMap::new();
    for target in &plan {
      if let TargetKind::MatrixParallel { configs } = &target.kind {
        let validated = self.registry.validate(configs);
        if let Err(e) = &validated {
          error!(target = %target.name, error = %e, "invalid matrix configuration");
        }
        expansions.insert(&target.name, validated);
      }
    }

    let mut report = SessionReport::new(ctx.session());
    let mut states: HashMap<&str, TargetState> = HashMap::new();

    for target in &plan {
      let blocker = target
        .deps
        .iter()
        .find(|dep| states.get(dep.as_str()).is_some_and(TargetState::blocks_dependents));

      if let Some(blocker) = blocker {
        warn!(target = %target.name, blocked_by = %blocker, "target blocked by failed dependency");
        let state = TargetState::Blocked { by: blocker.clone() };
        states.insert(&target.name, state.clone());
        report.push(TargetReport {
          name: target.name.clone(),
          title: target.title.clone(),
          matrix: target.kind.is_matrix(),
          state,
          units: Vec::new(),
        });
        continue;
      }

      info!(target = %target.name, matrix = target.kind.is_matrix(), "starting target");
      let (units, config_error) = match expansions.remove(target.name.as_str()) {
        Some(Ok(entries)) => (self.run_matrix(target, entries, &ctx).await, false),
        Some(Err(e)) => (vec![UnitReport::failed(None, e.to_string())], true),
        None => (
          vec![run_unit(Arc::clone(target), None, Arc::clone(&ctx), Arc::clone(&self.backend)).await],
          false,
        ),
      };

      let failed = units.iter().any(|u| u.state != UnitState::Succeeded);
      let state = match (failed, target.tolerant && !config_error) {
        (false, _) => TargetState::Succeeded,
        (true, true) => TargetState::Tolerated,
        (true, false) => TargetState::Failed,
      };
      match state {
        TargetState::Succeeded => info!(target = %target.name, "target succeeded"),
        TargetState::Tolerated => warn!(target = %target.name, "target failed (tolerated)"),
        _ => error!(target = %target.name, "target failed"),
      }

      states.insert(&target.name, state.clone());
      report.push(TargetReport {
        name: target.name.clone(),
        title: target.title.clone(),
        matrix: target.kind.is_matrix(),
        state,
        units,
      });
    }

    info!(
      failed = report.failures().count(),
      tolerated = report.tolerated_count(),
      "session complete"
    );
    Ok(report)
  }

  /// Run one unit per entry concurrently and return the unit reports in
  /// entry order.
  async fn run_matrix(
    &self,
    target: &Arc<Target>,
    entries: Vec<Arc<ConfigurationEntry>>,
    ctx: &Arc<ExecutionContext>,
  ) -> Vec<UnitReport> {
    let semaphore = self.config.jobs.map(|jobs| Arc::new(Semaphore::new(jobs.max(1))));
    let fail_fast = self.config.matrix_policy == MatrixPolicy::FailFast;
    let tripped = Arc::new(AtomicBool::new(false));
    let ids: Vec<String> = entries.iter().map(|e| e.id().to_string()).collect();

    debug!(target = %target.name, entries = entries.len(), jobs = ?self.config.jobs, "expanding matrix");

    let mut join_set = JoinSet::new();
    for (index, entry) in entries.into_iter().enumerate() {
      let target = Arc::clone(target);
      let ctx = Arc::clone(ctx);
      let backend = Arc::clone(&self.backend);
      let semaphore = semaphore.clone();
      let tripped = Arc::clone(&tripped);
      let span = info_span!("unit", target = %target.name, config = %entry.id());

      join_set.spawn(
        async move {
          let _permit = match semaphore {
            Some(semaphore) => semaphore.acquire_owned().await.ok(),
            None => None,
          };

          if fail_fast && tripped.load(Ordering::SeqCst) {
            info!("cancelled after sibling failure");
            return (index, UnitReport::cancelled(Some(entry.id().to_string())));
          }

          let unit = run_unit(target, Some(entry), ctx, backend).await;
          if fail_fast && unit.state == UnitState::Failed {
            tripped.store(true, Ordering::SeqCst);
          }
          (index, unit)
        }
        .instrument(span),
      );
    }

    let mut slots: Vec<Option<UnitReport>> = vec![None; ids.len()];
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((index, unit)) => slots[index] = Some(unit),
        Err(e) => error!(target = %target.name, error = %e, "matrix unit task panicked"),
      }
    }

    slots
      .into_iter()
      .zip(ids)
      .map(|(slot, id)| {
        slot.unwrap_or_else(|| UnitReport::failed(Some(id), "unit task panicked"))
      })
      .collect()
  }
}

/// Compute and execute the steps of one unit. Steps run in order and the
/// first failing step ends the unit.
async fn run_unit(
  target: Arc<Target>,
  entry: Option<Arc<ConfigurationEntry>>,
  ctx: Arc<ExecutionContext>,
  backend: Arc<dyn PackagingBackend>,
) -> UnitReport {
  let configuration = entry.as_ref().map(|e| e.id().to_string());
  let mut commands = Vec::new();

  let steps = match target.action.steps(&ctx, entry.as_deref()) {
    Ok(steps) => steps,
    Err(e) => {
      error!(target = %target.name, error = %e, "action failed");
      return UnitReport {
        configuration,
        state: UnitState::Failed,
        commands,
        error: Some(StepError::from(e).to_string()),
      };
    }
  };

  let default_dir = entry.as_ref().map(|e| ctx.build_dir(e));

  for step in &steps {
    match execute_step(step, &ctx, default_dir.as_deref(), &backend).await {
      Ok(record) => commands.push(record),
      Err(e) => {
        error!(target = %target.name, step = %step.describe(), error = %e, "step failed");
        if let StepError::Command(cmd_err) = &e
          && let Some(record) = CommandRecord::from_error(cmd_err)
        {
          commands.push(record);
        }
        return UnitReport {
          configuration,
          state: UnitState::Failed,
          commands,
          error: Some(e.to_string()),
        };
      }
    }
  }

  UnitReport {
    configuration,
    state: UnitState::Succeeded,
    commands,
    error: None,
  }
}

async fn execute_step(
  step: &Step,
  ctx: &ExecutionContext,
  default_dir: Option<&Path>,
  backend: &Arc<dyn PackagingBackend>,
) -> Result<CommandRecord, StepError> {
  match step {
    Step::Command(invocation) => Ok(run_command(invocation, ctx, default_dir).await?.into()),
    Step::Package(batch) => {
      let batch = batch.clone();
      let backend = Arc::clone(backend);
      let written = tokio::task::spawn_blocking(move || assemble(&batch, backend.as_ref())).await??;
      let listing: String = written.iter().map(|p| format!("{}\n", p.display())).collect();
      Ok(CommandRecord::internal(step.describe(), listing))
    }
    Step::Params { path, params } => {
      let path = ctx.resolve_path(path);
      params.write(&path).map_err(|source| StepError::Write {
        path: path.clone(),
        source,
      })?;
      info!(path = %path.display(), "parameter file written");
      Ok(CommandRecord::internal(step.describe(), params.render()))
    }
  }
}
