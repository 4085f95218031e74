pub mod aggregate;
pub mod build;
pub mod config;
pub mod error;
pub mod invoke;
pub mod manifest;
pub mod single;
pub mod sink;
pub mod sweep;
pub mod timing;
pub mod verify;

pub use aggregate::{AggregateResult, Aggregator};
pub use build::{ensure_built, needs_rebuild, BuildStatus};
pub use config::{BuildTarget, ExperimentConfig, FailurePolicy, Launcher, RunParameters};
pub use error::{HarnessError, ParseError, ValidationError};
pub use invoke::{CommandTemplate, Invoke, ProcessInvoker, RawRunOutcome};
pub use single::{random_boundaries, run_single};
pub use sink::{ResultRow, ResultSink};
pub use sweep::{run_sweep, SweepPlan, SweepReport, SweepSetup};
pub use timing::extract;
pub use verify::{verify, VerifyReport};

use anyhow::{Context, Result};
use manifest::{manifest_path_for, SweepManifest};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

pub struct SweepOutcome {
    pub report: SweepReport,
    pub results_path: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub project_dir: PathBuf,
    pub distributed: BuildTarget,
    pub serial: Option<BuildTarget>,
    pub comparator: Option<BuildTarget>,
    pub launcher: Option<Launcher>,
    pub problem_sizes: Vec<u32>,
    pub iteration_counts: Vec<u32>,
    pub worker_counts: Vec<u32>,
    pub boundary_values: [f64; 4],
    pub pass_boundaries: bool,
    pub samples: u32,
    pub failure_policy: FailurePolicy,
    pub total_cells: usize,
    pub total_invocations: usize,
    pub timeout_seconds: Option<u64>,
    pub results: PathBuf,
    pub config_digest: String,
}

pub fn describe_experiment(config: &ExperimentConfig) -> Result<ExperimentSummary> {
    let plan = SweepPlan::from_config(config)?;
    let sweep = &config.sweep;
    Ok(ExperimentSummary {
        project_dir: config.project_dir().to_path_buf(),
        distributed: config.targets.distributed.clone(),
        serial: config.targets.serial.clone(),
        comparator: config.targets.comparator.clone(),
        launcher: config.launcher.clone(),
        problem_sizes: sweep.problem_sizes.clone(),
        iteration_counts: sweep.iteration_counts.clone(),
        worker_counts: sweep.worker_counts.clone(),
        boundary_values: sweep.boundary_values,
        pass_boundaries: sweep.pass_boundaries,
        samples: plan.samples(),
        failure_policy: sweep.failure_policy,
        total_cells: plan.total_cells(),
        total_invocations: plan.total_cells() * plan.samples() as usize,
        timeout_seconds: config.timeout_seconds,
        results: config.output.results.clone(),
        config_digest: config.digest(),
    })
}

pub fn invoker_for(config: &ExperimentConfig) -> ProcessInvoker {
    ProcessInvoker::new()
        .with_current_dir(config.project_dir())
        .with_timeout(config.timeout())
}

pub fn build_targets(config: &ExperimentConfig) -> Result<Vec<(&'static str, BuildStatus)>> {
    let mut built = Vec::new();
    let targets = [
        ("serial", config.targets.serial.as_ref()),
        ("distributed", Some(&config.targets.distributed)),
        ("comparator", config.targets.comparator.as_ref()),
    ];
    for (name, target) in targets {
        if let Some(target) = target {
            let status =
                ensure_built(target).with_context(|| format!("{} build failed", name))?;
            built.push((name, status));
        }
    }
    Ok(built)
}

pub fn run_experiment_sweep(config: &ExperimentConfig) -> Result<SweepOutcome> {
    let mut invoker = invoker_for(config);
    run_experiment_sweep_with(config, &mut invoker)
}

/// Results and the manifest are only touched once the build has succeeded,
/// so a failed compile leaves the previous table in place.
pub fn run_experiment_sweep_with<I: Invoke>(
    config: &ExperimentConfig,
    invoker: &mut I,
) -> Result<SweepOutcome> {
    let setup = SweepSetup::from_config(config)?;
    let build = ensure_built(&setup.target).context("build failed; no sweep cell was run")?;

    if config.output.results_to_stdout() {
        let mut sink = ResultSink::new(io::stdout().lock());
        let report = sweep::stream_cells(&setup, build, invoker, &mut sink, |_| {})?;
        drop(sink.finish()?);
        return Ok(SweepOutcome {
            report,
            results_path: None,
            manifest_path: None,
            run_id: None,
        });
    }

    let results = config.output.results.clone();
    if let Some(parent) = results.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut sink = ResultSink::create(&results)?;
    let mut manifest = SweepManifest::begin(
        &manifest_path_for(&results),
        &results,
        &config.digest(),
        setup.plan.total_cells(),
    )?;
    let report = sweep::stream_cells(&setup, build, invoker, &mut sink, |outcome| {
        if let Err(err) = manifest.record(outcome) {
            warn!("failed to update sweep manifest: {:#}", err);
        }
    })?;
    sink.finish()?;
    manifest.complete()?;
    Ok(SweepOutcome {
        report,
        results_path: Some(results),
        manifest_path: Some(manifest.path().to_path_buf()),
        run_id: Some(manifest.run_id().to_string()),
    })
}
