mod prompt;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use heatlab_runner::sweep::FailedCell;
use heatlab_runner::verify::ProgramRun;
use heatlab_runner::{ExperimentConfig, ExperimentSummary, RunParameters, VerifyReport};
use prompt::RunAnswers;
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "heatlab",
    version,
    about = "Build, run and benchmark the distributed heat-equation solver"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every (problem size, iterations, workers) cell and write the results table.
    Sweep {
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Average repeated runs of one configuration.
    Run {
        experiment: PathBuf,
        #[arg(long)]
        problem_size: Option<u32>,
        #[arg(long)]
        iterations: Option<u32>,
        #[arg(long)]
        workers: Option<u32>,
        #[arg(long)]
        samples: Option<u32>,
        #[arg(long)]
        interactive: bool,
        #[arg(long)]
        random_boundaries: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run the serial and distributed programs once and compare their outputs.
    Verify {
        experiment: PathBuf,
        #[arg(long, default_value_t = 100)]
        problem_size: u32,
        #[arg(long, default_value_t = 1000)]
        iterations: u32,
        #[arg(long, default_value_t = 4)]
        workers: u32,
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved plan without running anything.
    Describe {
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compile every configured target that is missing or stale.
    Build {
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Sweep { experiment, json } => {
            let config = ExperimentConfig::load(&experiment)?;
            if json && config.output.results_to_stdout() {
                return Err(anyhow!(
                    "--json cannot be combined with output.results: \"-\" (both use stdout)"
                ));
            }
            let outcome = heatlab_runner::run_experiment_sweep(&config)?;
            let report = &outcome.report;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "sweep",
                    "build": report.build,
                    "cells_total": report.cells_total,
                    "cells_completed": report.cells_completed,
                    "failed_cells": report.failed.iter().map(failed_cell_to_json).collect::<Vec<_>>(),
                    "results": outcome.results_path.as_ref().map(|p| p.display().to_string()),
                    "manifest": outcome.manifest_path.as_ref().map(|p| p.display().to_string()),
                    "run_id": outcome.run_id,
                })));
            }
            // with results on stdout the table owns it; the summary moves to stderr
            let lines = sweep_lines(&outcome);
            if config.output.results_to_stdout() {
                lines.iter().for_each(|l| eprintln!("{}", l));
            } else {
                lines.iter().for_each(|l| println!("{}", l));
            }
        }
        Commands::Run {
            experiment,
            problem_size,
            iterations,
            workers,
            samples,
            interactive,
            random_boundaries,
            json,
        } => {
            let config = ExperimentConfig::load(&experiment)?;
            let defaults = RunAnswers::default();
            let mut answers = RunAnswers {
                problem_size: problem_size.unwrap_or(defaults.problem_size),
                iterations: iterations.unwrap_or(defaults.iterations),
                workers: workers.unwrap_or(defaults.workers),
                samples: samples.unwrap_or(defaults.samples),
            };
            if interactive {
                let stdin = io::stdin();
                answers = prompt::prompt_run(&mut stdin.lock(), &mut io::stderr(), answers)?;
            }
            let boundaries = if random_boundaries {
                heatlab_runner::random_boundaries(&mut rand::thread_rng())
            } else {
                config.sweep.boundary_values
            };
            let params = RunParameters::new(
                answers.problem_size,
                answers.iterations,
                answers.workers,
                boundaries,
            )?;
            let mut invoker = heatlab_runner::invoker_for(&config);
            let (build, result) =
                heatlab_runner::run_single(&config, params, answers.samples, &mut invoker)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "build": build.as_str(),
                    "result": serde_json::to_value(&result)?,
                })));
            }
            println!("build: {}", build.as_str());
            println!("problem_size: {}", params.problem_size());
            println!("iteration_count: {}", params.iteration_count());
            println!("worker_count: {}", params.worker_count());
            println!("boundary_values: {:?}", params.boundary_values());
            println!("samples: {}", result.sample_count);
            if result.failed_attempts > 0 {
                println!("failed_attempts: {}", result.failed_attempts);
            }
            println!("min_duration: {:.6}", result.min_duration);
            println!("max_duration: {:.6}", result.max_duration);
            println!("mean_duration: {:.6}", result.mean_duration);
        }
        Commands::Verify {
            experiment,
            problem_size,
            iterations,
            workers,
            json,
        } => {
            let config = ExperimentConfig::load(&experiment)?;
            let params = RunParameters::new(
                problem_size,
                iterations,
                workers,
                config.sweep.boundary_values,
            )?;
            let mut invoker = heatlab_runner::invoker_for(&config);
            let report = heatlab_runner::verify(&config, &params, &mut invoker)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "verify",
                    "verify": serde_json::to_value(&report)?,
                })));
            }
            print_verify(&report);
        }
        Commands::Describe { experiment, json } => {
            let config = ExperimentConfig::load(&experiment)?;
            let summary = heatlab_runner::describe_experiment(&config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": serde_json::to_value(&summary)?,
                })));
            }
            print_summary(&summary);
        }
        Commands::Build { experiment, json } => {
            let config = ExperimentConfig::load(&experiment)?;
            let built = heatlab_runner::build_targets(&config)?;
            if json {
                let targets: serde_json::Map<String, Value> = built
                    .iter()
                    .map(|(name, status)| (name.to_string(), json!(status.as_str())))
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "build",
                    "targets": targets,
                })));
            }
            for (name, status) in built {
                println!("{}: {}", name, status.as_str());
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Sweep { json, .. }
        | Commands::Run { json, .. }
        | Commands::Verify { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Build { json, .. } => *json,
    }
}

fn failed_cell_to_json(cell: &FailedCell) -> Value {
    json!({
        "problem_size": cell.params.problem_size(),
        "iteration_count": cell.params.iteration_count(),
        "worker_count": cell.params.worker_count(),
        "error": cell.error,
    })
}

fn sweep_lines(outcome: &heatlab_runner::SweepOutcome) -> Vec<String> {
    let report = &outcome.report;
    let mut lines = vec![
        format!("build: {}", report.build),
        format!("cells_total: {}", report.cells_total),
        format!("cells_completed: {}", report.cells_completed),
    ];
    for cell in &report.failed {
        lines.push(format!(
            "failed: N={} I={} P={}: {}",
            cell.params.problem_size(),
            cell.params.iteration_count(),
            cell.params.worker_count(),
            cell.error
        ));
    }
    if let Some(run_id) = &outcome.run_id {
        lines.push(format!("run_id: {}", run_id));
    }
    if let Some(path) = &outcome.results_path {
        lines.push(format!("results: {}", path.display()));
    }
    if let Some(path) = &outcome.manifest_path {
        lines.push(format!("manifest: {}", path.display()));
    }
    lines
}

fn print_program_run(run: &ProgramRun) {
    println!("{}_command: {}", run.label, run.argv.join(" "));
    if let Some(secs) = run.wall_clock_secs {
        println!("{}_wall_clock: {:.4} s", run.label, secs);
    }
    if let Some(secs) = run.reported_secs {
        println!("{}_reported: {:.6} s", run.label, secs);
    }
    if let Some(err) = &run.error {
        println!("{}_error: {}", run.label, err);
    }
}

fn print_verify(report: &VerifyReport) {
    print_program_run(&report.serial);
    print_program_run(&report.distributed);
    if let Some(reason) = &report.comparison_skipped {
        println!("comparison: skipped ({})", reason);
    }
    if let Some(comparison) = &report.comparison {
        println!("comparison_command: {}", comparison.argv.join(" "));
        if let Some(err) = &comparison.error {
            println!("comparison_error: {}", err);
        }
        print!("{}", comparison.stdout);
    }
}

fn print_summary(summary: &ExperimentSummary) {
    println!("project_dir: {}", summary.project_dir.display());
    println!("distributed_source: {}", summary.distributed.source.display());
    println!("distributed_executable: {}", summary.distributed.executable.display());
    if let Some(serial) = &summary.serial {
        println!("serial_executable: {}", serial.executable.display());
    }
    if let Some(comparator) = &summary.comparator {
        println!("comparator_executable: {}", comparator.executable.display());
    }
    match &summary.launcher {
        Some(launcher) => println!("launcher: {} {}", launcher.program, launcher.worker_flag),
        None => println!("launcher: none"),
    }
    println!("problem_sizes: {:?}", summary.problem_sizes);
    println!("iteration_counts: {:?}", summary.iteration_counts);
    println!("worker_counts: {:?}", summary.worker_counts);
    println!("boundary_values: {:?}", summary.boundary_values);
    println!("pass_boundaries: {}", summary.pass_boundaries);
    println!("samples: {}", summary.samples);
    println!("failure_policy: {}", summary.failure_policy.as_str());
    println!("total_cells: {}", summary.total_cells);
    println!("total_invocations: {}", summary.total_invocations);
    if let Some(timeout) = summary.timeout_seconds {
        println!("timeout_seconds: {}", timeout);
    }
    println!("results: {}", summary.results.display());
    println!("config_digest: {}", summary.config_digest);
}
