use crate::build::ensure_built;
use crate::config::{ExperimentConfig, RunParameters};
use crate::error::{status_label, HarnessError};
use crate::invoke::{CommandTemplate, Invoke};
use crate::timing::{extract, labelled};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramRun {
    pub label: &'static str,
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub wall_clock_secs: Option<f64>,
    /// What the program printed about itself, when it followed the convention.
    pub reported_secs: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyReport {
    pub params: RunParameters,
    pub serial: ProgramRun,
    pub distributed: ProgramRun,
    pub comparison: Option<Comparison>,
    pub comparison_skipped: Option<String>,
}

/// Failing to build either simulation is fatal. The comparator is optional:
/// a missing source or a failed build only skips the comparison.
pub fn verify<I: Invoke>(
    config: &ExperimentConfig,
    params: &RunParameters,
    invoker: &mut I,
) -> Result<VerifyReport> {
    let serial = config
        .targets
        .serial
        .as_ref()
        .ok_or_else(|| anyhow!("verify requires targets.serial in the experiment"))?;
    let distributed = &config.targets.distributed;
    ensure_built(serial).context("serial build failed")?;
    ensure_built(distributed).context("distributed build failed")?;
    if let Some(comparator) = &config.targets.comparator {
        if comparator.source.exists() {
            if let Err(err) = ensure_built(comparator) {
                warn!("comparator build failed, comparison will be skipped: {}", err);
            }
        }
    }

    let serial_argv = CommandTemplate::direct(&serial.executable).argv(params);
    let serial_run = timed_run("serial", serial_argv, invoker);
    let distributed_argv =
        CommandTemplate::launched(&distributed.executable, config.launcher.clone()).argv(params);
    let distributed_run = timed_run("distributed", distributed_argv, invoker);

    let comparator_exe = config
        .targets
        .comparator
        .as_ref()
        .map(|c| c.executable.clone())
        .filter(|exe| exe.exists());
    let (comparison, comparison_skipped) = match comparator_exe {
        Some(exe) => {
            let argv = vec![
                exe.to_string_lossy().to_string(),
                config.output.serial_output.to_string_lossy().to_string(),
                config.output.distributed_output.to_string_lossy().to_string(),
            ];
            info!("running comparator: {}", argv.join(" "));
            let comparison = match invoker.invoke(&argv) {
                Ok(outcome) => Comparison {
                    argv,
                    exit_code: outcome.code,
                    error: (!outcome.success())
                        .then(|| format!("comparator exited with status {}", status_label(outcome.code))),
                    stdout: outcome.stdout,
                },
                Err(err) => Comparison {
                    argv,
                    exit_code: None,
                    stdout: String::new(),
                    error: Some(err.to_string()),
                },
            };
            (Some(comparison), None)
        }
        None => (None, Some("comparator executable not found".to_string())),
    };

    Ok(VerifyReport {
        params: *params,
        serial: serial_run,
        distributed: distributed_run,
        comparison,
        comparison_skipped,
    })
}

fn timed_run<I: Invoke>(label: &'static str, argv: Vec<String>, invoker: &mut I) -> ProgramRun {
    info!("running {} program: {}", label, argv.join(" "));
    let started = Instant::now();
    let result = invoker.invoke(&argv);
    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(outcome) => {
            let error = (!outcome.success()).then(|| {
                HarnessError::ProcessExecution {
                    program: argv[0].clone(),
                    code: outcome.code,
                    stderr: outcome.stderr.clone(),
                }
                .to_string()
            });
            let reported_secs = extract(&outcome.stdout)
                .ok()
                .or_else(|| labelled(&outcome.stdout));
            match reported_secs {
                Some(secs) => info!("{} program reported {:.4} s", label, secs),
                None => info!("{} program did not report a leading duration", label),
            }
            ProgramRun {
                label,
                argv,
                exit_code: outcome.code,
                wall_clock_secs: Some(elapsed),
                reported_secs,
                error,
            }
        }
        Err(err) => {
            warn!("{} program failed: {}", label, err);
            ProgramRun {
                label,
                argv,
                exit_code: None,
                wall_clock_secs: None,
                reported_secs: None,
                error: Some(err.to_string()),
            }
        }
    }
}
