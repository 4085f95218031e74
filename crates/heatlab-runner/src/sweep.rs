use crate::aggregate::{AggregateResult, Aggregator};
use crate::build::{ensure_built, BuildStatus};
use crate::config::{
    validate_boundaries, validate_dimension, validate_positive, BuildTarget, ExperimentConfig,
    FailurePolicy, RunParameters,
};
use crate::error::{HarnessError, ValidationError};
use crate::invoke::{CommandTemplate, Invoke};
use crate::sink::{ResultRow, ResultSink};
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPlan {
    problem_sizes: Vec<u32>,
    iteration_counts: Vec<u32>,
    worker_counts: Vec<u32>,
    boundary_values: [f64; 4],
    samples: u32,
}

impl SweepPlan {
    pub fn new(
        problem_sizes: Vec<u32>,
        iteration_counts: Vec<u32>,
        worker_counts: Vec<u32>,
        boundary_values: [f64; 4],
        samples: u32,
    ) -> Result<Self, ValidationError> {
        validate_dimension("problem_sizes", &problem_sizes)?;
        validate_dimension("iteration_counts", &iteration_counts)?;
        validate_dimension("worker_counts", &worker_counts)?;
        validate_boundaries("boundary_values", &boundary_values)?;
        validate_positive("samples", samples)?;
        Ok(Self {
            problem_sizes,
            iteration_counts,
            worker_counts,
            boundary_values,
            samples,
        })
    }

    pub fn from_config(config: &ExperimentConfig) -> Result<Self, ValidationError> {
        let sweep = &config.sweep;
        Self::new(
            sweep.problem_sizes.clone(),
            sweep.iteration_counts.clone(),
            sweep.worker_counts.clone(),
            sweep.boundary_values,
            sweep.samples,
        )
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn total_cells(&self) -> usize {
        self.problem_sizes.len() * self.iteration_counts.len() * self.worker_counts.len()
    }

    pub fn cells(&self) -> Cells<'_> {
        Cells {
            plan: self,
            next: 0,
        }
    }
}

/// Cartesian product of a plan: problem size outermost, worker count innermost.
#[derive(Debug, Clone)]
pub struct Cells<'a> {
    plan: &'a SweepPlan,
    next: usize,
}

impl Iterator for Cells<'_> {
    type Item = RunParameters;

    fn next(&mut self) -> Option<RunParameters> {
        let plan = self.plan;
        if self.next >= plan.total_cells() {
            return None;
        }
        let workers = plan.worker_counts.len();
        let iterations = plan.iteration_counts.len();
        let w = self.next % workers;
        let i = (self.next / workers) % iterations;
        let p = self.next / (workers * iterations);
        self.next += 1;
        Some(RunParameters::from_validated(
            plan.problem_sizes[p],
            plan.iteration_counts[i],
            plan.worker_counts[w],
            plan.boundary_values,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.total_cells().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Cells<'_> {}

#[derive(Debug)]
pub struct CellOutcome {
    pub index: usize,
    pub params: RunParameters,
    pub result: Result<AggregateResult, HarnessError>,
}

/// Consumes its position as it goes; a sweep cannot be rewound.
pub struct Sweep<'a, I: Invoke> {
    cells: std::iter::Enumerate<Cells<'a>>,
    template: &'a CommandTemplate,
    aggregator: Aggregator<'a, I>,
    samples: u32,
    total: usize,
}

impl<'a, I: Invoke> Sweep<'a, I> {
    pub fn new(
        plan: &'a SweepPlan,
        template: &'a CommandTemplate,
        invoker: &'a mut I,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            cells: plan.cells().enumerate(),
            template,
            aggregator: Aggregator::new(invoker, policy),
            samples: plan.samples(),
            total: plan.total_cells(),
        }
    }
}

impl<I: Invoke> Iterator for Sweep<'_, I> {
    type Item = CellOutcome;

    fn next(&mut self) -> Option<CellOutcome> {
        let (index, params) = self.cells.next()?;
        info!(
            "cell {}/{}: problem_size={} iterations={} workers={}",
            index + 1,
            self.total,
            params.problem_size(),
            params.iteration_count(),
            params.worker_count()
        );
        let result = self
            .aggregator
            .aggregate(self.template, params, self.samples);
        Some(CellOutcome {
            index,
            params,
            result,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cells.size_hint()
    }
}

#[derive(Debug, Clone)]
pub struct SweepSetup {
    pub target: BuildTarget,
    pub plan: SweepPlan,
    pub template: CommandTemplate,
    pub policy: FailurePolicy,
}

impl SweepSetup {
    pub fn from_config(config: &ExperimentConfig) -> Result<Self, ValidationError> {
        let target = config.targets.distributed.clone();
        let template = CommandTemplate::launched(&target.executable, config.launcher.clone())
            .with_boundaries(config.sweep.pass_boundaries);
        Ok(Self {
            plan: SweepPlan::from_config(config)?,
            template,
            policy: config.sweep.failure_policy,
            target,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCell {
    pub params: RunParameters,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub build: &'static str,
    pub cells_total: usize,
    pub cells_completed: usize,
    pub failed: Vec<FailedCell>,
}

/// A build failure or a failed write to the sink ends the sweep with an
/// error. A cell that fails to aggregate goes to `observe` and leaves no row.
pub fn run_sweep<I, W, F>(
    setup: &SweepSetup,
    invoker: &mut I,
    sink: &mut ResultSink<W>,
    observe: F,
) -> Result<SweepReport, HarnessError>
where
    I: Invoke,
    W: Write,
    F: FnMut(&CellOutcome),
{
    let build = ensure_built(&setup.target)?;
    stream_cells(setup, build, invoker, sink, observe)
}

/// The part of [`run_sweep`] after the build, for callers that must build
/// before opening their sink.
pub fn stream_cells<I, W, F>(
    setup: &SweepSetup,
    build: BuildStatus,
    invoker: &mut I,
    sink: &mut ResultSink<W>,
    mut observe: F,
) -> Result<SweepReport, HarnessError>
where
    I: Invoke,
    W: Write,
    F: FnMut(&CellOutcome),
{
    if build == BuildStatus::UpToDate {
        info!(executable = %setup.target.executable.display(), "executable is up to date");
    }
    sink.write_header()?;

    let total = setup.plan.total_cells();
    let mut report = SweepReport {
        build: build.as_str(),
        cells_total: total,
        cells_completed: 0,
        failed: Vec::new(),
    };
    for outcome in Sweep::new(&setup.plan, &setup.template, invoker, setup.policy) {
        let p = &outcome.params;
        match &outcome.result {
            Ok(result) => {
                sink.write_row(&ResultRow::from(result))?;
                report.cells_completed += 1;
                info!(
                    "done: N={} I={} P={} time={:.6}",
                    p.problem_size(),
                    p.iteration_count(),
                    p.worker_count(),
                    result.mean_duration
                );
            }
            Err(err) => {
                warn!(
                    "skipping N={} I={} P={}: {}",
                    p.problem_size(),
                    p.iteration_count(),
                    p.worker_count(),
                    err
                );
                report.failed.push(FailedCell {
                    params: outcome.params,
                    error: err.to_string(),
                });
            }
        }
        observe(&outcome);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BOUNDARY_VALUES;
    use crate::sink::COLUMNS;
    use crate::testutil::{fresh_target, read_table, scratch_dir, ScriptedInvoker, Step};
    use std::fs;

    fn triples(plan: &SweepPlan) -> Vec<(u32, u32, u32)> {
        plan.cells()
            .map(|c| (c.problem_size(), c.iteration_count(), c.worker_count()))
            .collect()
    }

    #[test]
    fn cells_follow_nested_order() {
        let plan = SweepPlan::new(
            vec![100, 200],
            vec![500, 1000],
            vec![1, 2, 4],
            DEFAULT_BOUNDARY_VALUES,
            1,
        )
        .expect("plan");
        let cells = triples(&plan);
        assert_eq!(cells.len(), 12);
        assert_eq!(plan.cells().len(), 12);
        assert_eq!(
            &cells[..4],
            &[(100, 500, 1), (100, 500, 2), (100, 500, 4), (100, 1000, 1)]
        );
        assert_eq!(cells[11], (200, 1000, 4));
        let mut expected = Vec::new();
        for p in [100, 200] {
            for i in [500, 1000] {
                for w in [1, 2, 4] {
                    expected.push((p, i, w));
                }
            }
        }
        assert_eq!(cells, expected);
    }

    #[test]
    fn plan_rejects_empty_dimension() {
        let err = SweepPlan::new(vec![], vec![1], vec![1], DEFAULT_BOUNDARY_VALUES, 1)
            .expect_err("empty sizes");
        assert_eq!(err.field, "problem_sizes");
        let err = SweepPlan::new(vec![1], vec![1], vec![1], DEFAULT_BOUNDARY_VALUES, 0)
            .expect_err("no samples");
        assert_eq!(err.field, "samples");
    }

    #[test]
    fn sweep_attempts_every_cell_even_when_some_fail() {
        let plan = SweepPlan::new(vec![10, 20, 30], vec![5, 6], vec![1, 2], DEFAULT_BOUNDARY_VALUES, 2)
            .expect("plan");
        let template = CommandTemplate::direct("./heat");
        let mut invoker = ScriptedInvoker::from_fn(|argv| {
            if argv[1] == "20" {
                Step::stdout("bad output\n")
            } else {
                Step::stdout("0.5\n")
            }
        });
        let outcomes: Vec<CellOutcome> =
            Sweep::new(&plan, &template, &mut invoker, FailurePolicy::Strict).collect();
        assert_eq!(outcomes.len(), 3 * 2 * 2);
        assert_eq!(
            outcomes.iter().filter(|o| o.result.is_err()).count(),
            4
        );
        assert!(outcomes.iter().enumerate().all(|(i, o)| o.index == i));
    }

    #[test]
    fn sweep_is_lazy() {
        let plan = SweepPlan::new(vec![1, 2], vec![1], vec![1], DEFAULT_BOUNDARY_VALUES, 1)
            .expect("plan");
        let template = CommandTemplate::direct("./heat");
        let mut invoker = ScriptedInvoker::from_fn(|_| Step::stdout("1.0\n"));
        {
            let mut sweep = Sweep::new(&plan, &template, &mut invoker, FailurePolicy::Strict);
            assert_eq!(sweep.size_hint(), (2, Some(2)));
            sweep.next().expect("first cell");
        }
        assert_eq!(invoker.calls().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn run_sweep_writes_rows_in_enumeration_order() {
        let dir = scratch_dir("sweep_rows");
        let setup = SweepSetup {
            target: fresh_target(&dir),
            plan: SweepPlan::new(vec![100, 200], vec![500], vec![1, 2], DEFAULT_BOUNDARY_VALUES, 3)
                .expect("plan"),
            template: CommandTemplate::direct(dir.join("heat")),
            policy: FailurePolicy::Strict,
        };
        let mut invoker = ScriptedInvoker::from_fn(|_| Step::stdout("0.010000\nrank 0 done\n"));
        let mut sink = ResultSink::new(Vec::new());
        let mut seen = Vec::new();
        let report = run_sweep(&setup, &mut invoker, &mut sink, |o| seen.push(o.index))
            .expect("sweep");
        assert_eq!(report.build, "up_to_date");
        assert_eq!(report.cells_total, 4);
        assert_eq!(report.cells_completed, 4);
        assert!(report.failed.is_empty());
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(invoker.calls().len(), 12);

        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");
        let table = read_table(&text);
        assert_eq!(table.len(), 5);
        let keys: Vec<(String, String, String)> = table[1..]
            .iter()
            .map(|f| {
                assert_eq!(f.len(), COLUMNS.len());
                assert_eq!(f[3], "0.010000");
                (f[0].clone(), f[1].clone(), f[2].clone())
            })
            .collect();
        let expected: Vec<(String, String, String)> =
            [("100", "500", "1"), ("100", "500", "2"), ("200", "500", "1"), ("200", "500", "2")]
                .iter()
                .map(|(a, b, c)| (a.to_string(), b.to_string(), c.to_string()))
                .collect();
        assert_eq!(keys, expected);
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn failed_cell_leaves_gap_and_sweep_continues() {
        let dir = scratch_dir("sweep_gap");
        let setup = SweepSetup {
            target: fresh_target(&dir),
            plan: SweepPlan::new(vec![100, 200], vec![500], vec![1, 2], DEFAULT_BOUNDARY_VALUES, 1)
                .expect("plan"),
            template: CommandTemplate::direct(dir.join("heat")),
            policy: FailurePolicy::Strict,
        };
        let mut calls = 0;
        let mut invoker = ScriptedInvoker::from_fn(move |_| {
            calls += 1;
            if calls == 2 {
                Step::exit(137, "", "killed\n")
            } else {
                Step::stdout("1.25\n")
            }
        });
        let mut sink = ResultSink::new(Vec::new());
        let report = run_sweep(&setup, &mut invoker, &mut sink, |_| {}).expect("sweep");
        assert_eq!(report.cells_completed, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].params.problem_size(), 100);
        assert_eq!(report.failed[0].params.worker_count(), 2);
        let text = String::from_utf8(sink.finish().expect("finish")).expect("utf8");
        assert_eq!(text.lines().count(), 4);
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn build_failure_stops_before_any_cell() {
        let dir = scratch_dir("sweep_build_fail");
        let mut target = fresh_target(&dir);
        fs::remove_file(&target.executable).expect("remove exe");
        target.compiler = crate::testutil::write_script(&dir, "badcc", "echo nope >&2\nexit 2\n")
            .to_string_lossy()
            .to_string();
        let setup = SweepSetup {
            target,
            plan: SweepPlan::new(vec![100], vec![500], vec![1], DEFAULT_BOUNDARY_VALUES, 1)
                .expect("plan"),
            template: CommandTemplate::direct(dir.join("heat")),
            policy: FailurePolicy::BestEffort,
        };
        let mut invoker = ScriptedInvoker::from_fn(|_| Step::stdout("1.0\n"));
        let mut sink = ResultSink::new(Vec::new());
        let err = run_sweep(&setup, &mut invoker, &mut sink, |_| {}).expect_err("build fails");
        assert!(matches!(err, HarnessError::Compilation { code: Some(2), .. }));
        assert!(invoker.calls().is_empty());
        assert_eq!(sink.rows_written(), 0);
        let _ = fs::remove_dir_all(dir);
    }
}
