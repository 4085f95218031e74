use crate::aggregate::{AggregateResult, Aggregator};
use crate::build::{ensure_built, BuildStatus};
use crate::config::{ExperimentConfig, RunParameters};
use crate::error::HarnessError;
use crate::invoke::{CommandTemplate, Invoke};
use rand::Rng;

/// Four boundary temperatures drawn uniformly from `[0, 100)`.
pub fn random_boundaries<R: Rng + ?Sized>(rng: &mut R) -> [f64; 4] {
    std::array::from_fn(|_| rng.gen_range(0.0..100.0))
}

pub fn run_single<I: Invoke>(
    config: &ExperimentConfig,
    params: RunParameters,
    samples: u32,
    invoker: &mut I,
) -> Result<(BuildStatus, AggregateResult), HarnessError> {
    let target = &config.targets.distributed;
    let build = ensure_built(target)?;
    let template = CommandTemplate::launched(&target.executable, config.launcher.clone())
        .with_boundaries(config.sweep.pass_boundaries);
    let result = Aggregator::new(invoker, config.sweep.failure_policy)
        .aggregate(&template, params, samples)?;
    Ok((build, result))
}
