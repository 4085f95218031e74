use crate::config::{FailurePolicy, RunParameters};
use crate::error::{HarnessError, ValidationError};
use crate::invoke::{CommandTemplate, Invoke};
use crate::timing::extract;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub params: RunParameters,
    pub mean_duration: f64,
    pub sample_count: u32,
    pub failed_attempts: u32,
    pub min_duration: f64,
    pub max_duration: f64,
}

pub struct Aggregator<'a, I: Invoke> {
    invoker: &'a mut I,
    policy: FailurePolicy,
}

impl<'a, I: Invoke> Aggregator<'a, I> {
    pub fn new(invoker: &'a mut I, policy: FailurePolicy) -> Self {
        Self { invoker, policy }
    }

    /// A program that cannot be started fails the aggregate under either
    /// policy.
    pub fn aggregate(
        &mut self,
        template: &CommandTemplate,
        params: RunParameters,
        samples: u32,
    ) -> Result<AggregateResult, HarnessError> {
        if samples == 0 {
            return Err(ValidationError::new("samples", "must be positive").into());
        }
        let argv = template.argv(&params);
        let mut durations = Vec::with_capacity(samples as usize);
        let mut last_error = None;
        for attempt in 1..=samples {
            match self.attempt(&argv) {
                Ok(secs) => {
                    info!("run {}/{}: {:.6} s", attempt, samples, secs);
                    durations.push(secs);
                }
                Err(err) => {
                    warn!("run {}/{} failed: {}", attempt, samples, err);
                    if let HarnessError::Parse(parse) = &err {
                        warn!("program output was: {:?}", parse.raw_output());
                    }
                    let give_up = self.policy == FailurePolicy::Strict
                        || matches!(err, HarnessError::ExecutableNotFound { .. });
                    if give_up {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }
        let failed_attempts = samples - durations.len() as u32;
        match summarize(&durations) {
            Some((mean, min, max)) => Ok(AggregateResult {
                params,
                mean_duration: mean,
                sample_count: durations.len() as u32,
                failed_attempts,
                min_duration: min,
                max_duration: max,
            }),
            None => Err(HarnessError::NoSuccessfulSamples {
                attempts: samples,
                last: Box::new(last_error.unwrap_or_else(|| {
                    ValidationError::new("samples", "no repetition ran").into()
                })),
            }),
        }
    }

    fn attempt(&mut self, argv: &[String]) -> Result<f64, HarnessError> {
        let outcome = self.invoker.invoke(argv)?;
        if !outcome.success() {
            return Err(HarnessError::ProcessExecution {
                program: argv.first().cloned().unwrap_or_default(),
                code: outcome.code,
                stderr: outcome.stderr,
            });
        }
        Ok(extract(&outcome.stdout)?)
    }
}

fn summarize(values: &[f64]) -> Option<(f64, f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((mean, min, max))
}
