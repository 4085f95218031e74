use anyhow::Result;
use heatlab_runner::ValidationError;
use std::io::{BufRead, Write};

/// Blank input takes the default; anything else must be a positive integer.
pub fn parse_positive(raw: &str, field: &str, default: u32) -> Result<u32, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default);
    }
    match raw.parse::<u32>() {
        Ok(0) => Err(ValidationError::new(field, "must be positive")),
        Ok(value) => Ok(value),
        Err(_) => Err(ValidationError::new(
            field,
            format!("'{}' is not a positive integer", raw),
        )),
    }
}

/// Asks until the answer parses. End of input counts as accepting the default.
pub fn prompt_positive<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
    field: &str,
    default: u32,
) -> Result<u32> {
    loop {
        write!(out, "{} (default {}): ", label, default)?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(default);
        }
        match parse_positive(&line, field, default) {
            Ok(value) => return Ok(value),
            Err(err) => writeln!(out, "{}", err)?,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAnswers {
    pub problem_size: u32,
    pub iterations: u32,
    pub workers: u32,
    pub samples: u32,
}

impl Default for RunAnswers {
    fn default() -> Self {
        Self {
            problem_size: 100,
            iterations: 1000,
            workers: 4,
            samples: 1,
        }
    }
}

/// Fills in every value of a single run, offering `defaults` for each.
pub fn prompt_run<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    defaults: RunAnswers,
) -> Result<RunAnswers> {
    Ok(RunAnswers {
        problem_size: prompt_positive(
            input,
            out,
            "Problem size (interior grid points per side)",
            "problem_size",
            defaults.problem_size,
        )?,
        iterations: prompt_positive(
            input,
            out,
            "Iterations",
            "iteration_count",
            defaults.iterations,
        )?,
        workers: prompt_positive(input, out, "Worker processes", "worker_count", defaults.workers)?,
        samples: prompt_positive(input, out, "Repetitions", "samples", defaults.samples)?,
    })
}
