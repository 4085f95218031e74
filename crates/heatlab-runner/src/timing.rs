//! Reads the duration a simulation reports about itself.
//!
//! The program is expected to print its wall time, in seconds, as the first
//! token of its first non-empty line. With a launcher in front, that line
//! comes from the coordinating rank; the other ranks must stay quiet on stdout
//! until it has been written. Everything after the first token is ignored.

use crate::error::ParseError;

pub type ParsedDuration = Result<f64, ParseError>;

pub fn extract(stdout: &str) -> ParsedDuration {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ParseError::NoOutput {
            raw: stdout.to_string(),
        })?;
    let token = line.split_whitespace().next().unwrap_or(line);
    let value: f64 = token.parse().map_err(|_| ParseError::NotANumber {
        token: token.to_string(),
        raw: stdout.to_string(),
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::InvalidDuration {
            token: token.to_string(),
            raw: stdout.to_string(),
        });
    }
    // -0.0 passes the sign check above
    Ok(value.abs())
}

/// Looks for a human-readable `Execution time: <secs> ...` line anywhere in
/// the output. Case-insensitive; the first line that parses wins.
pub fn labelled(stdout: &str) -> Option<f64> {
    const LABEL: &str = "execution time:";
    stdout.lines().find_map(|line| {
        let at = line.to_ascii_lowercase().find(LABEL)?;
        let value: f64 = line[at + LABEL.len()..]
            .split_whitespace()
            .next()?
            .parse()
            .ok()?;
        (value.is_finite() && value >= 0.0).then_some(value)
    })
}
