use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every variant keeps the complete stdout it was given.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("program printed no non-empty line")]
    NoOutput { raw: String },
    #[error("leading token {token:?} is not a floating-point number")]
    NotANumber { token: String, raw: String },
    #[error("leading token {token:?} is not a finite, nonnegative duration")]
    InvalidDuration { token: String, raw: String },
}

impl ParseError {
    pub fn raw_output(&self) -> &str {
        match self {
            ParseError::NoOutput { raw }
            | ParseError::NotANumber { raw, .. }
            | ParseError::InvalidDuration { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("compilation of {} failed with status {}:\n{diagnostics}", .source_path.display(), status_of(.code))]
    Compilation {
        source_path: PathBuf,
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("source file not found: {}", .path.display())]
    SourceMissing { path: PathBuf },
    #[error("executable not found: {program}")]
    ExecutableNotFound { program: String },
    #[error("{program} exited with status {}: {}", status_of(.code), last_line(.stderr))]
    ProcessExecution {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{program} did not finish within {}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("all {attempts} repetitions failed; last error: {last}")]
    NoSuccessfulSamples {
        attempts: u32,
        last: Box<HarnessError>,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.into(),
            source,
        }
    }
}

pub fn status_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

fn status_of(code: &Option<i32>) -> String {
    status_label(*code)
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::trim)
        .unwrap_or("no diagnostic output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_raw_output() {
        let err = ParseError::NotANumber {
            token: "oops".to_string(),
            raw: "oops\n0.5\n".to_string(),
        };
        assert_eq!(err.raw_output(), "oops\n0.5\n");
        assert!(err.to_string().contains("\"oops\""));
    }

    #[test]
    fn process_error_reports_stderr_tail_and_signal() {
        let err = HarnessError::ProcessExecution {
            program: "mpiexec".to_string(),
            code: None,
            stderr: "warning: noisy\nrank 1 aborted\n\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "mpiexec exited with status signal: rank 1 aborted"
        );
    }

    #[test]
    fn compilation_error_shows_source_and_diagnostics() {
        let err = HarnessError::Compilation {
            source_path: PathBuf::from("heat.cpp"),
            code: Some(1),
            diagnostics: "heat.cpp:1: error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "compilation of heat.cpp failed with status 1:\nheat.cpp:1: error"
        );
    }
}
