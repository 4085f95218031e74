use crate::config::{Launcher, RunParameters};
use crate::error::{HarnessError, ValidationError};
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRunOutcome {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawRunOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs one fully built argument vector to completion.
///
/// `Ok` means the program ran, whatever its exit status. Implementations
/// return `ExecutableNotFound` when `argv[0]` cannot be started at all.
pub trait Invoke {
    fn invoke(&mut self, argv: &[String]) -> Result<RawRunOutcome, HarnessError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Invoke for ProcessInvoker {
    fn invoke(&mut self, argv: &[String]) -> Result<RawRunOutcome, HarnessError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ValidationError::new("argv", "empty argument vector"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        if self.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
        let output = match self.timeout {
            Some(limit) => wait_with_deadline(child, program, limit)?,
            None => child
                .wait_with_output()
                .map_err(|e| HarnessError::io(format!("failed to wait for {}", program), e))?,
        };
        Ok(RawRunOutcome {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub(crate) fn spawn_error(program: &str, err: std::io::Error) -> HarnessError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => HarnessError::ExecutableNotFound {
            program: program.to_string(),
        },
        _ => HarnessError::io(format!("failed to start {}", program), err),
    }
}

fn wait_with_deadline(
    mut child: Child,
    program: &str,
    limit: Duration,
) -> Result<Output, HarnessError> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let deadline = Instant::now() + limit;
    let timed_out = || HarnessError::Timeout {
        program: program.to_string(),
        timeout: limit,
    };
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill_group(&mut child);
                let _ = child.wait();
                return Err(timed_out());
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_group(&mut child);
                let _ = child.wait();
                return Err(HarnessError::io(format!("failed to wait for {}", program), e));
            }
        }
    };
    // descendants can keep the pipes open after the child itself has exited
    while !finished(&stdout) || !finished(&stderr) {
        if Instant::now() >= deadline {
            kill_group(&mut child);
            return Err(timed_out());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

/// Kills the child and everything it started. Under a deadline the child
/// leads its own process group, so the group id is its pid.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    unsafe {
        libc::killpg(child.id() as libc::pid_t, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

fn finished(handle: &Option<JoinHandle<Vec<u8>>>) -> bool {
    handle.as_ref().map_or(true, |h| h.is_finished())
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Turns run parameters into the simulation's positional command line.
///
/// Direct: `<exe> <size> <iterations> [<b0> <b1> <b2> <b3>]`.
/// Launched: `<launcher> <worker_flag> <workers> <exe> <size> <iterations> [...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    executable: PathBuf,
    launcher: Option<Launcher>,
    pass_boundaries: bool,
}

impl CommandTemplate {
    pub fn direct(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            launcher: None,
            pass_boundaries: false,
        }
    }

    pub fn launched(executable: impl Into<PathBuf>, launcher: Option<Launcher>) -> Self {
        Self {
            executable: executable.into(),
            launcher,
            pass_boundaries: false,
        }
    }

    pub fn with_boundaries(mut self, pass_boundaries: bool) -> Self {
        self.pass_boundaries = pass_boundaries;
        self
    }

    pub fn argv(&self, params: &RunParameters) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(launcher) = &self.launcher {
            argv.push(launcher.program.clone());
            argv.push(launcher.worker_flag.clone());
            argv.push(params.worker_count().to_string());
        }
        argv.push(self.executable.to_string_lossy().to_string());
        argv.push(params.problem_size().to_string());
        argv.push(params.iteration_count().to_string());
        if self.pass_boundaries {
            argv.extend(params.boundary_values().iter().map(format_real));
        }
        argv
    }
}

/// Shortest text that reads back as the same value, always with a decimal
/// point so `50` is passed as `50.0`.
pub fn format_real(value: &f64) -> String {
    format!("{:?}", value)
}
