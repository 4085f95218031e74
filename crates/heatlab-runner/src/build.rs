use crate::config::BuildTarget;
use crate::error::HarnessError;
use crate::invoke::spawn_error;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::SystemTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    UpToDate,
    Rebuilt,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::UpToDate => "up_to_date",
            BuildStatus::Rebuilt => "rebuilt",
        }
    }
}

/// True when the executable is missing or strictly older than its source.
pub fn needs_rebuild(target: &BuildTarget) -> Result<bool, HarnessError> {
    let source_mtime = match modified(&target.source)? {
        Some(t) => t,
        None => {
            return Err(HarnessError::SourceMissing {
                path: target.source.clone(),
            })
        }
    };
    Ok(match modified(&target.executable)? {
        Some(exe_mtime) => source_mtime > exe_mtime,
        None => true,
    })
}

pub fn ensure_built(target: &BuildTarget) -> Result<BuildStatus, HarnessError> {
    if !needs_rebuild(target)? {
        debug!(executable = %target.executable.display(), "executable is up to date");
        return Ok(BuildStatus::UpToDate);
    }
    info!(
        source = %target.source.display(),
        compiler = %target.compiler,
        "compiling"
    );
    let output = Command::new(&target.compiler)
        .arg(&target.source)
        .arg("-o")
        .arg(&target.executable)
        .args(&target.flags)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(&target.compiler, e))?;
    if !output.status.success() {
        return Err(HarnessError::Compilation {
            source_path: target.source.clone(),
            code: output.status.code(),
            diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let compiler_stdout = String::from_utf8_lossy(&output.stdout);
    if !compiler_stdout.trim().is_empty() {
        debug!("compiler output:\n{}", compiler_stdout.trim_end());
    }
    if modified(&target.executable)?.is_none() {
        return Err(HarnessError::Compilation {
            source_path: target.source.clone(),
            code: output.status.code(),
            diagnostics: format!(
                "compiler exited successfully but {} was not produced",
                target.executable.display()
            ),
        });
    }
    info!(executable = %target.executable.display(), "compilation successful");
    Ok(BuildStatus::Rebuilt)
}

fn modified(path: &Path) -> Result<Option<SystemTime>, HarnessError> {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| HarnessError::io(format!("no mtime for {}", path.display()), e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HarnessError::io(
            format!("failed to stat {}", path.display()),
            e,
        )),
    }
}
