use crate::sweep::CellOutcome;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// `results.csv` -> `results.manifest.json`
pub fn manifest_path_for(results: &Path) -> PathBuf {
    results.with_extension("manifest.json")
}

/// Status file for one sweep, rewritten after every cell.
///
/// If the sweep ends without `complete` being called (fatal error, panic),
/// dropping the manifest records it as failed.
pub struct SweepManifest {
    path: PathBuf,
    run_id: String,
    config_digest: String,
    results_path: PathBuf,
    started_at: DateTime<Utc>,
    cells_total: usize,
    cells_completed: usize,
    failed_cells: Vec<Value>,
    done: bool,
}

impl SweepManifest {
    pub fn begin(
        path: &Path,
        results_path: &Path,
        config_digest: &str,
        cells_total: usize,
    ) -> Result<Self> {
        let started_at = Utc::now();
        let manifest = Self {
            path: path.to_path_buf(),
            run_id: format!("sweep_{}", started_at.format("%Y%m%d_%H%M%S")),
            config_digest: config_digest.to_string(),
            results_path: results_path.to_path_buf(),
            started_at,
            cells_total,
            cells_completed: 0,
            failed_cells: Vec::new(),
            done: false,
        };
        manifest.write("running")?;
        Ok(manifest)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, outcome: &CellOutcome) -> Result<()> {
        match &outcome.result {
            Ok(_) => self.cells_completed += 1,
            Err(err) => self.failed_cells.push(json!({
                "problem_size": outcome.params.problem_size(),
                "iteration_count": outcome.params.iteration_count(),
                "worker_count": outcome.params.worker_count(),
                "error": err.to_string(),
            })),
        }
        self.write("running")
    }

    pub fn complete(&mut self) -> Result<()> {
        self.write("completed")?;
        self.done = true;
        Ok(())
    }

    fn write(&self, status: &str) -> Result<()> {
        let payload = json!({
            "schema_version": "sweep_manifest_v1",
            "run_id": self.run_id,
            "status": status,
            "config_digest": self.config_digest,
            "results_path": self.results_path.to_string_lossy(),
            "started_at": self.started_at.to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
            "cells_total": self.cells_total,
            "cells_completed": self.cells_completed,
            "failed_cells": self.failed_cells,
        });
        atomic_write_json_pretty(&self.path, &payload)
    }
}

impl Drop for SweepManifest {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.write("failed");
        }
    }
}
