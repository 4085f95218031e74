use crate::error::ValidationError;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BOUNDARY_VALUES: [f64; 4] = [50.0, 50.0, 50.0, 50.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub source: PathBuf,
    pub executable: PathBuf,
    pub compiler: String,
    #[serde(default, deserialize_with = "flags_from_words_or_list")]
    pub flags: Vec<String>,
}

impl BuildTarget {
    fn resolve_against(&mut self, dir: &Path) {
        self.source = resolve_path(dir, &self.source);
        self.executable = resolve_path(dir, &self.executable);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub distributed: BuildTarget,
    #[serde(default)]
    pub serial: Option<BuildTarget>,
    #[serde(default)]
    pub comparator: Option<BuildTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launcher {
    pub program: String,
    #[serde(default = "default_worker_flag")]
    pub worker_flag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First failed repetition fails the whole cell.
    #[default]
    Strict,
    /// Failed repetitions are dropped from the mean.
    BestEffort,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::Strict => "strict",
            FailurePolicy::BestEffort => "best_effort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSection {
    pub problem_sizes: Vec<u32>,
    pub iteration_counts: Vec<u32>,
    pub worker_counts: Vec<u32>,
    #[serde(default = "default_boundary_values")]
    pub boundary_values: [f64; 4],
    #[serde(default = "default_samples")]
    pub samples: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_true")]
    pub pass_boundaries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
    #[serde(default = "default_serial_output")]
    pub serial_output: PathBuf,
    #[serde(default = "default_distributed_output")]
    pub distributed_output: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            results: default_results_path(),
            serial_output: default_serial_output(),
            distributed_output: default_distributed_output(),
        }
    }
}

impl OutputSection {
    pub fn results_to_stdout(&self) -> bool {
        self.results.as_os_str() == "-"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub targets: Targets,
    #[serde(default)]
    pub launcher: Option<Launcher>,
    pub sweep: SweepSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(skip)]
    project_dir: PathBuf,
}

impl ExperimentConfig {
    /// Reads an experiment file and resolves its relative paths against the
    /// directory that contains it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read experiment {}", path.display()))?;
        let project_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from("."));
        let config = Self::from_yaml_str(&raw, &project_dir)
            .with_context(|| format!("invalid experiment {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str, project_dir: &Path) -> Result<Self> {
        let mut config: ExperimentConfig = serde_yaml::from_str(raw)?;
        config.project_dir = project_dir.to_path_buf();
        config.targets.distributed.resolve_against(project_dir);
        if let Some(serial) = config.targets.serial.as_mut() {
            serial.resolve_against(project_dir);
        }
        if let Some(comparator) = config.targets.comparator.as_mut() {
            comparator.resolve_against(project_dir);
        }
        if !config.output.results_to_stdout() {
            config.output.results = resolve_path(project_dir, &config.output.results);
        }
        config.output.serial_output = resolve_path(project_dir, &config.output.serial_output);
        config.output.distributed_output =
            resolve_path(project_dir, &config.output.distributed_output);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let sweep = &self.sweep;
        validate_dimension("sweep.problem_sizes", &sweep.problem_sizes)?;
        validate_dimension("sweep.iteration_counts", &sweep.iteration_counts)?;
        validate_dimension("sweep.worker_counts", &sweep.worker_counts)?;
        validate_boundaries("sweep.boundary_values", &sweep.boundary_values)?;
        if sweep.samples == 0 {
            return Err(ValidationError::new("sweep.samples", "must be positive"));
        }
        if self.timeout_seconds == Some(0) {
            return Err(ValidationError::new("timeout_seconds", "must be positive"));
        }
        if let Some(launcher) = &self.launcher {
            if launcher.program.trim().is_empty() {
                return Err(ValidationError::new("launcher.program", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn digest(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or_default();
        canonical_json_digest(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunParameters {
    problem_size: u32,
    iteration_count: u32,
    worker_count: u32,
    boundary_values: [f64; 4],
}

impl RunParameters {
    pub fn new(
        problem_size: u32,
        iteration_count: u32,
        worker_count: u32,
        boundary_values: [f64; 4],
    ) -> Result<Self, ValidationError> {
        validate_positive("problem_size", problem_size)?;
        validate_positive("iteration_count", iteration_count)?;
        validate_positive("worker_count", worker_count)?;
        validate_boundaries("boundary_values", &boundary_values)?;
        Ok(Self::from_validated(
            problem_size,
            iteration_count,
            worker_count,
            boundary_values,
        ))
    }

    pub(crate) fn from_validated(
        problem_size: u32,
        iteration_count: u32,
        worker_count: u32,
        boundary_values: [f64; 4],
    ) -> Self {
        Self {
            problem_size,
            iteration_count,
            worker_count,
            boundary_values,
        }
    }

    pub fn problem_size(&self) -> u32 {
        self.problem_size
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    pub fn boundary_values(&self) -> [f64; 4] {
        self.boundary_values
    }
}

pub(crate) fn validate_positive(field: &str, value: u32) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::new(field, "must be a positive integer"));
    }
    Ok(())
}

pub(crate) fn validate_dimension(field: &str, values: &[u32]) -> Result<(), ValidationError> {
    if values.is_empty() {
        return Err(ValidationError::new(field, "must list at least one value"));
    }
    if values.contains(&0) {
        return Err(ValidationError::new(field, "values must be positive integers"));
    }
    Ok(())
}

pub(crate) fn validate_boundaries(field: &str, values: &[f64; 4]) -> Result<(), ValidationError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::new(field, "values must be finite numbers"));
    }
    Ok(())
}

pub fn canonical_json_digest(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("sha256:{}", hex::encode(Sha256::digest(&bytes)))
}

fn resolve_path(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

fn flags_from_words_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flags {
        Words(String),
        List(Vec<String>),
    }
    Ok(match Flags::deserialize(deserializer)? {
        Flags::Words(words) => words.split_whitespace().map(str::to_string).collect(),
        Flags::List(list) => list,
    })
}

fn default_worker_flag() -> String {
    "-n".to_string()
}

fn default_boundary_values() -> [f64; 4] {
    DEFAULT_BOUNDARY_VALUES
}

fn default_samples() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_results_path() -> PathBuf {
    PathBuf::from("benchmark_results.csv")
}

fn default_serial_output() -> PathBuf {
    PathBuf::from("output_serial.txt")
}

fn default_distributed_output() -> PathBuf {
    PathBuf::from("output_mpi.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPERIMENT: &str = r#"
targets:
  distributed:
    source: 2D_HeatEquation_MPI.cpp
    executable: heat_equation_2d_mpi
    compiler: mpic++
    flags: "-O3 -Wall -std=c++17"
  serial:
    source: 2d_heat_eq.cpp
    executable: /opt/heat/2d_heat_eq.exe
    compiler: g++
    flags: ["-O3"]
launcher:
  program: mpiexec
sweep:
  problem_sizes: [100, 200, 400]
  iteration_counts: [500, 1000]
  worker_counts: [1, 2, 4, 8]
  failure_policy: best_effort
"#;

    #[test]
    fn loads_experiment_with_defaults_and_resolved_paths() {
        let dir = PathBuf::from("/tmp/heatlab_proj");
        let config = ExperimentConfig::from_yaml_str(EXPERIMENT, &dir).expect("config");
        let mpi = &config.targets.distributed;
        assert_eq!(mpi.source, dir.join("2D_HeatEquation_MPI.cpp"));
        assert_eq!(mpi.flags, vec!["-O3", "-Wall", "-std=c++17"]);
        let serial = config.targets.serial.as_ref().expect("serial target");
        assert_eq!(serial.executable, PathBuf::from("/opt/heat/2d_heat_eq.exe"));
        assert_eq!(serial.flags, vec!["-O3"]);
        assert!(config.targets.comparator.is_none());

        let launcher = config.launcher.as_ref().expect("launcher");
        assert_eq!(launcher.worker_flag, "-n");
        assert_eq!(config.sweep.boundary_values, DEFAULT_BOUNDARY_VALUES);
        assert_eq!(config.sweep.samples, 3);
        assert_eq!(config.sweep.failure_policy, FailurePolicy::BestEffort);
        assert!(config.sweep.pass_boundaries);
        assert_eq!(
            config.output.results,
            dir.join("benchmark_results.csv")
        );
        assert!(config.timeout().is_none());
        assert_eq!(config.project_dir(), dir.as_path());
    }

    #[test]
    fn rejects_zero_and_empty_dimensions() {
        let dir = PathBuf::from("/tmp/heatlab_proj");
        let zero = EXPERIMENT.replace("[1, 2, 4, 8]", "[1, 0]");
        let err = ExperimentConfig::from_yaml_str(&zero, &dir).expect_err("zero workers");
        assert!(
            err.to_string().contains("sweep.worker_counts"),
            "unexpected error: {}",
            err
        );

        let empty = EXPERIMENT.replace("[500, 1000]", "[]");
        let err = ExperimentConfig::from_yaml_str(&empty, &dir).expect_err("empty iterations");
        assert!(err.to_string().contains("sweep.iteration_counts"));

        let no_samples = format!("{}  samples: 0\n", EXPERIMENT);
        let err = ExperimentConfig::from_yaml_str(&no_samples, &dir).expect_err("zero samples");
        assert!(err.to_string().contains("sweep.samples"));
    }

    #[test]
    fn stdout_results_path_is_not_resolved() {
        let dir = PathBuf::from("/tmp/heatlab_proj");
        let raw = format!("{}output:\n  results: \"-\"\n", EXPERIMENT);
        let config = ExperimentConfig::from_yaml_str(&raw, &dir).expect("config");
        assert!(config.output.results_to_stdout());
        assert_eq!(config.output.serial_output, dir.join("output_serial.txt"));
    }

    #[test]
    fn sample_experiment_describes_the_full_grid() {
        let raw = include_str!("../../../demos/heat.yaml");
        let dir = PathBuf::from("/srv/heat");
        let config = ExperimentConfig::from_yaml_str(raw, &dir).expect("sample experiment");
        let comparator = config.targets.comparator.as_ref().expect("comparator");
        assert_eq!(comparator.executable, dir.join("compare_outputs.exe"));
        let sweep = &config.sweep;
        let cells =
            sweep.problem_sizes.len() * sweep.iteration_counts.len() * sweep.worker_counts.len();
        assert_eq!(cells, 24);
        assert_eq!(config.sweep.failure_policy, FailurePolicy::Strict);
    }

    #[test]
    fn run_parameters_require_positive_counts() {
        assert!(RunParameters::new(100, 500, 4, DEFAULT_BOUNDARY_VALUES).is_ok());
        let err = RunParameters::new(100, 0, 4, DEFAULT_BOUNDARY_VALUES).expect_err("zero");
        assert_eq!(err.field, "iteration_count");
        let err = RunParameters::new(100, 5, 4, [0.0, f64::NAN, 0.0, 0.0]).expect_err("nan");
        assert_eq!(err.field, "boundary_values");
    }

    #[test]
    fn digest_changes_with_configuration() {
        let dir = PathBuf::from("/tmp/heatlab_proj");
        let a = ExperimentConfig::from_yaml_str(EXPERIMENT, &dir).expect("config");
        let b = ExperimentConfig::from_yaml_str(&EXPERIMENT.replace("400", "800"), &dir)
            .expect("config");
        assert!(a.digest().starts_with("sha256:"));
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
    }
}
