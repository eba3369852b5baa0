//! Run configuration.
//!
//! Loaded from `faultline.yaml` in the target project when present; every
//! field has a default, so an empty file (or none) is a valid configuration.
//!
//! ```yaml
//! source_dirs: [src]
//! tests_dir: tests
//! excludes: ["generated/*"]
//! test_markers: [test, tokio::test, rstest]
//! timeout_secs: 60
//! report_format: markdown
//! top: 20
//! ```

use crate::discovery::DEFAULT_TEST_MARKERS;
use crate::mapping::DEFAULT_MAPPING_FILE;
use crate::rank::ReportFormat;
use crate::result::{FaultlineError, FaultlineResult};
use crate::session::DEFAULT_TEMP_FILE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file looked up in the project directory
pub const CONFIG_FILE_NAME: &str = "faultline.yaml";

/// Everything a localization run needs to know
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    /// Root of the target Cargo package
    pub project_dir: PathBuf,
    /// Production source directories, relative to the project
    pub source_dirs: Vec<PathBuf>,
    /// Integration test directory, relative to the project
    pub tests_dir: PathBuf,
    /// Glob patterns of files never instrumented or scanned
    pub excludes: Vec<String>,
    /// Attribute paths that mark a test function
    pub test_markers: Vec<String>,
    /// Only run tests whose id contains one of these
    pub test_filters: Vec<String>,
    /// Working directory for coverage, mappings and reports, relative to
    /// the project
    pub work_dir: PathBuf,
    /// Shared temporary coverage file name
    pub temp_file_name: String,
    /// Mapping table file name inside the work directory
    pub mapping_file: String,
    /// Per-test timeout in seconds
    pub timeout_secs: u64,
    /// Report format
    pub report_format: ReportFormat,
    /// Report path; defaults to `<work_dir>/suspiciousness.<ext>`
    pub report_path: Option<PathBuf>,
    /// Keep only the N most suspicious probes
    pub top: Option<usize>,
    /// Also instrument `#[cfg(test)]` modules
    pub include_test_modules: bool,
    /// Strip probes and clear artifacts before instrumenting
    pub reset_before_run: bool,
    /// Path of the `faultline-probe` crate to add as a dependency
    pub probe_crate_path: Option<PathBuf>,
    /// Extra arguments passed to `cargo test` before `--`
    pub cargo_args: Vec<String>,
}

impl Default for FaultlineConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            source_dirs: vec![PathBuf::from("src")],
            tests_dir: PathBuf::from("tests"),
            excludes: Vec::new(),
            test_markers: DEFAULT_TEST_MARKERS.iter().map(ToString::to_string).collect(),
            test_filters: Vec::new(),
            work_dir: PathBuf::from("target/faultline"),
            temp_file_name: DEFAULT_TEMP_FILE.to_string(),
            mapping_file: DEFAULT_MAPPING_FILE.to_string(),
            timeout_secs: 30,
            report_format: ReportFormat::Csv,
            report_path: None,
            top: None,
            include_test_modules: false,
            reset_before_run: false,
            probe_crate_path: None,
            cargo_args: Vec::new(),
        }
    }
}

impl FaultlineConfig {
    /// Default configuration for `project_dir`
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    /// Parse YAML configuration text
    pub fn from_yaml(text: &str) -> FaultlineResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml_ng::from_str(text)
            .map_err(|e| FaultlineError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> FaultlineResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| FaultlineError::io(path, e))?;
        Self::from_yaml(&text)
    }

    /// Load `<project>/faultline.yaml` if it exists, else defaults; the
    /// project directory is always `project_dir`
    pub fn discover(project_dir: &Path) -> FaultlineResult<Self> {
        let path = project_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            tracing::debug!(path = %path.display(), "loading configuration");
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.project_dir = project_dir.to_path_buf();
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> FaultlineResult<()> {
        if self.timeout_secs == 0 {
            return Err(FaultlineError::config("timeout_secs must be positive"));
        }
        if self.top == Some(0) {
            return Err(FaultlineError::config(
                "top must be positive; leave it out to report every probe",
            ));
        }
        if self.test_markers.is_empty() {
            return Err(FaultlineError::config("test_markers must not be empty"));
        }
        if self.source_dirs.is_empty() {
            return Err(FaultlineError::config("source_dirs must not be empty"));
        }
        if self.temp_file_name.trim().is_empty() {
            return Err(FaultlineError::config("temp_file_name must not be empty"));
        }
        Ok(())
    }

    /// Set the per-test timeout
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the report format
    #[must_use]
    pub const fn with_report_format(mut self, format: ReportFormat) -> Self {
        self.report_format = format;
        self
    }

    /// Set the report path
    #[must_use]
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Keep only the N most suspicious probes
    #[must_use]
    pub const fn with_top(mut self, top: Option<usize>) -> Self {
        self.top = top;
        self
    }

    /// Restrict the tests that run
    #[must_use]
    pub fn with_test_filters(mut self, filters: Vec<String>) -> Self {
        self.test_filters = filters;
        self
    }

    /// Strip and clear before instrumenting
    #[must_use]
    pub const fn with_reset(mut self, reset: bool) -> Self {
        self.reset_before_run = reset;
        self
    }

    /// Also instrument `#[cfg(test)]` modules
    #[must_use]
    pub const fn with_test_modules(mut self, include: bool) -> Self {
        self.include_test_modules = include;
        self
    }

    /// Per-test timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `Cargo.toml` of the target
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir.join("Cargo.toml")
    }

    /// Absolute-or-project-relative work directory
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.project_dir.join(&self.work_dir)
    }

    /// Directory holding per-test coverage files
    #[must_use]
    pub fn coverage_dir(&self) -> PathBuf {
        self.work_dir().join("coverage")
    }

    /// Mapping table path
    #[must_use]
    pub fn mapping_path(&self) -> PathBuf {
        self.work_dir().join(&self.mapping_file)
    }

    /// Recorded test outcomes, used to re-rank without running tests
    #[must_use]
    pub fn outcomes_path(&self) -> PathBuf {
        self.work_dir().join("outcomes.csv")
    }

    /// Where the report goes
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.report_path.clone().unwrap_or_else(|| {
            self.work_dir()
                .join(format!("suspiciousness.{}", self.report_format.extension()))
        })
    }

    /// Source directories joined onto the project
    #[must_use]
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.source_dirs
            .iter()
            .map(|d| self.project_dir.join(d))
            .collect()
    }
}
