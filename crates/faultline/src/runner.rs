//! External test execution.
//!
//! Each test runs in its own `cargo test` process so its probe firings land
//! in the session's temp file alone. Tests are compiled once up front, then
//! each process is driven on a current-thread tokio runtime. A process that
//! outlives the timeout is killed together with the test binary it started.

use crate::discovery::{TestCase, TestTarget};
use crate::result::{FaultlineError, FaultlineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of running one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test id
    pub test_id: String,
    /// Whether the test passed
    pub passed: bool,
    /// Process exit code, if it exited on its own
    pub exit_code: Option<i32>,
    /// Killed after the timeout
    pub timed_out: bool,
    /// Wall time
    pub duration: Duration,
    /// Captured stdout and stderr
    pub output: String,
}

impl TestOutcome {
    /// Create a passing outcome
    #[must_use]
    pub fn pass(test_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            test_id: test_id.into(),
            passed: true,
            exit_code: Some(0),
            timed_out: false,
            duration,
            output: String::new(),
        }
    }

    /// Create a failing outcome
    #[must_use]
    pub fn fail(test_id: impl Into<String>, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            test_id: test_id.into(),
            passed: false,
            exit_code,
            timed_out: false,
            duration,
            output: String::new(),
        }
    }

    /// Create a timed-out outcome, which counts as failed
    #[must_use]
    pub fn timeout(test_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::fail(test_id, None, duration)
        }
    }

    /// Attach captured output
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Outcomes of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestOutcomes {
    /// Individual outcomes, in execution order
    pub outcomes: Vec<TestOutcome>,
    /// Total duration
    pub duration: Duration,
}

impl TestOutcomes {
    /// Create new empty outcomes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome
    pub fn add(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    /// Number of passed tests
    #[must_use]
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    /// Number of failed tests, timeouts included
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed).count()
    }

    /// Number of timed-out tests
    #[must_use]
    pub fn timed_out(&self) -> usize {
        self.outcomes.iter().filter(|o| o.timed_out).count()
    }

    /// Total number of tests
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether every test passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// Failed outcomes
    #[must_use]
    pub fn failures(&self) -> Vec<&TestOutcome> {
        self.outcomes.iter().filter(|o| !o.passed).collect()
    }

    /// Outcome vector for ranking: test id -> passed
    #[must_use]
    pub fn verdicts(&self) -> BTreeMap<String, bool> {
        self.outcomes
            .iter()
            .map(|o| (o.test_id.clone(), o.passed))
            .collect()
    }
}

/// Header of the recorded outcomes file
const OUTCOMES_HEADER: &str = "test,passed";

/// Record `test,passed` rows so a later `rank` can reuse them
pub fn write_outcomes(path: &Path, verdicts: &BTreeMap<String, bool>) -> FaultlineResult<()> {
    let mut text = String::from(OUTCOMES_HEADER);
    text.push('\n');
    for (test, passed) in verdicts {
        let _ = writeln!(text, "{test},{passed}");
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FaultlineError::io(parent, e))?;
    }
    crate::syntax::write_atomic(path, &text)
}

/// Read an outcomes file written by [`write_outcomes`]; malformed rows are skipped
pub fn read_outcomes(path: &Path) -> FaultlineResult<BTreeMap<String, bool>> {
    let text = fs::read_to_string(path).map_err(|e| FaultlineError::io(path, e))?;
    let mut verdicts = BTreeMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line == OUTCOMES_HEADER {
            continue;
        }
        let Some((test, passed)) = line.rsplit_once(',') else {
            warn!(line, "skipping malformed outcome row");
            continue;
        };
        match passed.trim().parse::<bool>() {
            Ok(passed) => {
                verdicts.insert(test.trim().to_string(), passed);
            }
            Err(_) => warn!(line, "skipping malformed outcome row"),
        }
    }
    Ok(verdicts)
}

/// Runs a single test in isolation
pub trait TestExecutor {
    /// Get ready to run tests, typically by building them once. Called after
    /// instrumentation and before the first [`execute`](Self::execute).
    fn prepare(&self) -> FaultlineResult<()> {
        Ok(())
    }

    /// Run `test` to completion; spawn failures and timeouts are failed outcomes
    fn execute(&self, test: &TestCase) -> TestOutcome;
}

/// Runs tests through `cargo test --exact`
#[derive(Debug, Clone)]
pub struct CargoTestExecutor {
    manifest_path: PathBuf,
    timeout: Duration,
    extra_args: Vec<String>,
    cargo: String,
}

impl CargoTestExecutor {
    /// Executor for the package at `manifest_path`
    #[must_use]
    pub fn new(manifest_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            timeout,
            extra_args: Vec::new(),
            cargo: std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()),
        }
    }

    /// Extra arguments placed before `--` (features, profile, ...)
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Cargo program to invoke instead of `$CARGO`
    #[must_use]
    pub fn with_cargo(mut self, cargo: impl Into<String>) -> Self {
        self.cargo = cargo.into();
        self
    }

    /// Per-test timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "test".to_string(),
            "--manifest-path".to_string(),
            self.manifest_path.to_string_lossy().to_string(),
        ]
    }

    /// Arguments that compile every test target without running it
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(self.extra_args.iter().cloned());
        args.push("--no-run".to_string());
        args
    }

    /// Arguments passed to cargo for `test`
    #[must_use]
    pub fn command_args(&self, test: &TestCase) -> Vec<String> {
        let mut args = self.base_args();
        match &test.target {
            TestTarget::Unit => {}
            TestTarget::Integration(bin) => {
                args.push("--test".to_string());
                args.push(bin.clone());
            }
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("--".to_string());
        args.push("--exact".to_string());
        args.push(test.name.clone());
        args
    }

    /// Compile the tests once, with no timeout, so the per-test timeout
    /// only covers running them
    pub fn build(&self) -> FaultlineResult<()> {
        let args = self.build_args();
        info!(manifest = %self.manifest_path.display(), "building tests");
        let output = std::process::Command::new(&self.cargo)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| FaultlineError::Spawn {
                command: format!("{} {}", self.cargo, args.join(" ")),
                message: e.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(FaultlineError::Build {
            message: format!(
                "{} exited with {}\n{}",
                self.cargo,
                output.status,
                stderr.trim_end()
            ),
        })
    }

    async fn run_process(&self, test: &TestCase) -> FaultlineResult<TestOutcome> {
        let id = test.id();
        let args = self.command_args(test);
        let start = Instant::now();
        let mut command = std::process::Command::new(&self.cargo);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // the test binary cargo spawns joins this group and dies with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = tokio::process::Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FaultlineError::Spawn {
                command: format!("{} {}", self.cargo, args.join(" ")),
                message: e.to_string(),
            })?;
        let pid = child.id();

        let Ok(output) = tokio::time::timeout(self.timeout, child.wait_with_output()).await else {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            return Err(FaultlineError::ProcessTimeout {
                test: id,
                secs: self.timeout.as_secs(),
            });
        };
        let output = output.map_err(|e| FaultlineError::Spawn {
            command: self.cargo.clone(),
            message: e.to_string(),
        })?;
        let duration = start.elapsed();
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        debug!(test = %id, status = %output.status, "{text}");
        let outcome = if output.status.success() {
            TestOutcome::pass(id, duration)
        } else {
            TestOutcome::fail(id, output.status.code(), duration)
        };
        Ok(outcome.with_output(text))
    }
}

/// Kill every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(pid, "killed test process group"),
        Ok(status) => warn!(pid, %status, "could not kill test process group"),
        Err(e) => warn!(pid, error = %e, "could not run kill"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    debug!(pid, "process groups unsupported, killing cargo only");
}

impl TestExecutor for CargoTestExecutor {
    fn prepare(&self) -> FaultlineResult<()> {
        self.build()
    }

    fn execute(&self, test: &TestCase) -> TestOutcome {
        let start = Instant::now();
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "cannot start runtime");
                return TestOutcome::fail(test.id(), None, start.elapsed())
                    .with_output(e.to_string());
            }
        };
        match runtime.block_on(self.run_process(test)) {
            Ok(outcome) => outcome,
            Err(e @ FaultlineError::ProcessTimeout { .. }) => {
                warn!("{e}");
                TestOutcome::timeout(test.id(), start.elapsed()).with_output(e.to_string())
            }
            Err(e) => {
                warn!("{e}");
                TestOutcome::fail(test.id(), None, start.elapsed()).with_output(e.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    mod outcome_tests {
        use super::*;

        #[test]
        fn test_pass_and_fail() {
            let pass = TestOutcome::pass("a", Duration::from_millis(5));
            assert!(pass.passed);
            assert_eq!(pass.exit_code, Some(0));

            let fail = TestOutcome::fail("b", Some(101), Duration::ZERO).with_output("panicked");
            assert!(!fail.passed);
            assert_eq!(fail.exit_code, Some(101));
            assert_eq!(fail.output, "panicked");
        }

        #[test]
        fn test_timeout_counts_as_failure() {
            let t = TestOutcome::timeout("slow", Duration::from_secs(30));
            assert!(!t.passed);
            assert!(t.timed_out);
            assert_eq!(t.exit_code, None);
        }

        #[test]
        fn test_aggregate() {
            let mut all = TestOutcomes::new();
            all.add(TestOutcome::pass("a", Duration::ZERO));
            all.add(TestOutcome::fail("b", Some(101), Duration::ZERO));
            all.add(TestOutcome::timeout("c", Duration::ZERO));

            assert_eq!(all.total(), 3);
            assert_eq!(all.passed(), 1);
            assert_eq!(all.failed(), 2);
            assert_eq!(all.timed_out(), 1);
            assert!(!all.all_passed());
            assert_eq!(all.failures().len(), 2);
            assert_eq!(all.verdicts().get("a"), Some(&true));
            assert_eq!(all.verdicts().get("c"), Some(&false));
        }
    }

    mod command_tests {
        use super::*;

        #[test]
        fn test_unit_test_command() {
            let exec = CargoTestExecutor::new("/p/Cargo.toml", Duration::from_secs(1));
            let test = TestCase::new("ops::tests::adds", TestTarget::Unit, "src/ops.rs");

            let args = exec.command_args(&test);

            assert_eq!(
                args,
                vec![
                    "test",
                    "--manifest-path",
                    "/p/Cargo.toml",
                    "--",
                    "--exact",
                    "ops::tests::adds"
                ]
            );
        }

        #[test]
        fn test_integration_test_command() {
            let exec = CargoTestExecutor::new("Cargo.toml", Duration::from_secs(1))
                .with_extra_args(vec!["--release".to_string()]);
            let test = TestCase::new(
                "divides",
                TestTarget::Integration("calc".to_string()),
                "tests/calc.rs",
            );

            let args = exec.command_args(&test);

            assert_eq!(
                args,
                vec![
                    "test",
                    "--manifest-path",
                    "Cargo.toml",
                    "--test",
                    "calc",
                    "--release",
                    "--",
                    "--exact",
                    "divides"
                ]
            );
        }
    }

    mod process_tests {
        use super::*;

        fn unit(name: &str) -> TestCase {
            TestCase::new(name, TestTarget::Unit, "src/lib.rs")
        }

        #[test]
        fn test_build_args() {
            let exec = CargoTestExecutor::new("/p/Cargo.toml", Duration::from_secs(1))
                .with_extra_args(vec!["--features".to_string(), "slow".to_string()]);

            assert_eq!(
                exec.build_args(),
                vec![
                    "test",
                    "--manifest-path",
                    "/p/Cargo.toml",
                    "--features",
                    "slow",
                    "--no-run"
                ]
            );
        }

        #[test]
        fn test_missing_cargo_is_failed_outcome() {
            let exec = CargoTestExecutor::new("Cargo.toml", Duration::from_secs(5))
                .with_cargo("/nonexistent/faultline/cargo");

            let outcome = exec.execute(&unit("t::a"));

            assert!(!outcome.passed);
            assert!(!outcome.timed_out);
            assert!(outcome.output.contains("Failed to spawn"));
            assert!(exec.prepare().is_err());
        }

        #[cfg(unix)]
        mod fake_cargo {
            use super::*;
            use std::os::unix::fs::PermissionsExt;
            use std::thread;

            fn executor(
                dir: &Path,
                name: &str,
                body: &str,
                timeout: Duration,
            ) -> CargoTestExecutor {
                let script = dir.join(name);
                fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
                CargoTestExecutor::new(dir.join("Cargo.toml"), timeout)
                    .with_cargo(script.to_string_lossy().to_string())
            }

            #[test]
            fn test_exit_status_decides_verdict() {
                let dir = TempDir::new().unwrap();
                let ok = executor(dir.path(), "ok", "echo \"ran $*\"", Duration::from_secs(10));
                let bad = executor(dir.path(), "bad", "exit 101", Duration::from_secs(10));

                let pass = ok.execute(&unit("t::adds"));
                let fail = bad.execute(&unit("t::subs"));

                assert!(pass.passed);
                assert!(pass.output.contains("--exact t::adds"));
                assert!(!fail.passed);
                assert_eq!(fail.exit_code, Some(101));
                assert!(!fail.timed_out);
            }

            #[test]
            fn test_timeout_kills_spawned_test_process() {
                let dir = TempDir::new().unwrap();
                let late = dir.path().join("current.coverage.tmp");
                // stands in for the test binary cargo starts
                let body = format!(
                    "sh -c 'sleep 2; echo late >> \"{}\"' &\nwait",
                    late.display()
                );
                let exec = executor(dir.path(), "slow", &body, Duration::from_millis(500));

                let outcome = exec.execute(&unit("t::hangs"));

                assert!(outcome.timed_out);
                assert!(!outcome.passed);
                assert!(outcome.output.contains("timed out"));
                thread::sleep(Duration::from_secs(3));
                assert!(!late.exists());
            }

            #[test]
            fn test_prepare_compiles_without_running() {
                let dir = TempDir::new().unwrap();
                let args = dir.path().join("args.txt");
                let body = format!("echo \"$@\" > \"{}\"", args.display());
                let exec = executor(dir.path(), "build", &body, Duration::from_millis(1));

                exec.prepare().unwrap();

                let args = fs::read_to_string(args).unwrap();
                assert!(args.starts_with("test --manifest-path"));
                assert!(args.trim_end().ends_with("--no-run"));
            }

            #[test]
            fn test_failed_build_is_fatal() {
                let dir = TempDir::new().unwrap();
                let body = "echo 'error[E0425]: cannot find value' >&2\nexit 101";
                let exec = executor(dir.path(), "broken", body, Duration::from_secs(1));

                let err = exec.prepare().unwrap_err();

                assert!(matches!(err, FaultlineError::Build { .. }));
                assert!(err.is_fatal());
                assert!(err.to_string().contains("E0425"));
            }
        }
    }

    mod outcomes_file_tests {
        use super::*;

        #[test]
        fn test_write_then_read() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("nested/outcomes.csv");
            let mut verdicts = BTreeMap::new();
            verdicts.insert("t1".to_string(), false);
            verdicts.insert("calc::t2".to_string(), true);

            write_outcomes(&path, &verdicts).unwrap();

            assert_eq!(read_outcomes(&path).unwrap(), verdicts);
        }

        #[test]
        fn test_malformed_rows_skipped() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("outcomes.csv");
            fs::write(&path, "test,passed\nok,true\nbroken\nodd,maybe\n").unwrap();

            let verdicts = read_outcomes(&path).unwrap();

            assert_eq!(verdicts.len(), 1);
            assert_eq!(verdicts.get("ok"), Some(&true));
        }

        #[test]
        fn test_missing_file_is_error() {
            let dir = TempDir::new().unwrap();
            assert!(read_outcomes(&dir.path().join("none.csv")).is_err());
        }
    }
}
