//! Per-test coverage isolation.
//!
//! Every probe in the instrumented crate writes to one shared temporary file.
//! Around each test the session clears that file, lets the test run, then
//! renames it to the test's own coverage file:
//!
//! ```text
//! begin_test()  -> rm  <dir>/current.coverage.tmp
//! <run test>    -> probes append to current.coverage.tmp
//! promote(id)   -> mv  current.coverage.tmp  <dir>/<id>.coverage
//! ```

use crate::result::{FaultlineError, FaultlineResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default name of the shared temporary coverage file
pub const DEFAULT_TEMP_FILE: &str = "current.coverage.tmp";

/// Extension of promoted per-test coverage files
pub const COVERAGE_EXTENSION: &str = "coverage";

/// Coverage file name for a test id: `ops::tests::adds` -> `ops.tests.adds.coverage`
#[must_use]
pub fn coverage_file_name(test_id: &str) -> String {
    let stem: String = test_id
        .replace("::", ".")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    format!("{stem}.{COVERAGE_EXTENSION}")
}

/// Coverage directory plus the shared temp file inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSession {
    dir: PathBuf,
    temp_file: PathBuf,
}

impl CoverageSession {
    /// Session writing under `dir` with the default temp file name
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_temp_name(dir, DEFAULT_TEMP_FILE)
    }

    /// Session with a custom temp file name
    #[must_use]
    pub fn with_temp_name(dir: impl Into<PathBuf>, temp_name: &str) -> Self {
        let dir = dir.into();
        let temp_file = dir.join(temp_name);
        Self { dir, temp_file }
    }

    /// Coverage directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path every probe writes to
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_file
    }

    /// The temp path as it appears in probe statements
    #[must_use]
    pub fn probe_target(&self) -> String {
        self.temp_file.to_string_lossy().to_string()
    }

    /// Permanent coverage file of a test
    #[must_use]
    pub fn coverage_path(&self, test_id: &str) -> PathBuf {
        self.dir.join(coverage_file_name(test_id))
    }

    /// Create the coverage directory
    pub fn prepare(&self) -> FaultlineResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| FaultlineError::io(&self.dir, e))
    }

    /// Clear the temp file before a test runs
    pub fn begin_test(&self) -> FaultlineResult<()> {
        remove_if_present(&self.temp_file)
    }

    /// Move the temp file to the test's coverage file.
    ///
    /// Any stale coverage file of the test is removed first. Returns `None`
    /// when the test fired no probe at all.
    pub fn promote(&self, test_id: &str) -> FaultlineResult<Option<PathBuf>> {
        let target = self.coverage_path(test_id);
        remove_if_present(&target)?;
        match fs::rename(&self.temp_file, &target) {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FaultlineError::io(&target, e)),
        }
    }
}

fn remove_if_present(path: &Path) -> FaultlineResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FaultlineError::io(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_coverage_file_name() {
        assert_eq!(coverage_file_name("ops::tests::adds"), "ops.tests.adds.coverage");
        assert_eq!(coverage_file_name("arith::a b"), "arith.a_b.coverage");
        assert_eq!(coverage_file_name("x/y"), "x_y.coverage");
    }

    #[test]
    fn test_promote_moves_temp_file() {
        let dir = TempDir::new().unwrap();
        let session = CoverageSession::new(dir.path().join("cov"));
        session.prepare().unwrap();

        session.begin_test().unwrap();
        fs::write(session.temp_path(), "p1\np2\n").unwrap();
        let promoted = session.promote("tests::adds").unwrap().unwrap();

        assert_eq!(promoted, session.coverage_path("tests::adds"));
        assert_eq!(fs::read_to_string(&promoted).unwrap(), "p1\np2\n");
        assert!(!session.temp_path().exists());
    }

    #[test]
    fn test_begin_test_clears_leftovers() {
        let dir = TempDir::new().unwrap();
        let session = CoverageSession::new(dir.path());
        fs::write(session.temp_path(), "stale\n").unwrap();

        session.begin_test().unwrap();

        assert!(!session.temp_path().exists());
        session.begin_test().unwrap();
    }

    #[test]
    fn test_promote_without_firings_removes_stale_file() {
        let dir = TempDir::new().unwrap();
        let session = CoverageSession::new(dir.path());
        let stale = session.coverage_path("t");
        fs::write(&stale, "old\n").unwrap();

        session.begin_test().unwrap();
        assert!(session.promote("t").unwrap().is_none());
        assert!(!stale.exists());
    }

    #[test]
    fn test_tests_do_not_bleed_into_each_other() {
        let dir = TempDir::new().unwrap();
        let session = CoverageSession::new(dir.path());

        session.begin_test().unwrap();
        fs::write(session.temp_path(), "a\n").unwrap();
        session.promote("first").unwrap();

        session.begin_test().unwrap();
        fs::write(session.temp_path(), "b\n").unwrap();
        session.promote("second").unwrap();

        let first = fs::read_to_string(session.coverage_path("first")).unwrap();
        let second = fs::read_to_string(session.coverage_path("second")).unwrap();
        assert_eq!(first, "a\n");
        assert_eq!(second, "b\n");
    }

    #[test]
    fn test_custom_temp_name() {
        let session = CoverageSession::with_temp_name("/work", "run.coverage.tmp");
        assert!(session.probe_target().ends_with("run.coverage.tmp"));
    }
}
