//! Test x probe coverage matrix.

use crate::result::{FaultlineError, FaultlineResult};
use crate::session::CoverageSession;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Probe ids each test executed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMatrix {
    rows: BTreeMap<String, BTreeSet<String>>,
}

impl CoverageMatrix {
    /// Empty matrix
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probes covered by a test
    pub fn insert<I, S>(&mut self, test: impl Into<String>, probes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows
            .insert(test.into(), probes.into_iter().map(Into::into).collect());
    }

    /// Probes covered by a test
    #[must_use]
    pub fn coverage(&self, test: &str) -> Option<&BTreeSet<String>> {
        self.rows.get(test)
    }

    /// Test ids in the matrix
    pub fn tests(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Every probe covered by at least one test
    #[must_use]
    pub fn probes(&self) -> BTreeSet<&str> {
        self.rows
            .values()
            .flat_map(|set| set.iter().map(String::as_str))
            .collect()
    }

    /// Number of tests
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix has no tests
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Non-fatal problem found while loading coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixWarning {
    /// The test's coverage file does not exist
    MissingFile {
        /// Test id
        test: String,
        /// Expected path
        path: PathBuf,
    },
    /// The test fired no probe
    EmptyCoverage {
        /// Test id
        test: String,
    },
}

impl std::fmt::Display for MatrixWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFile { test, path } => {
                write!(f, "no coverage file for {test} at {}", path.display())
            }
            Self::EmptyCoverage { test } => write!(f, "{test} executed no probe"),
        }
    }
}

/// Matrix plus the warnings raised while building it
#[derive(Debug, Clone, Default)]
pub struct MatrixBuild {
    /// Coverage per test
    pub matrix: CoverageMatrix,
    /// Missing or empty coverage
    pub warnings: Vec<MatrixWarning>,
}

/// Parse coverage file text: one id per line, blank lines ignored,
/// duplicates collapsed case-insensitively (first spelling wins)
#[must_use]
pub fn parse_coverage(text: &str) -> BTreeSet<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Read one coverage file; `Ok(None)` when it does not exist
pub fn read_coverage_file(path: &Path) -> FaultlineResult<Option<BTreeSet<String>>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_coverage(&text))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FaultlineError::io(path, e)),
    }
}

/// Build the matrix from `(test id, coverage file)` pairs.
///
/// Every test gets an entry; a missing, unreadable or empty file yields an
/// empty set plus a warning.
pub fn build_matrix<I, S, P>(tests: I) -> MatrixBuild
where
    I: IntoIterator<Item = (S, P)>,
    S: Into<String>,
    P: AsRef<Path>,
{
    let mut build = MatrixBuild::default();
    for (test, path) in tests {
        let test = test.into();
        let path = path.as_ref();
        let probes = match read_coverage_file(path) {
            Ok(Some(probes)) => probes,
            Ok(None) => {
                build.warnings.push(MatrixWarning::MissingFile {
                    test: test.clone(),
                    path: path.to_path_buf(),
                });
                BTreeSet::new()
            }
            Err(e) => {
                warn!(error = %e, "unreadable coverage file");
                build.warnings.push(MatrixWarning::MissingFile {
                    test: test.clone(),
                    path: path.to_path_buf(),
                });
                BTreeSet::new()
            }
        };
        if probes.is_empty() && path.exists() {
            build
                .warnings
                .push(MatrixWarning::EmptyCoverage { test: test.clone() });
        }
        build.matrix.rows.insert(test, probes);
    }
    for w in &build.warnings {
        warn!("{w}");
    }
    build
}

/// Builds the matrix from the promoted coverage files of a session
#[derive(Debug, Clone, Copy)]
pub struct CoverageMatrixBuilder<'a> {
    session: &'a CoverageSession,
}

impl<'a> CoverageMatrixBuilder<'a> {
    /// Builder reading from `session`'s coverage directory
    #[must_use]
    pub const fn new(session: &'a CoverageSession) -> Self {
        Self { session }
    }

    /// One matrix row per test id
    pub fn build<I, S>(&self, tests: I) -> MatrixBuild
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        build_matrix(tests.into_iter().map(|t| {
            let id = t.as_ref().to_string();
            let path = self.session.coverage_path(&id);
            (id, path)
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_trims_and_dedups_case_insensitively() {
        let set = parse_coverage("  abc \nABC\n\n def\nabc\n");
        assert_eq!(set.len(), 2);
        assert!(set.contains("abc"));
        assert!(set.contains("def"));
    }

    #[test]
    fn test_build_reads_each_test() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.coverage");
        let b = dir.path().join("b.coverage");
        fs::write(&a, "p1\np2\np1\n").unwrap();
        fs::write(&b, "p2\n").unwrap();

        let build = build_matrix([("a", &a), ("b", &b)]);

        assert!(build.warnings.is_empty());
        assert_eq!(build.matrix.coverage("a").unwrap().len(), 2);
        assert_eq!(build.matrix.probes().len(), 2);
    }

    #[test]
    fn test_missing_file_yields_empty_entry_and_warning() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("t3.coverage");

        let build = build_matrix([("t3", &missing)]);

        assert!(build.matrix.coverage("t3").unwrap().is_empty());
        assert_eq!(
            build.warnings,
            vec![MatrixWarning::MissingFile {
                test: "t3".to_string(),
                path: missing,
            }]
        );
    }

    #[test]
    fn test_empty_file_warns() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("e.coverage");
        fs::write(&empty, "\n\n").unwrap();

        let build = build_matrix([("e", &empty)]);

        assert_eq!(
            build.warnings,
            vec![MatrixWarning::EmptyCoverage {
                test: "e".to_string()
            }]
        );
        assert!(build.warnings[0].to_string().contains("no probe"));
    }

    #[test]
    fn test_builder_uses_session_paths() {
        let dir = TempDir::new().unwrap();
        let session = CoverageSession::new(dir.path());
        fs::write(session.coverage_path("ops::tests::adds"), "p1\n").unwrap();

        let build = CoverageMatrixBuilder::new(&session).build(["ops::tests::adds", "gone"]);

        assert_eq!(build.matrix.len(), 2);
        assert!(build.matrix.coverage("ops::tests::adds").unwrap().contains("p1"));
        assert!(matches!(
            build.warnings.as_slice(),
            [MatrixWarning::MissingFile { test, .. }] if test == "gone"
        ));
    }

    #[test]
    fn test_insert_and_iterate() {
        let mut m = CoverageMatrix::new();
        m.insert("t1", ["x", "y"]);
        m.insert("t2", Vec::<String>::new());
        assert_eq!(m.len(), 2);
        assert_eq!(m.tests().collect::<Vec<_>>(), vec!["t1", "t2"]);
        assert!(!m.is_empty());
    }
}
