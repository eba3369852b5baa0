//! Undo instrumentation.
//!
//! Strips probe statements from sources, clears the mapping store and
//! removes coverage artifacts, returning a project to its pre-run state.

use crate::instrument::strip_file;
use crate::mapping::ProbeMappingStore;
use crate::result::FaultlineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a reset removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    /// Files whose probes were removed
    pub files_stripped: usize,
    /// Files left untouched because they could not be read or parsed
    pub files_failed: Vec<PathBuf>,
    /// Mapping entries cleared
    pub mappings_cleared: usize,
    /// Coverage files deleted
    pub coverage_files_removed: usize,
    /// Artifacts that could not be deleted: the mapping file, coverage files
    /// or directories
    pub artifacts_failed: Vec<PathBuf>,
}

impl ResetSummary {
    /// Whether anything was left behind
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.files_failed.is_empty() && self.artifacts_failed.is_empty()
    }
}

/// Whether a file name is a coverage artifact
#[must_use]
pub fn is_coverage_artifact(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".coverage") || lower.ends_with(".coverage.tmp")
}

/// Strip probes from `files`, clear `store` and delete coverage artifacts
/// under `roots`.
///
/// Every failure is logged and listed in the summary; the reset carries on
/// with the remaining files and artifacts. Empty `coverage` directories left
/// behind are removed.
pub fn reset_instrumentation(
    files: &[PathBuf],
    store: &ProbeMappingStore,
    roots: &[PathBuf],
) -> ResetSummary {
    let mut summary = ResetSummary::default();

    for file in files {
        match strip_file(file) {
            Ok(true) => {
                debug!(path = %file.display(), "stripped probes");
                summary.files_stripped += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "failed to strip probes");
                summary.files_failed.push(file.clone());
            }
        }
    }

    summary.mappings_cleared = store.len();
    if let Err(e) = store.clear() {
        warn!(error = %e, "failed to delete mapping file");
        if let Some(path) = store.path() {
            summary.artifacts_failed.push(path.to_path_buf());
        }
    }

    for root in roots {
        remove_artifacts(root, &mut summary);
    }

    info!(
        stripped = summary.files_stripped,
        failed = summary.files_failed.len() + summary.artifacts_failed.len(),
        mappings = summary.mappings_cleared,
        coverage = summary.coverage_files_removed,
        "reset complete"
    );
    summary
}

fn remove_artifacts(dir: &Path, summary: &mut ResetSummary) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            warn!(error = %FaultlineError::io(dir, e), "cannot list coverage artifacts");
            summary.artifacts_failed.push(dir.to_path_buf());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if name.starts_with('.') {
                continue;
            }
            remove_artifacts(&path, summary);
            if name == "coverage" && is_empty_dir(&path) {
                remove(&path, fs::remove_dir(&path), summary);
            }
        } else if is_coverage_artifact(&name) && remove(&path, fs::remove_file(&path), summary) {
            summary.coverage_files_removed += 1;
        }
    }
}

fn remove(path: &Path, result: std::io::Result<()>, summary: &mut ResetSummary) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %FaultlineError::io(path, e), "failed to delete artifact");
            summary.artifacts_failed.push(path.to_path_buf());
            false
        }
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::instrument::{probe_count, Instrumenter};
    use tempfile::TempDir;

    const SOURCE: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    let s = a + b;\n    s\n}\n";

    #[test]
    fn test_artifact_names() {
        assert!(is_coverage_artifact("t.coverage"));
        assert!(is_coverage_artifact("current.coverage.tmp"));
        assert!(is_coverage_artifact("A.COVERAGE"));
        assert!(!is_coverage_artifact("coverage.rs"));
        assert!(!is_coverage_artifact("probe_map.csv"));
    }

    #[test]
    fn test_reset_restores_sources_and_clears_artifacts() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("lib.rs");
        fs::write(&src, SOURCE).unwrap();
        let store = ProbeMappingStore::open(dir.path().join("map.csv")).unwrap();
        Instrumenter::new(&store)
            .instrument_file(&src, Some("cov/current.coverage.tmp"))
            .unwrap();
        assert_eq!(probe_count(&fs::read_to_string(&src).unwrap()).unwrap(), 2);

        let cov = dir.path().join("work/coverage");
        fs::create_dir_all(&cov).unwrap();
        fs::write(cov.join("t1.coverage"), "x\n").unwrap();
        fs::write(cov.join("current.coverage.tmp"), "x\n").unwrap();
        fs::write(dir.path().join("work/keep.txt"), "k").unwrap();

        let summary = reset_instrumentation(&[src.clone()], &store, &[dir.path().join("work")]);

        assert_eq!(fs::read_to_string(&src).unwrap(), SOURCE);
        assert_eq!(summary.files_stripped, 1);
        assert_eq!(summary.mappings_cleared, 2);
        assert_eq!(summary.coverage_files_removed, 2);
        assert!(store.is_empty());
        assert!(!cov.exists());
        assert!(dir.path().join("work/keep.txt").exists());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("lib.rs");
        fs::write(&src, SOURCE).unwrap();
        let store = ProbeMappingStore::in_memory();

        let first = reset_instrumentation(&[src.clone()], &store, &[]);
        let second = reset_instrumentation(&[src.clone()], &store, &[]);

        assert_eq!(first.files_stripped, 0);
        assert_eq!(second, ResetSummary::default());
        assert_eq!(fs::read_to_string(&src).unwrap(), SOURCE);
    }

    #[test]
    fn test_unparsable_file_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.rs");
        fs::write(&bad, "fn broken( {").unwrap();

        let summary = reset_instrumentation(&[bad.clone()], &ProbeMappingStore::in_memory(), &[]);

        assert_eq!(summary.files_failed, vec![bad]);
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_missing_root_is_ignored() {
        let summary = reset_instrumentation(
            &[],
            &ProbeMappingStore::in_memory(),
            &[PathBuf::from("/nonexistent/faultline/root")],
        );
        assert_eq!(summary.coverage_files_removed, 0);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_undeletable_mapping_file_does_not_stop_reset() {
        let dir = TempDir::new().unwrap();
        let map = dir.path().join("probe_map.csv");
        let store = ProbeMappingStore::open(&map).unwrap();
        store.add_mapping("p1", "add", Some("lib.rs")).unwrap();
        // a directory where the mapping file should be cannot be removed as a file
        fs::remove_file(&map).unwrap();
        fs::create_dir_all(map.join("nested")).unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join("t.coverage"), "p1\n").unwrap();

        let summary = reset_instrumentation(&[], &store, &[work.clone()]);

        assert_eq!(summary.artifacts_failed, vec![map]);
        assert_eq!(summary.coverage_files_removed, 1);
        assert!(!work.join("t.coverage").exists());
        assert!(store.is_empty());
    }
}
