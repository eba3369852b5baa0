//! End-to-end localization run.
//!
//! ```text
//! discover tests ──► instrument sources ──► for each test:
//!                    (probes -> temp file)     begin_test, execute, promote
//!                                                        │
//!            report ◄── rank ◄── coverage matrix ◄───────┘
//! ```
//!
//! Per-file and per-test failures are logged, counted in the [`RunSummary`]
//! and never abort the run. A bad configuration is an error, and so is a
//! project with no sources or no tests or whose instrumented tests do not
//! build.

use crate::config::FaultlineConfig;
use crate::discovery::{TestCase, TestDiscovery, TestModuleFiles};
use crate::instrument::{FileInstrumentation, InstrumentAction, InstrumentOptions, Instrumenter};
use crate::mapping::ProbeMappingStore;
use crate::matrix::{CoverageMatrixBuilder, MatrixWarning};
use crate::project::ensure_probe_dependency;
use crate::rank::{ReportSnapshot, SuspiciousnessRanker};
use crate::reset::{reset_instrumentation, ResetSummary};
use crate::result::{FaultlineError, FaultlineResult};
use crate::runner::{read_outcomes, write_outcomes, TestExecutor, TestOutcome, TestOutcomes};
use crate::session::CoverageSession;
use crate::walk::find_rust_sources;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress callbacks; every method defaults to a no-op
pub trait RunObserver {
    /// A file was instrumented (or found already instrumented)
    fn on_file_instrumented(&mut self, _file: &FileInstrumentation) {}

    /// A file could not be instrumented and was left unchanged
    fn on_file_failed(&mut self, _path: &Path, _error: &FaultlineError) {}

    /// Tests were discovered and are about to run
    fn on_tests_discovered(&mut self, _tests: &[TestCase]) {}

    /// A test is about to run
    fn on_test_started(&mut self, _test: &TestCase) {}

    /// A test finished
    fn on_test_finished(&mut self, _outcome: &TestOutcome) {}

    /// Non-fatal problem
    fn on_warning(&mut self, _message: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Instrumentation counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentStats {
    /// Files that received fresh probes
    pub files_instrumented: usize,
    /// Files whose existing probes were retargeted
    pub files_retargeted: usize,
    /// Files that could not be parsed or written
    pub files_failed: usize,
    /// Probes created
    pub probes_created: usize,
}

/// A probe in the summary's short list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspect {
    /// Statement cell, `(file) name.id`
    pub statement: String,
    /// Best score across formulas
    pub score: f64,
}

/// Everything a run did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Instrumentation counts
    pub instrumentation: InstrumentStats,
    /// Tests executed
    pub tests_run: usize,
    /// Tests that passed
    pub tests_passed: usize,
    /// Tests that failed, timeouts included
    pub tests_failed: usize,
    /// Tests killed after the timeout
    pub tests_timed_out: usize,
    /// Probes that appear in the report
    pub probes_ranked: usize,
    /// Non-fatal problems
    pub warnings: Vec<String>,
    /// Report location
    pub report_path: Option<PathBuf>,
    /// Most suspicious probes, best first
    pub top_suspects: Vec<Suspect>,
    /// Wall time
    pub duration: Duration,
}

impl RunSummary {
    /// Whether at least one test failed, which is what makes ranking useful
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.tests_failed > 0
    }

    fn warn(&mut self, observer: &mut dyn RunObserver, message: String) {
        warn!("{message}");
        observer.on_warning(&message);
        self.warnings.push(message);
    }
}

/// Number of suspects kept in [`RunSummary::top_suspects`]
const SUMMARY_SUSPECTS: usize = 10;

/// Drives a localization run over one project
#[derive(Debug)]
pub struct Localizer<'s> {
    config: FaultlineConfig,
    store: &'s ProbeMappingStore,
    session: CoverageSession,
}

impl<'s> Localizer<'s> {
    /// Create a localizer; the project directory is made absolute so probe
    /// paths stay valid whatever directory cargo runs tests from
    #[must_use]
    pub fn new(mut config: FaultlineConfig, store: &'s ProbeMappingStore) -> Self {
        if let Ok(abs) = fs::canonicalize(&config.project_dir) {
            config.project_dir = abs;
        }
        let session = CoverageSession::with_temp_name(config.coverage_dir(), &config.temp_file_name);
        Self {
            config,
            store,
            session,
        }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &FaultlineConfig {
        &self.config
    }

    /// Coverage session in use
    #[must_use]
    pub const fn session(&self) -> &CoverageSession {
        &self.session
    }

    /// Production source files. Files of out-of-line `#[cfg(test)]` modules
    /// are left out unless test modules are included.
    #[must_use]
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files = self.all_source_files();
        if !self.config.include_test_modules {
            let tests = TestModuleFiles::scan(&files);
            files.retain(|f| !tests.contains(f));
            debug!(test_modules = tests.len(), "left out test module files");
        }
        files
    }

    fn all_source_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .config
            .source_paths()
            .iter()
            .flat_map(|dir| find_rust_sources(dir, &self.config.excludes))
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Tests selected by the configured markers and filters
    #[must_use]
    pub fn discover_tests(&self) -> Vec<TestCase> {
        TestDiscovery::new(self.config.test_markers.iter().cloned())
            .with_filters(self.config.test_filters.iter().cloned())
            .discover(
                &self.config.project_dir,
                &self.config.source_dirs,
                &self.config.tests_dir,
                &self.config.excludes,
            )
    }

    /// Instrument every production source so its probes write to the
    /// session's temp file
    pub fn instrument_sources(
        &self,
        observer: &mut dyn RunObserver,
    ) -> FaultlineResult<InstrumentStats> {
        let files = self.source_files();
        if files.is_empty() {
            return Err(FaultlineError::NoSourceFiles {
                root: self.config.project_dir.clone(),
            });
        }
        self.session.prepare()?;
        let target = self.session.probe_target();
        let instrumenter = Instrumenter::new(self.store).with_options(InstrumentOptions {
            include_test_modules: self.config.include_test_modules,
        });

        let mut stats = InstrumentStats::default();
        for file in &files {
            match instrumenter.instrument_file(file, Some(&target)) {
                Ok(done) => {
                    match done.action {
                        InstrumentAction::Injected => stats.files_instrumented += 1,
                        InstrumentAction::Retargeted => stats.files_retargeted += 1,
                        InstrumentAction::Unchanged => {}
                    }
                    stats.probes_created += done.probes.len();
                    observer.on_file_instrumented(&done);
                }
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "file left uninstrumented");
                    stats.files_failed += 1;
                    observer.on_file_failed(file, &e);
                }
            }
        }
        info!(
            injected = stats.files_instrumented,
            retargeted = stats.files_retargeted,
            failed = stats.files_failed,
            probes = stats.probes_created,
            "instrumentation finished"
        );
        Ok(stats)
    }

    /// Strip probes, clear the mapping store and delete coverage artifacts.
    /// Test module files are stripped too, in case an earlier run included them.
    #[must_use]
    pub fn reset(&self) -> ResetSummary {
        reset_instrumentation(&self.all_source_files(), self.store, &[self.config.work_dir()])
    }

    /// Full run: discover, instrument, execute each test in isolation, rank
    /// and write the report
    pub fn run(
        &self,
        executor: &dyn TestExecutor,
        observer: &mut dyn RunObserver,
    ) -> FaultlineResult<RunSummary> {
        let start = Instant::now();
        self.config.validate()?;
        let mut summary = RunSummary::default();

        if self.config.reset_before_run {
            let reset = self.reset();
            debug!(?reset, "reset before run");
            for path in reset.files_failed.iter().chain(&reset.artifacts_failed) {
                summary.warn(observer, format!("reset left {} behind", path.display()));
            }
        }

        let tests = self.discover_tests();
        if tests.is_empty() {
            return Err(FaultlineError::NoTestsFound {
                root: self.config.project_dir.clone(),
            });
        }

        if let Some(probe_crate) = &self.config.probe_crate_path {
            ensure_probe_dependency(&self.config.manifest_path(), probe_crate)?;
        }

        summary.instrumentation = self.instrument_sources(observer)?;
        executor.prepare()?;
        observer.on_tests_discovered(&tests);

        let outcomes = self.execute_tests(&tests, executor, observer, &mut summary);
        summary.tests_run = outcomes.total();
        summary.tests_passed = outcomes.passed();
        summary.tests_failed = outcomes.failed();
        summary.tests_timed_out = outcomes.timed_out();

        let verdicts = outcomes.verdicts();
        if let Err(e) = write_outcomes(&self.config.outcomes_path(), &verdicts) {
            summary.warn(observer, format!("outcomes not recorded: {e}"));
        }

        self.rank(&verdicts, &mut summary, observer)?;
        summary.duration = start.elapsed();
        Ok(summary)
    }

    /// Re-rank from the coverage files and outcomes of a previous run
    pub fn rank_existing(&self, observer: &mut dyn RunObserver) -> FaultlineResult<RunSummary> {
        let start = Instant::now();
        self.config.validate()?;
        let path = self.config.outcomes_path();
        if !path.is_file() {
            return Err(FaultlineError::NoTestsFound {
                root: self.config.work_dir(),
            });
        }
        let verdicts = read_outcomes(&path)?;
        if verdicts.is_empty() {
            return Err(FaultlineError::NoTestsFound {
                root: self.config.work_dir(),
            });
        }
        let mut summary = RunSummary {
            tests_run: verdicts.len(),
            tests_passed: verdicts.values().filter(|p| **p).count(),
            tests_failed: verdicts.values().filter(|p| !**p).count(),
            ..RunSummary::default()
        };
        self.rank(&verdicts, &mut summary, observer)?;
        summary.duration = start.elapsed();
        Ok(summary)
    }

    fn execute_tests(
        &self,
        tests: &[TestCase],
        executor: &dyn TestExecutor,
        observer: &mut dyn RunObserver,
        summary: &mut RunSummary,
    ) -> TestOutcomes {
        let start = Instant::now();
        let mut outcomes = TestOutcomes::new();
        for test in tests {
            let id = test.id();
            observer.on_test_started(test);
            if let Err(e) = self.session.begin_test() {
                summary.warn(observer, format!("cannot clear coverage before {id}: {e}"));
            }

            let outcome = executor.execute(test);
            debug!(test = %id, passed = outcome.passed, "test finished");

            match self.session.promote(&id) {
                Ok(Some(_)) => {}
                Ok(None) => debug!(test = %id, "no probe fired"),
                Err(e) => summary.warn(observer, format!("coverage of {id} lost: {e}")),
            }
            observer.on_test_finished(&outcome);
            outcomes.add(outcome);
        }
        outcomes.duration = start.elapsed();
        outcomes
    }

    fn rank(
        &self,
        verdicts: &BTreeMap<String, bool>,
        summary: &mut RunSummary,
        observer: &mut dyn RunObserver,
    ) -> FaultlineResult<()> {
        let build = CoverageMatrixBuilder::new(&self.session).build(verdicts.keys());
        // already logged by the builder
        for message in build.warnings.iter().map(MatrixWarning::to_string) {
            observer.on_warning(&message);
            summary.warnings.push(message);
        }

        let mut ranker = SuspiciousnessRanker::new(&build.matrix, verdicts);
        ranker.calculate_all();
        for test in ranker.unmatched_tests() {
            summary.warn(observer, format!("{test} has no coverage entry"));
        }
        if ranker.total_failed() == 0 {
            summary.warn(observer, "no failing test: every score is zero".to_string());
        }

        let snapshot = ReportSnapshot::build(&ranker, self.store, self.config.top);
        let report_path = self.config.report_path();
        snapshot.write(&report_path, self.config.report_format)?;
        info!(path = %report_path.display(), rows = snapshot.len(), "report written");

        summary.probes_ranked = snapshot.len();
        summary.report_path = Some(report_path);
        summary.top_suspects = top_suspects(&snapshot);
        Ok(())
    }
}

fn top_suspects(snapshot: &ReportSnapshot) -> Vec<Suspect> {
    let mut rows: Vec<_> = snapshot.rows.iter().collect();
    rows.sort_by(|a, b| b.best_score().total_cmp(&a.best_score()));
    rows.into_iter()
        .take(SUMMARY_SUSPECTS)
        .filter(|r| r.best_score() > 0.0)
        .map(|r| Suspect {
            statement: r.statement(),
            score: r.best_score(),
        })
        .collect()
}
