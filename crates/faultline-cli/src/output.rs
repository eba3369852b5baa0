//! Output formatting and progress reporting

use console::{style, Style, Term};
use faultline::{
    FaultlineError, FileInstrumentation, InstrumentAction, RunObserver, Suspect, TestCase,
    TestOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Progress reporter for instrumentation and test execution
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
    /// Print one line per instrumented file
    pub verbose: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
            verbose: false,
        }
    }

    /// Also report every instrumented file
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Start a progress bar
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(delta);
        }
    }

    /// Update progress message
    pub fn set_message(&self, message: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_message(message.to_string());
        }
    }

    /// Finish progress bar
    pub fn finish(&mut self) {
        if let Some(pb) = self.progress_bar.take() {
            pb.finish_and_clear();
        }
    }

    fn line(&self, text: &str) {
        match &self.progress_bar {
            Some(pb) => pb.suspend(|| {
                let _ = self.term.write_line(text);
            }),
            None => {
                let _ = self.term.write_line(text);
            }
        }
    }

    fn prefixed(&self, symbol: &str, plain: &str, color: Style, message: &str) {
        let prefix = if self.use_color {
            color.apply_to(symbol).bold().to_string()
        } else {
            plain.to_string()
        };
        self.line(&format!("{prefix} {message}"));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed("✓", "PASS", Style::new().green(), message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        self.prefixed("✗", "FAIL", Style::new().red(), message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed("⚠", "WARN", Style::new().yellow(), message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed("ℹ", "INFO", Style::new().blue(), message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        self.line("");
        self.line(&styled);
    }

    /// Print test summary
    pub fn summary(&self, passed: usize, failed: usize, timed_out: usize, duration: Duration) {
        if self.quiet && failed == 0 {
            return;
        }

        self.line("");
        self.line(&summary_line(
            passed,
            failed,
            timed_out,
            duration,
            self.use_color,
        ));
    }

    /// Print the most suspicious statements, best first
    pub fn suspects(&self, suspects: &[Suspect]) {
        if self.quiet {
            return;
        }
        if suspects.is_empty() {
            self.info("No statement scored above zero");
            return;
        }
        self.header("Most suspicious statements");
        for (rank, s) in suspects.iter().enumerate() {
            let score = faultline::rank::report::format_score(s.score);
            let score = if self.use_color {
                style(score).red().bold().to_string()
            } else {
                score
            };
            self.line(&format!("{:>3}. {score}  {}", rank + 1, s.statement));
        }
    }
}

/// One-line verdict of a run
#[must_use]
pub fn summary_line(
    passed: usize,
    failed: usize,
    timed_out: usize,
    duration: Duration,
    use_color: bool,
) -> String {
    let total = passed + failed;
    let secs = duration.as_secs_f64();
    if use_color {
        let passed_style = Style::new().green().bold();
        let failed_style = Style::new().red().bold();
        let status = if failed > 0 {
            failed_style.apply_to("FAILING")
        } else {
            passed_style.apply_to("PASSING")
        };
        format!(
            "{status} {total} tests in {secs:.2}s ({} passed, {} failed, {timed_out} timed out)",
            passed_style.apply_to(passed),
            if failed > 0 {
                failed_style.apply_to(failed).to_string()
            } else {
                failed.to_string()
            },
        )
    } else {
        let status = if failed > 0 { "FAILING" } else { "PASSING" };
        format!(
            "{status} {total} tests in {secs:.2}s ({passed} passed, {failed} failed, {timed_out} timed out)"
        )
    }
}

impl RunObserver for ProgressReporter {
    fn on_file_instrumented(&mut self, file: &FileInstrumentation) {
        if !self.verbose {
            return;
        }
        let what = match file.action {
            InstrumentAction::Injected => format!("{} probes", file.probes.len()),
            InstrumentAction::Retargeted => "retargeted".to_string(),
            InstrumentAction::Unchanged => "unchanged".to_string(),
        };
        self.info(&format!("{}: {what}", file.path.display()));
    }

    fn on_file_failed(&mut self, path: &Path, error: &FaultlineError) {
        self.warning(&format!("skipped {}: {error}", path.display()));
    }

    fn on_tests_discovered(&mut self, tests: &[TestCase]) {
        self.header("Running tests");
        self.start_progress(tests.len() as u64, "starting");
    }

    fn on_test_started(&mut self, test: &TestCase) {
        self.set_message(&test.id());
    }

    fn on_test_finished(&mut self, outcome: &TestOutcome) {
        if outcome.passed {
            self.success(&outcome.test_id);
        } else if outcome.timed_out {
            self.failure(&format!("{} (timed out)", outcome.test_id));
        } else {
            self.failure(&outcome.test_id);
        }
        self.increment(1);
    }

    fn on_warning(&mut self, message: &str) {
        self.warning(message);
    }
}
