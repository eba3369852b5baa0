//! Probe instrumentation engine.
//!
//! Rewrites Rust source so that every statement inside a function body is
//! preceded by a probe-firing statement:
//!
//! ```text
//! fn divide(a: i32, b: i32) -> i32 {        fn divide(a: i32, b: i32) -> i32 {
//!     let q = a / b;                 ==>        ::faultline_probe::log("current.coverage.tmp", "1f0c...");
//!     q                                          let q = a / b;
//! }                                              ::faultline_probe::log("current.coverage.tmp", "9ab2...");
//!                                                q
//!                                            }
//! ```
//!
//! Every injected probe is registered in the [`ProbeMappingStore`] with the
//! qualified name of its function. Instrumentation is idempotent: a target
//! that already carries probes is retargeted instead of injected again, and
//! [`strip`] removes probes leaving the original bytes behind.

mod probe;
mod scope;
mod walker;


pub use probe::{
    default_coverage_file, recognize, render, ProbeCall, ProbeForm, LEGACY_PROBE_FN, PROBE_CRATE,
    PROBE_FN,
};
pub use scope::MethodSelector;
pub(crate) use scope::is_cfg_test;

use crate::mapping::{ProbeMappingStore, ProbeRecord};
use crate::result::{FaultlineError, FaultlineResult};
use crate::syntax::{apply_edit, apply_edits, SourceTree, TextEdit};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walker::{removal_range, InjectTarget, ProbeWalker};

/// Rewritten source and the probes created while rewriting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    /// New source text
    pub source: String,
    /// Probes injected, in source order
    pub probes: Vec<ProbeRecord>,
}

/// What the idempotent entry points did to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InstrumentAction {
    /// Fresh probes were injected
    Injected,
    /// Existing probes were pointed at a new coverage file
    Retargeted,
    /// Nothing to do
    Unchanged,
}

/// Outcome of instrumenting one source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    /// Action taken
    pub action: InstrumentAction,
    /// Resulting source text
    pub source: String,
    /// Probes injected (empty unless `action` is `Injected`)
    pub probes: Vec<ProbeRecord>,
}

/// Outcome of instrumenting one file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInstrumentation {
    /// File that was processed
    pub path: PathBuf,
    /// Action taken
    pub action: InstrumentAction,
    /// Whether the file content changed
    pub changed: bool,
    /// Probes injected
    pub probes: Vec<ProbeRecord>,
}

/// Instrumentation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Also instrument `#[cfg(test)]` modules
    pub include_test_modules: bool,
}

/// Injects probes and records them in a mapping store
#[derive(Debug)]
pub struct Instrumenter<'s> {
    store: &'s ProbeMappingStore,
    options: InstrumentOptions,
}

impl<'s> Instrumenter<'s> {
    /// Create an instrumenter registering probes in `store`
    #[must_use]
    pub fn new(store: &'s ProbeMappingStore) -> Self {
        Self {
            store,
            options: InstrumentOptions::default(),
        }
    }

    /// Set options
    #[must_use]
    pub const fn with_options(mut self, options: InstrumentOptions) -> Self {
        self.options = options;
        self
    }

    /// Inject a probe before every statement of every function.
    ///
    /// Probes write to `coverage_override`, or to `<function>.coverage` when
    /// no override is given.
    pub fn inject_all(
        &self,
        source: &str,
        source_file: Option<&str>,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<Instrumented> {
        let tree = SourceTree::parse_labeled(source, source_file.unwrap_or("<source>"))?;
        Ok(self.inject_tree(&tree, None, source_file, coverage_override))
    }

    /// Inject probes into the functions matching `selector` only.
    ///
    /// Returns [`FaultlineError::MethodNotFound`] when nothing matches; the
    /// caller keeps the text as it was.
    pub fn inject_method(
        &self,
        source: &str,
        selector: &str,
        source_file: Option<&str>,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<Instrumented> {
        let label = source_file.unwrap_or("<source>");
        let selector = parse_selector(selector, label)?;
        let tree = SourceTree::parse_labeled(source, label)?;
        let scan = ProbeWalker::scan(&tree, Some(&selector)).walk();
        if scan.matched_methods == 0 {
            return Err(not_found(&selector, label));
        }
        Ok(self.inject_tree(&tree, Some(&selector), source_file, coverage_override))
    }

    /// Idempotent entry point: inject when the text has no probe yet,
    /// otherwise retarget existing probes to `coverage_override`.
    pub fn instrument_source(
        &self,
        source: &str,
        source_file: Option<&str>,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<Instrumentation> {
        let tree = SourceTree::parse_labeled(source, source_file.unwrap_or("<source>"))?;
        self.instrument_tree(&tree, None, source_file, coverage_override)
    }

    /// Idempotently instrument a file in place
    pub fn instrument_file(
        &self,
        path: &Path,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<FileInstrumentation> {
        self.instrument_path(path, None, coverage_override)
    }

    /// Idempotently instrument the functions matching `selector` in a file
    pub fn instrument_method_in_file(
        &self,
        path: &Path,
        selector: &str,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<FileInstrumentation> {
        let selector = parse_selector(selector, &path.display().to_string())?;
        self.instrument_path(path, Some(&selector), coverage_override)
    }

    fn instrument_path(
        &self,
        path: &Path,
        selector: Option<&MethodSelector>,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<FileInstrumentation> {
        let file_name = file_name(path);
        let mut result = None;
        let outcome = apply_edit(path, |tree| {
            let done =
                self.instrument_tree(tree, selector, file_name.as_deref(), coverage_override)?;
            let source = done.source.clone();
            result = Some(done);
            Ok(source)
        })?;
        let (action, probes) = result.map_or((InstrumentAction::Unchanged, Vec::new()), |r| {
            (r.action, r.probes)
        });
        debug!(
            path = %path.display(),
            ?action,
            probes = probes.len(),
            "instrumented file"
        );
        Ok(FileInstrumentation {
            path: path.to_path_buf(),
            action,
            changed: outcome.changed,
            probes,
        })
    }

    fn instrument_tree(
        &self,
        tree: &SourceTree,
        selector: Option<&MethodSelector>,
        source_file: Option<&str>,
        coverage_override: Option<&str>,
    ) -> FaultlineResult<Instrumentation> {
        let scan = ProbeWalker::scan(tree, selector).walk();
        if let Some(selector) = selector {
            if scan.matched_methods == 0 {
                return Err(not_found(selector, source_file.unwrap_or("<source>")));
            }
        }
        if scan.found.is_empty() {
            let injected = self.inject_tree(tree, selector, source_file, coverage_override);
            let action = if injected.probes.is_empty() {
                InstrumentAction::Unchanged
            } else {
                InstrumentAction::Injected
            };
            return Ok(Instrumentation {
                action,
                source: injected.source,
                probes: injected.probes,
            });
        }
        let Some(target) = coverage_override else {
            return Ok(Instrumentation {
                action: InstrumentAction::Unchanged,
                source: tree.text().to_string(),
                probes: Vec::new(),
            });
        };
        let edits = retarget_edits(tree, &scan.found, target);
        let source = apply_edits(tree.text(), edits);
        let action = if source == tree.text() {
            InstrumentAction::Unchanged
        } else {
            InstrumentAction::Retargeted
        };
        Ok(Instrumentation {
            action,
            source,
            probes: Vec::new(),
        })
    }

    fn inject_tree(
        &self,
        tree: &SourceTree,
        selector: Option<&MethodSelector>,
        source_file: Option<&str>,
        coverage_override: Option<&str>,
    ) -> Instrumented {
        let target = InjectTarget {
            source_file,
            coverage_override,
            include_test_modules: self.options.include_test_modules,
        };
        let walker = ProbeWalker::inject(tree, selector, target).walk();
        if let Err(e) = self.store.add_mappings(walker.probes.iter().cloned()) {
            warn!(error = %e, "failed to persist probe mappings");
        }
        Instrumented {
            source: apply_edits(tree.text(), walker.edits),
            probes: walker.probes,
        }
    }
}

fn parse_selector(selector: &str, file: &str) -> FaultlineResult<MethodSelector> {
    MethodSelector::parse(selector).ok_or_else(|| FaultlineError::MethodNotFound {
        selector: selector.to_string(),
        file: file.to_string(),
    })
}

fn not_found(selector: &MethodSelector, file: &str) -> FaultlineError {
    FaultlineError::MethodNotFound {
        selector: selector.to_string(),
        file: file.to_string(),
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

fn retarget_edits(
    tree: &SourceTree,
    found: &[walker::FoundProbe],
    coverage_file: &str,
) -> Vec<TextEdit> {
    let literal = probe::string_literal_text(coverage_file);
    found
        .iter()
        .map(|p| TextEdit::replace(p.target.clone(), literal.clone()))
        .filter(|e| tree.text()[e.range.clone()] != e.replacement)
        .collect()
}

/// Point every probe statement at `coverage_file`, changing nothing else
pub fn retarget(source: &str, coverage_file: &str) -> FaultlineResult<String> {
    let tree = SourceTree::parse(source)?;
    let scan = ProbeWalker::scan(&tree, None).walk();
    Ok(apply_edits(
        tree.text(),
        retarget_edits(&tree, &scan.found, coverage_file),
    ))
}

/// Remove every probe statement, current and legacy form
pub fn strip(source: &str) -> FaultlineResult<String> {
    let tree = SourceTree::parse(source)?;
    Ok(strip_tree(&tree))
}

fn strip_tree(tree: &SourceTree) -> String {
    let scan = ProbeWalker::scan(tree, None).walk();
    let edits = scan
        .found
        .iter()
        .map(|p| TextEdit::delete(removal_range(tree, &p.statement)))
        .collect();
    apply_edits(tree.text(), edits)
}

/// Number of probe statements in `source`
pub fn probe_count(source: &str) -> FaultlineResult<usize> {
    let tree = SourceTree::parse(source)?;
    Ok(ProbeWalker::scan(&tree, None).walk().found.len())
}

/// Probe ids present in `source`, in source order
pub fn probe_ids(source: &str) -> FaultlineResult<Vec<String>> {
    let tree = SourceTree::parse(source)?;
    Ok(ProbeWalker::scan(&tree, None)
        .walk()
        .found
        .into_iter()
        .filter_map(|p| p.probe_id)
        .collect())
}

/// Strip a file in place. Returns whether it changed.
pub fn strip_file(path: &Path) -> FaultlineResult<bool> {
    let outcome = apply_edit(path, |tree| Ok(strip_tree(tree)))?;
    Ok(outcome.changed)
}
