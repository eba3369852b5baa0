//! Faultline: Spectrum-Based Fault Localization for Rust Crates
//!
//! Faultline ranks the statements of a crate by how strongly their execution
//! correlates with failing tests. Production sources are rewritten so every
//! statement fires a probe, each test runs in isolation, and five formulas
//! (Tarantula, Ochiai, DStar, Op2, Jaccard) score every probe.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     FAULTLINE Architecture                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐             │
//! │   │ syntax     │    │ instrument │    │ mapping    │             │
//! │   │ (syn +     │───►│ inject /   │───►│ probe id → │             │
//! │   │  edits)    │    │ strip      │    │ function   │             │
//! │   └────────────┘    └────────────┘    └─────┬──────┘             │
//! │                                             │                    │
//! │   ┌────────────┐    ┌────────────┐    ┌─────▼──────┐             │
//! │   │ runner     │───►│ session /  │───►│ rank +     │             │
//! │   │ cargo test │    │ matrix     │    │ report     │             │
//! │   └────────────┘    └────────────┘    └────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use faultline::{Instrumenter, ProbeMappingStore};
//!
//! let store = ProbeMappingStore::in_memory();
//! let out = Instrumenter::new(&store)
//!     .inject_all("fn f() { let x = 1; }", Some("lib.rs"), None)
//!     .unwrap();
//! assert_eq!(out.probes.len(), 1);
//! assert_eq!(faultline::strip(&out.source).unwrap(), "fn f() { let x = 1; }");
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

pub mod config;
pub mod discovery;
pub mod instrument;
pub mod mapping;
pub mod matrix;
pub mod pipeline;
pub mod project;
pub mod rank;
pub mod reset;
mod result;
pub mod runner;
pub mod session;
pub mod syntax;
pub mod walk;

pub use config::{FaultlineConfig, CONFIG_FILE_NAME};
pub use discovery::{TestCase, TestDiscovery, TestModuleFiles, TestTarget, DEFAULT_TEST_MARKERS};
pub use instrument::{
    probe_count, probe_ids, retarget, strip, strip_file, FileInstrumentation, InstrumentAction,
    InstrumentOptions, Instrumentation, Instrumented, Instrumenter, MethodSelector,
};
pub use mapping::{ProbeMappingStore, ProbeRecord, DEFAULT_MAPPING_FILE};
pub use matrix::{build_matrix, CoverageMatrix, CoverageMatrixBuilder, MatrixBuild, MatrixWarning};
pub use pipeline::{InstrumentStats, Localizer, NoopObserver, RunObserver, RunSummary, Suspect};
pub use project::ensure_probe_dependency;
pub use rank::{
    Formula, ReportFormat, ReportRow, ReportSnapshot, Spectrum, SuspiciousnessRanker,
};
pub use reset::{reset_instrumentation, ResetSummary};
pub use result::{FaultlineError, FaultlineResult};
pub use runner::{CargoTestExecutor, TestExecutor, TestOutcome, TestOutcomes};
pub use session::CoverageSession;
pub use syntax::{apply_edit, apply_edits, SourceTree, TextEdit};
