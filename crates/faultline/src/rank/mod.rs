//! Suspiciousness ranking (spectrum-based fault localization)
//!
//! Each probe's spectrum is the number of failing tests that executed it
//! (`ef`), the number of passing tests that executed it (`ep`), and the suite
//! totals `F` (failing) and `P` (passing). Five formulas turn a spectrum into
//! a score; higher means more suspicious.
//!
//! ## Formulas
//!
//! ```text
//! Tarantula = (ef/F) / ((ef/F) + (ep/P))
//! Ochiai    = ef / sqrt(F * (ef + ep))
//! DStar     = ef^2 / (ep + (F - ef))        (+inf when the denominator is 0)
//! Op2       = ef - ep / (P + 1)
//! Jaccard   = ef / (F + ep)
//! ```

pub mod report;

pub use report::{ReportFormat, ReportRow, ReportSnapshot};

use crate::matrix::CoverageMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// DStar exponent
const DSTAR_EXPONENT: i32 = 2;

/// Smoothing term in Op2's denominator
const OP2_SMOOTHING: f64 = 1.0;

/// Suspiciousness formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Formula {
    /// Tarantula (Jones & Harrold)
    Tarantula,
    /// Ochiai
    Ochiai,
    /// DStar with exponent 2
    DStar,
    /// Op2
    Op2,
    /// Jaccard
    Jaccard,
}

impl Formula {
    /// All formulas in report column order
    pub const ALL: [Self; 5] = [
        Self::Tarantula,
        Self::Ochiai,
        Self::DStar,
        Self::Op2,
        Self::Jaccard,
    ];

    /// Column name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tarantula => "Tarantula",
            Self::Ochiai => "Ochiai",
            Self::DStar => "DStar",
            Self::Op2 => "Op2",
            Self::Jaccard => "Jaccard",
        }
    }

    /// Score a spectrum
    #[must_use]
    pub fn score(self, s: Spectrum) -> f64 {
        let ef = f64::from(s.ef);
        let ep = f64::from(s.ep);
        let f = f64::from(s.total_failed);
        let p = f64::from(s.total_passed);
        match self {
            Self::Tarantula => {
                if s.total_failed == 0 || s.total_passed == 0 {
                    return 0.0;
                }
                let fail_ratio = ef / f;
                let pass_ratio = ep / p;
                let denom = fail_ratio + pass_ratio;
                if denom == 0.0 {
                    0.0
                } else {
                    fail_ratio / denom
                }
            }
            Self::Ochiai => {
                let denom = (f * (ef + ep)).sqrt();
                if denom == 0.0 {
                    0.0
                } else {
                    ef / denom
                }
            }
            Self::DStar => {
                let denom = ep + (f - ef);
                if denom <= 0.0 {
                    if s.ef > 0 {
                        f64::INFINITY
                    } else {
                        0.0
                    }
                } else {
                    ef.powi(DSTAR_EXPONENT) / denom
                }
            }
            Self::Op2 => ef - ep / (p + OP2_SMOOTHING),
            Self::Jaccard => {
                let denom = f + ep;
                if denom == 0.0 {
                    0.0
                } else {
                    ef / denom
                }
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Formula {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown formula `{s}`"))
    }
}

/// Execution spectrum of one probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Failing tests that executed the probe
    pub ef: u32,
    /// Passing tests that executed the probe
    pub ep: u32,
    /// Failing tests in the suite
    pub total_failed: u32,
    /// Passing tests in the suite
    pub total_passed: u32,
}

impl Spectrum {
    /// Create a spectrum
    #[must_use]
    pub const fn new(ef: u32, ep: u32, total_failed: u32, total_passed: u32) -> Self {
        Self {
            ef,
            ep,
            total_failed,
            total_passed,
        }
    }
}

/// Computes and holds suspiciousness scores for every covered probe
#[derive(Debug, Clone, Default)]
pub struct SuspiciousnessRanker {
    spectra: BTreeMap<String, Spectrum>,
    total_failed: u32,
    total_passed: u32,
    scores: BTreeMap<Formula, HashMap<String, f64>>,
    unmatched_tests: Vec<String>,
}

impl SuspiciousnessRanker {
    /// Build spectra from a coverage matrix and test outcomes
    /// (`true` = passed).
    ///
    /// Tests with an outcome but no matrix entry count toward `F`/`P` with
    /// empty coverage; matrix entries without an outcome are ignored.
    #[must_use]
    pub fn new(matrix: &CoverageMatrix, outcomes: &BTreeMap<String, bool>) -> Self {
        let mut ranker = Self::default();
        let mut counts: BTreeMap<&str, (u32, u32)> = BTreeMap::new();

        for (test, &passed) in outcomes {
            if passed {
                ranker.total_passed += 1;
            } else {
                ranker.total_failed += 1;
            }
            let Some(probes) = matrix.coverage(test) else {
                ranker.unmatched_tests.push(test.clone());
                continue;
            };
            for probe in probes {
                let entry = counts.entry(probe.as_str()).or_default();
                if passed {
                    entry.1 += 1;
                } else {
                    entry.0 += 1;
                }
            }
        }

        for test in matrix.tests().filter(|t| !outcomes.contains_key(*t)) {
            warn!(test, "coverage recorded for a test with no outcome");
        }
        for test in &ranker.unmatched_tests {
            warn!(test = %test, "test outcome has no coverage entry");
        }

        ranker.spectra = counts
            .into_iter()
            .map(|(probe, (ef, ep))| {
                (
                    probe.to_string(),
                    Spectrum::new(ef, ep, ranker.total_failed, ranker.total_passed),
                )
            })
            .collect();
        ranker
    }

    /// Failing tests (`F`)
    #[must_use]
    pub const fn total_failed(&self) -> u32 {
        self.total_failed
    }

    /// Passing tests (`P`)
    #[must_use]
    pub const fn total_passed(&self) -> u32 {
        self.total_passed
    }

    /// Tests that had an outcome but no coverage entry
    #[must_use]
    pub fn unmatched_tests(&self) -> &[String] {
        &self.unmatched_tests
    }

    /// Spectrum of a probe
    #[must_use]
    pub fn spectrum(&self, probe: &str) -> Option<Spectrum> {
        self.spectra.get(probe).copied()
    }

    /// Probes with a spectrum, sorted
    pub fn probes(&self) -> impl Iterator<Item = &str> {
        self.spectra.keys().map(String::as_str)
    }

    /// Compute one formula over every probe
    pub fn calculate(&mut self, formula: Formula) -> &HashMap<String, f64> {
        let scores = self
            .spectra
            .iter()
            .map(|(probe, s)| (probe.clone(), formula.score(*s)))
            .collect();
        self.scores.insert(formula, scores);
        &self.scores[&formula]
    }

    /// Compute all five formulas
    pub fn calculate_all(&mut self) {
        for formula in Formula::ALL {
            self.calculate(formula);
        }
    }

    /// Formulas computed so far, in column order
    #[must_use]
    pub fn computed(&self) -> Vec<Formula> {
        self.scores.keys().copied().collect()
    }

    /// Scores of a formula, if computed
    #[must_use]
    pub fn scores(&self, formula: Formula) -> Option<&HashMap<String, f64>> {
        self.scores.get(&formula)
    }

    /// Score of one probe under one formula
    #[must_use]
    pub fn score(&self, formula: Formula, probe: &str) -> Option<f64> {
        self.scores.get(&formula)?.get(probe).copied()
    }
}
