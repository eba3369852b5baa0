//! Suspiciousness report assembly and rendering.

use super::{Formula, SuspiciousnessRanker};
use crate::mapping::ProbeMappingStore;
use crate::result::{FaultlineError, FaultlineResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Report serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Comma-separated values
    #[default]
    Csv,
    /// Markdown table
    Markdown,
}

impl ReportFormat {
    /// File extension for the format
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Markdown => "md",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(format!("unknown report format `{other}`")),
        }
    }
}

/// One probe's row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Probe id
    pub probe_id: String,
    /// `(file) qualified::name` from the mapping store
    pub display_name: Option<String>,
    /// Score per computed formula
    pub scores: BTreeMap<Formula, f64>,
}

impl ReportRow {
    /// Display name, falling back to the raw id
    #[must_use]
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.probe_id)
    }

    /// Statement cell: `display.id`, or the id alone when unmapped
    #[must_use]
    pub fn statement(&self) -> String {
        match &self.display_name {
            Some(display) => format!("{display}.{}", self.probe_id),
            None => self.probe_id.clone(),
        }
    }

    /// Highest score across formulas; +inf dominates
    #[must_use]
    pub fn best_score(&self) -> f64 {
        self.scores
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    fn by_name(a: &Self, b: &Self) -> Ordering {
        a.display()
            .cmp(b.display())
            .then_with(|| a.probe_id.cmp(&b.probe_id))
    }
}

/// Sorted, optionally truncated view of a ranker's scores
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSnapshot {
    /// Computed formulas, in column order
    pub metrics: Vec<Formula>,
    /// Rows
    pub rows: Vec<ReportRow>,
}

impl ReportSnapshot {
    /// Assemble rows for every probe the ranker knows.
    ///
    /// Rows are sorted by display name then id. With `top`, only the `n`
    /// highest-scoring rows are kept, ordered by best score descending (ties
    /// by display name then id).
    #[must_use]
    pub fn build(
        ranker: &SuspiciousnessRanker,
        store: &ProbeMappingStore,
        top: Option<usize>,
    ) -> Self {
        let metrics = ranker.computed();
        let mut rows: Vec<ReportRow> = ranker
            .probes()
            .map(|probe| ReportRow {
                probe_id: probe.to_string(),
                display_name: store.display_name(probe),
                scores: metrics
                    .iter()
                    .filter_map(|&f| ranker.score(f, probe).map(|s| (f, s)))
                    .collect(),
            })
            .collect();
        rows.sort_by(ReportRow::by_name);

        if let Some(n) = top {
            rows.sort_by(|a, b| {
                b.best_score()
                    .total_cmp(&a.best_score())
                    .then_with(|| ReportRow::by_name(a, b))
            });
            rows.truncate(n);
        }
        Self { metrics, rows }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render in `format`
    #[must_use]
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Csv => self.to_csv(),
            ReportFormat::Markdown => self.to_markdown(),
        }
    }

    /// CSV with a `Statement` column and one column per computed formula
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Statement");
        for m in &self.metrics {
            out.push(',');
            out.push_str(m.name());
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str(&csv_escape(&row.statement()));
            for m in &self.metrics {
                out.push(',');
                if let Some(&score) = row.scores.get(m) {
                    out.push_str(&format_score(score));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Markdown table
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("| Statement |");
        let mut rule = String::from("| --- |");
        for m in &self.metrics {
            out.push_str(&format!(" {} |", m.name()));
            rule.push_str(" --- |");
        }
        out.push('\n');
        out.push_str(&rule);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&format!("| {} |", markdown_escape(&row.statement())));
            for m in &self.metrics {
                let cell = row.scores.get(m).map(|&s| format_score(s)).unwrap_or_default();
                out.push_str(&format!(" {cell} |"));
            }
            out.push('\n');
        }
        out
    }

    /// Write the rendered report, creating parent directories
    pub fn write(&self, path: &Path, format: ReportFormat) -> FaultlineResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| FaultlineError::io(parent, e))?;
        }
        fs::write(path, self.render(format)).map_err(|e| FaultlineError::io(path, e))
    }
}

/// Six decimals; +inf as `Infinity`
#[must_use]
pub fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "Infinity".to_string()
    } else if score == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{score:.6}")
    }
}

/// Quote a CSV field when it holds a comma or quote
#[must_use]
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn markdown_escape(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::matrix::CoverageMatrix;
    use tempfile::TempDir;

    fn ranker() -> SuspiciousnessRanker {
        let mut m = CoverageMatrix::new();
        m.insert("t1", ["p-a", "p-b"]);
        m.insert("t2", ["p-b", "p-c"]);
        let outcomes = [("t1".to_string(), false), ("t2".to_string(), true)]
            .into_iter()
            .collect();
        SuspiciousnessRanker::new(&m, &outcomes)
    }

    fn store() -> ProbeMappingStore {
        let store = ProbeMappingStore::in_memory();
        store.add_mapping("p-a", "ops::divide", Some("ops.rs")).unwrap();
        store.add_mapping("p-b", "ops::add", Some("ops.rs")).unwrap();
        store
    }

    #[test]
    fn test_rows_sorted_by_display_then_id() {
        let mut r = ranker();
        r.calculate_all();
        let snap = ReportSnapshot::build(&r, &store(), None);
        let ids: Vec<&str> = snap.rows.iter().map(|r| r.probe_id.as_str()).collect();
        // "(ops.rs) ops::add" < "(ops.rs) ops::divide" < "p-c"
        assert_eq!(ids, vec!["p-b", "p-a", "p-c"]);
    }

    #[test]
    fn test_unmapped_probe_falls_back_to_id() {
        let mut r = ranker();
        r.calculate(Formula::Ochiai);
        let snap = ReportSnapshot::build(&r, &store(), None);
        let row = snap.rows.iter().find(|r| r.probe_id == "p-c").unwrap();
        assert_eq!(row.display(), "p-c");
        assert_eq!(row.statement(), "p-c");
    }

    #[test]
    fn test_csv_header_only_computed_metrics() {
        let mut r = ranker();
        r.calculate(Formula::Jaccard);
        r.calculate(Formula::Tarantula);
        let csv = ReportSnapshot::build(&r, &store(), None).to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), "Statement,Tarantula,Jaccard");
        assert_eq!(
            lines.next().unwrap(),
            "(ops.rs) ops::add.p-b,0.500000,0.500000"
        );
    }

    #[test]
    fn test_csv_infinity_and_quoting() {
        let mut r = ranker();
        r.calculate(Formula::DStar);
        let store = ProbeMappingStore::in_memory();
        store.add_mapping("p-a", "Pair<\"x\">", Some("a.rs")).unwrap();
        let csv = ReportSnapshot::build(&r, &store, None).to_csv();
        assert!(csv.contains("\"(a.rs) Pair<\"\"x\"\">.p-a\",Infinity"));
    }

    #[test]
    fn test_top_n_by_best_score() {
        let mut r = ranker();
        r.calculate_all();
        let snap = ReportSnapshot::build(&r, &store(), Some(2));
        assert_eq!(snap.len(), 2);
        // p-a is covered only by the failing test: DStar = +inf
        assert_eq!(snap.rows[0].probe_id, "p-a");
        assert_eq!(snap.rows[1].probe_id, "p-b");
    }

    #[test]
    fn test_top_larger_than_rows() {
        let mut r = ranker();
        r.calculate_all();
        assert_eq!(ReportSnapshot::build(&r, &store(), Some(99)).len(), 3);
        assert!(ReportSnapshot::build(&r, &store(), Some(0)).is_empty());
    }

    #[test]
    fn test_markdown_escapes_pipes() {
        let mut r = ranker();
        r.calculate(Formula::Op2);
        let store = ProbeMappingStore::in_memory();
        store.add_mapping("p-a", "a|b", None).unwrap();
        let md = ReportSnapshot::build(&r, &store, None).to_markdown();
        let mut lines = md.lines();
        assert_eq!(lines.next().unwrap(), "| Statement | Op2 |");
        assert_eq!(lines.next().unwrap(), "| --- | --- |");
        assert!(md.contains("| a\\|b.p-a | 1.000000 |"));
    }

    #[test]
    fn test_missing_score_is_empty_field() {
        let row = ReportRow {
            probe_id: "x".to_string(),
            display_name: None,
            scores: BTreeMap::new(),
        };
        let snap = ReportSnapshot {
            metrics: vec![Formula::Tarantula],
            rows: vec![row],
        };
        assert_eq!(snap.to_csv(), "Statement,Tarantula\nx,\n");
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(2.0 / 3.0), "0.666667");
        assert_eq!(format_score(f64::INFINITY), "Infinity");
        assert_eq!(format_score(-0.5), "-0.500000");
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_write_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/report.md");
        let mut r = ranker();
        r.calculate_all();
        ReportSnapshot::build(&r, &store(), None)
            .write(&path, ReportFormat::Markdown)
            .unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("| Statement |"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("html".parse::<ReportFormat>().is_err());
        assert_eq!(ReportFormat::Markdown.extension(), "md");
    }
}
