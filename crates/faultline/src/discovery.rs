//! Test discovery.
//!
//! Tests are found syntactically: any function carrying one of the configured
//! marker attributes is a test, unless it is also `#[ignore]`d. The marker
//! list is data, so `#[tokio::test]`, `#[rstest]` or in-house macros are a
//! configuration change rather than a code change.

use crate::instrument::is_cfg_test;
use crate::result::{FaultlineError, FaultlineResult};
use crate::walk::find_rust_sources;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use syn::ext::IdentExt;
use syn::visit::{self, Visit};
use tracing::{debug, warn};

/// Markers recognized when none are configured
pub const DEFAULT_TEST_MARKERS: [&str; 3] = ["test", "tokio::test", "async_std::test"];

/// Which cargo test target a test is compiled into
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestTarget {
    /// Unit tests inside the package's own sources
    Unit,
    /// Integration test binary under `tests/`
    Integration(String),
}

/// A single runnable test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Path of the test function inside its target, `module::name`
    pub name: String,
    /// Target the test lives in
    pub target: TestTarget,
    /// File the test was found in
    pub source: PathBuf,
}

impl TestCase {
    /// Create a test case
    #[must_use]
    pub fn new(name: impl Into<String>, target: TestTarget, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            target,
            source: source.into(),
        }
    }

    /// Stable id, unique across targets: `name` for unit tests,
    /// `binary::name` for integration tests
    #[must_use]
    pub fn id(&self) -> String {
        match &self.target {
            TestTarget::Unit => self.name.clone(),
            TestTarget::Integration(bin) => format!("{bin}::{}", self.name),
        }
    }
}

/// Finds tests by attribute markers
#[derive(Debug, Clone)]
pub struct TestDiscovery {
    markers: Vec<String>,
    filters: Vec<String>,
}

impl Default for TestDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_MARKERS)
    }
}

impl TestDiscovery {
    /// Discovery recognizing `markers` (`test`, `tokio::test`, ...)
    #[must_use]
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
        }
    }

    /// Keep only tests whose id contains one of `filters`
    #[must_use]
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Markers in use
    #[must_use]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    fn is_marker(&self, attr: &syn::Attribute) -> bool {
        let segments: Vec<String> = attr
            .path()
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect();
        let full = segments.join("::");
        self.markers
            .iter()
            .any(|m| *m == full || (!m.contains("::") && segments.len() == 1 && segments[0] == *m))
    }

    fn selected(&self, test: &TestCase) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let id = test.id();
        self.filters.iter().any(|f| id.contains(f.as_str()))
    }

    /// Tests declared in one source text
    pub fn discover_in_source(
        &self,
        source: &str,
        module_path: &[String],
        target: &TestTarget,
        file: &Path,
    ) -> FaultlineResult<Vec<TestCase>> {
        let parsed = syn::parse_file(source)
            .map_err(|e| FaultlineError::parse(file.display().to_string(), e.to_string()))?;
        let mut finder = TestFinder {
            discovery: self,
            modules: module_path.to_vec(),
            names: Vec::new(),
        };
        finder.visit_file(&parsed);
        Ok(finder
            .names
            .into_iter()
            .map(|name| TestCase::new(name, target.clone(), file))
            .filter(|t| self.selected(t))
            .collect())
    }

    /// Unit tests in the package sources under `src_dir`
    pub fn discover_unit(&self, src_dir: &Path, excludes: &[String]) -> Vec<TestCase> {
        let mut tests = Vec::new();
        for file in find_rust_sources(src_dir, excludes) {
            let modules = module_path(src_dir, &file);
            tests.extend(self.discover_file(&file, &modules, &TestTarget::Unit));
        }
        tests
    }

    /// Integration tests under `tests_dir`
    pub fn discover_integration(&self, tests_dir: &Path, excludes: &[String]) -> Vec<TestCase> {
        let mut tests = Vec::new();
        for file in find_rust_sources(tests_dir, excludes) {
            let Ok(rel) = file.strip_prefix(tests_dir) else {
                continue;
            };
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let (binary, modules) = match parts.as_slice() {
                [single] => (single.trim_end_matches(".rs").to_string(), Vec::new()),
                [dir, ..] => (dir.clone(), module_path(&tests_dir.join(dir), &file)),
                [] => continue,
            };
            tests.extend(self.discover_file(&file, &modules, &TestTarget::Integration(binary)));
        }
        tests
    }

    /// Unit tests of every source directory plus integration tests, sorted by id
    pub fn discover(
        &self,
        project: &Path,
        source_dirs: &[PathBuf],
        tests_dir: &Path,
        excludes: &[String],
    ) -> Vec<TestCase> {
        let mut tests = Vec::new();
        for dir in source_dirs {
            tests.extend(self.discover_unit(&project.join(dir), excludes));
        }
        tests.extend(self.discover_integration(&project.join(tests_dir), excludes));
        for (kept, dropped) in dedup_by_id(&mut tests) {
            warn!(
                id = %kept.id(),
                kept = %kept.source.display(),
                skipped = %dropped.source.display(),
                "two tests share an id, running only the first"
            );
        }
        debug!(count = tests.len(), "discovered tests");
        tests
    }

    fn discover_file(&self, file: &Path, modules: &[String], target: &TestTarget) -> Vec<TestCase> {
        let source = match fs::read_to_string(file) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "cannot read test source");
                return Vec::new();
            }
        };
        self.discover_in_source(&source, modules, target, file)
            .unwrap_or_else(|e| {
                warn!(error = %e, "skipping unparsable test source");
                Vec::new()
            })
    }
}

/// Sort by id and drop repeated ids, unit tests first. Returns the
/// `(kept, dropped)` pairs of distinct tests that collided; the same test
/// found twice is dropped silently.
fn dedup_by_id(tests: &mut Vec<TestCase>) -> Vec<(TestCase, TestCase)> {
    tests.sort_by(|a, b| a.id().cmp(&b.id()).then_with(|| a.target.cmp(&b.target)));
    let mut kept: Vec<TestCase> = Vec::with_capacity(tests.len());
    let mut collisions = Vec::new();
    for test in tests.drain(..) {
        match kept.last() {
            Some(last) if last.id() == test.id() => {
                if *last != test {
                    collisions.push((last.clone(), test));
                }
            }
            _ => kept.push(test),
        }
    }
    *tests = kept;
    collisions
}

struct TestFinder<'d> {
    discovery: &'d TestDiscovery,
    modules: Vec<String>,
    names: Vec<String>,
}

impl<'ast> Visit<'ast> for TestFinder<'_> {
    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        if node.content.is_some() {
            self.modules.push(node.ident.to_string());
            visit::visit_item_mod(self, node);
            self.modules.pop();
        }
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        let marked = node.attrs.iter().any(|a| self.discovery.is_marker(a));
        let ignored = node.attrs.iter().any(|a| a.path().is_ident("ignore"));
        if marked && !ignored {
            let mut path = self.modules.clone();
            path.push(node.sig.ident.to_string());
            self.names.push(path.join("::"));
        }
    }
}

/// Files holding out-of-line `#[cfg(test)] mod name;` modules.
///
/// Such a file is test code although nothing inside it says so; only the
/// declaration in its parent does. `#[path]` is honored, and files of the
/// test module's own submodules count as test code too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestModuleFiles {
    files: BTreeSet<PathBuf>,
    dirs: BTreeSet<PathBuf>,
}

impl TestModuleFiles {
    /// Collect the test modules declared by `sources`. Unreadable or
    /// unparsable sources declare nothing.
    #[must_use]
    pub fn scan(sources: &[PathBuf]) -> Self {
        let mut found = Self::default();
        for file in sources {
            let parsed = match fs::read_to_string(file) {
                Ok(text) => syn::parse_file(&text).ok(),
                Err(_) => None,
            };
            let Some(parsed) = parsed else {
                debug!(path = %file.display(), "module declarations not scanned");
                continue;
            };
            let mut scanner = ModuleScanner {
                file_dir: file.parent().map(Path::to_path_buf).unwrap_or_default(),
                dirs: vec![child_module_dir(file)],
                found: &mut found,
            };
            scanner.visit_file(&parsed);
        }
        found
    }

    /// Whether `file` belongs to a test module
    #[must_use]
    pub fn contains(&self, file: &Path) -> bool {
        let file = normalize(file);
        self.files.contains(&file) || self.dirs.iter().any(|d| file.starts_with(d))
    }

    /// Number of declared test module files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no test module file was declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn insert(&mut self, file: PathBuf) {
        self.dirs.insert(child_module_dir(&file));
        self.files.insert(file);
    }
}

struct ModuleScanner<'f> {
    file_dir: PathBuf,
    dirs: Vec<PathBuf>,
    found: &'f mut TestModuleFiles,
}

impl ModuleScanner<'_> {
    fn current(&self) -> &Path {
        self.dirs.last().map_or(self.file_dir.as_path(), PathBuf::as_path)
    }

    fn resolve(&self, node: &syn::ItemMod) -> Option<PathBuf> {
        if let Some(custom) = path_attr(&node.attrs) {
            // outside inline modules `#[path]` is relative to the file itself
            let base = if self.dirs.len() == 1 {
                self.file_dir.as_path()
            } else {
                self.current()
            };
            return Some(normalize(&base.join(custom)));
        }
        let name = node.ident.unraw().to_string();
        let dir = self.current();
        [dir.join(format!("{name}.rs")), dir.join(&name).join("mod.rs")]
            .into_iter()
            .find(|p| p.is_file())
            .map(|p| normalize(&p))
    }
}

impl<'ast> Visit<'ast> for ModuleScanner<'_> {
    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        if is_cfg_test(&node.attrs) {
            if node.content.is_none() {
                if let Some(file) = self.resolve(node) {
                    debug!(path = %file.display(), "out-of-line test module");
                    self.found.insert(file);
                }
            }
            return;
        }
        if node.content.is_some() {
            let segment = path_attr(&node.attrs).unwrap_or_else(|| node.ident.unraw().to_string());
            let dir = self.current().join(segment);
            self.dirs.push(dir);
            visit::visit_item_mod(self, node);
            self.dirs.pop();
        }
    }
}

fn path_attr(attrs: &[syn::Attribute]) -> Option<String> {
    let attr = attrs.iter().find(|a| a.path().is_ident("path"))?;
    match &attr.meta {
        syn::Meta::NameValue(syn::MetaNameValue {
            value:
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }),
            ..
        }) => Some(s.value()),
        _ => None,
    }
}

/// Directory holding the files of `file`'s submodules
fn child_module_dir(file: &Path) -> PathBuf {
    let parent = file.parent().unwrap_or_else(|| Path::new(""));
    match file.file_stem().and_then(|s| s.to_str()) {
        Some("lib" | "main" | "mod") | None => parent.to_path_buf(),
        Some(stem) => parent.join(stem),
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Module path of a file relative to its crate root directory.
///
/// `lib.rs`, `main.rs` and `mod.rs` contribute no segment of their own.
#[must_use]
pub fn module_path(root: &Path, file: &Path) -> Vec<String> {
    let Ok(rel) = file.strip_prefix(root) else {
        return Vec::new();
    };
    let mut parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if let Some(last) = parts.pop() {
        let stem = last.trim_end_matches(".rs");
        let at_root = parts.is_empty();
        let implicit = stem == "mod" || (at_root && (stem == "lib" || stem == "main"));
        if !implicit {
            parts.push(stem.to_string());
        }
    }
    parts
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SRC: &str = r#"
pub fn add(a: i32, b: i32) -> i32 { a + b }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds() { assert_eq!(add(1, 2), 3); }

    #[test]
    #[ignore]
    fn slow() {}

    #[tokio::test]
    async fn async_adds() {}

    #[rstest]
    fn parameterized() {}

    fn helper() {}

    mod nested {
        #[test]
        fn deep() {}
    }
}
"#;

    #[test]
    fn test_default_markers() {
        let tests = TestDiscovery::default()
            .discover_in_source(SRC, &[], &TestTarget::Unit, Path::new("lib.rs"))
            .unwrap();
        let names: Vec<_> = tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["tests::adds", "tests::async_adds", "tests::nested::deep"]);
    }

    #[test]
    fn test_custom_markers() {
        let discovery = TestDiscovery::new(["rstest"]);
        let tests = discovery
            .discover_in_source(SRC, &[], &TestTarget::Unit, Path::new("lib.rs"))
            .unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "tests::parameterized");
    }

    #[test]
    fn test_last_segment_marker_needs_plain_path() {
        let discovery = TestDiscovery::new(["test"]);
        let tests = discovery
            .discover_in_source(SRC, &[], &TestTarget::Unit, Path::new("lib.rs"))
            .unwrap();
        assert!(tests.iter().all(|t| t.name != "tests::async_adds"));
    }

    #[test]
    fn test_filters() {
        let tests = TestDiscovery::default()
            .with_filters(["deep"])
            .discover_in_source(SRC, &[], &TestTarget::Unit, Path::new("lib.rs"))
            .unwrap();
        assert_eq!(tests.len(), 1);
    }

    #[test]
    fn test_unparsable_source() {
        let err = TestDiscovery::default()
            .discover_in_source("fn (", &[], &TestTarget::Unit, Path::new("x.rs"))
            .unwrap_err();
        assert!(matches!(err, FaultlineError::Parse { .. }));
    }

    #[test]
    fn test_ids() {
        let unit = TestCase::new("ops::tests::adds", TestTarget::Unit, "src/ops.rs");
        let integ = TestCase::new(
            "adds",
            TestTarget::Integration("arith".to_string()),
            "tests/arith.rs",
        );
        assert_eq!(unit.id(), "ops::tests::adds");
        assert_eq!(integ.id(), "arith::adds");
    }

    #[test]
    fn test_module_path() {
        let root = Path::new("/p/src");
        assert!(module_path(root, Path::new("/p/src/lib.rs")).is_empty());
        assert_eq!(module_path(root, Path::new("/p/src/ops.rs")), vec!["ops"]);
        assert_eq!(module_path(root, Path::new("/p/src/ops/mod.rs")), vec!["ops"]);
        assert_eq!(module_path(root, Path::new("/p/src/a/b.rs")), vec!["a", "b"]);
        assert_eq!(module_path(root, Path::new("/p/src/bin/main.rs")), vec!["bin", "main"]);
    }

    #[test]
    fn test_discover_project_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("tests/suite")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub mod ops;\n").unwrap();
        fs::write(
            root.join("src/ops.rs"),
            "#[cfg(test)] mod tests { #[test] fn unit() {} }\n",
        )
        .unwrap();
        fs::write(root.join("tests/arith.rs"), "#[test] fn adds() {}\n").unwrap();
        fs::write(root.join("tests/suite/main.rs"), "mod more;\n#[test] fn top() {}\n").unwrap();
        fs::write(root.join("tests/suite/more.rs"), "#[test] fn inner() {}\n").unwrap();

        let tests = TestDiscovery::default().discover(
            root,
            &[PathBuf::from("src")],
            Path::new("tests"),
            &[],
        );

        let ids: Vec<String> = tests.iter().map(TestCase::id).collect();
        assert_eq!(
            ids,
            vec!["arith::adds", "ops::tests::unit", "suite::more::inner", "suite::top"]
        );
        assert_eq!(tests[0].target, TestTarget::Integration("arith".to_string()));
    }

    #[test]
    fn test_colliding_ids_keep_unit_test() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub mod calc;\n").unwrap();
        let nested = "#[cfg(test)] mod tests { #[test] fn adds() {} }\n";
        fs::write(root.join("src/calc.rs"), nested).unwrap();
        fs::write(root.join("tests/calc.rs"), nested).unwrap();

        let tests = TestDiscovery::default().discover(
            root,
            &[PathBuf::from("src")],
            Path::new("tests"),
            &[],
        );

        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].id(), "calc::tests::adds");
        assert_eq!(tests[0].target, TestTarget::Unit);
    }

    #[test]
    fn test_dedup_reports_only_distinct_tests() {
        let unit = TestCase::new("calc::tests::adds", TestTarget::Unit, "src/calc.rs");
        let integ = TestCase::new(
            "tests::adds",
            TestTarget::Integration("calc".to_string()),
            "tests/calc.rs",
        );
        let mut tests = vec![integ.clone(), unit.clone(), unit.clone()];

        let collisions = dedup_by_id(&mut tests);

        assert_eq!(tests, vec![unit.clone()]);
        assert_eq!(collisions, vec![(unit, integ)]);
    }

    #[test]
    fn test_out_of_line_test_modules() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("ops/tests")).unwrap();
        fs::create_dir_all(src.join("ops/inner")).unwrap();
        fs::create_dir_all(src.join("testing")).unwrap();
        fs::write(
            src.join("lib.rs"),
            "pub mod ops;\n#[cfg(test)]\nmod tests;\n#[cfg(test)]\n#[path = \"testing/support.rs\"]\nmod support;\n",
        )
        .unwrap();
        fs::write(src.join("tests.rs"), "#[test] fn adds() {}\n").unwrap();
        fs::write(src.join("testing/support.rs"), "pub fn fixture() {}\n").unwrap();
        fs::write(
            src.join("ops.rs"),
            "pub fn neg(x: i32) -> i32 { -x }\n#[cfg(test)]\nmod tests;\nmod inner { #[cfg(test)] mod checks; }\n",
        )
        .unwrap();
        fs::write(src.join("ops/tests/mod.rs"), "mod helpers;\n#[test] fn negs() {}\n").unwrap();
        fs::write(src.join("ops/tests/helpers.rs"), "pub fn h() {}\n").unwrap();
        fs::write(src.join("ops/inner/checks.rs"), "#[test] fn c() {}\n").unwrap();
        let sources = find_rust_sources(&src, &[]);

        let tests = TestModuleFiles::scan(&sources);

        let production: Vec<PathBuf> = sources
            .iter()
            .filter(|f| !tests.contains(f))
            .map(|f| f.strip_prefix(&src).unwrap().to_path_buf())
            .collect();
        assert_eq!(production, vec![PathBuf::from("lib.rs"), PathBuf::from("ops.rs")]);
        assert_eq!(tests.len(), 4);
    }

    #[test]
    fn test_inline_test_module_declares_no_file() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.rs");
        fs::write(&lib, "#[cfg(test)] mod tests { mod helpers; }\n").unwrap();
        fs::write(dir.path().join("helpers.rs"), "").unwrap();

        let tests = TestModuleFiles::scan(&[lib.clone()]);

        assert!(tests.is_empty());
        assert!(!tests.contains(&lib));
    }
}
