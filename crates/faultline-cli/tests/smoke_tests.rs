//! Smoke tests for the faultline CLI
//!
//! These tests verify basic CLI functionality works correctly.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin until assert_cmd is updated
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const LIB: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn adds() {\n        assert_eq!(super::add(1, 2), 3);\n    }\n}\n";

/// Get a command for the faultline binary
fn faultline() -> Command {
    Command::cargo_bin("faultline").expect("faultline binary should exist")
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn project(lib: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "Cargo.toml", "[package]\nname = \"calc\"\nversion = \"0.1.0\"\n");
    write(dir.path(), "src/lib.rs", lib);
    dir
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    faultline()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_flag() {
    faultline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fault localization"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("reset"));
}

#[test]
fn test_no_args_fails() {
    faultline().assert().failure(); // Requires a subcommand
}

// ============================================================================
// Subcommand Help Tests
// ============================================================================

#[test]
fn test_run_subcommand_help() {
    faultline()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--format"));
}

#[test]
fn test_instrument_method_requires_file() {
    faultline()
        .args(["instrument", "--method", "add"])
        .assert()
        .failure();
}

#[test]
fn test_unknown_format_rejected() {
    faultline()
        .args(["rank", "--format", "html"])
        .assert()
        .failure();
}

// ============================================================================
// Project Tests
// ============================================================================

#[test]
fn test_list_prints_tests() {
    let dir = project(LIB);
    faultline()
        .arg("list")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("tests::adds  (unit)"));
}

#[test]
fn test_run_without_tests_fails() {
    let lib = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
    let dir = project(lib);
    faultline()
        .arg("run")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No tests found"));
    assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), lib);
}

#[test]
fn test_instrument_then_reset() {
    let dir = project(LIB);
    faultline()
        .args(["--quiet", "instrument"])
        .arg(dir.path())
        .assert()
        .success();
    let instrumented = fs::read_to_string(dir.path().join("src/lib.rs")).unwrap();
    assert!(instrumented.contains("faultline_probe::log("));

    faultline()
        .args(["--quiet", "reset"])
        .arg(dir.path())
        .assert()
        .success();
    assert_eq!(fs::read_to_string(dir.path().join("src/lib.rs")).unwrap(), LIB);
}

#[test]
fn test_rank_without_previous_run_fails() {
    let dir = project(LIB);
    faultline()
        .arg("rank")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_missing_project_dir() {
    faultline()
        .args(["list", "/nonexistent/faultline/project"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a directory"));
}
