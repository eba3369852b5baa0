//! Source file enumeration

use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};

/// Directories never descended into
const SKIPPED_DIRS: [&str; 3] = ["target", "node_modules", "coverage"];

/// All `.rs` files under `dir`, sorted, skipping hidden and build directories
/// and any path matching one of the `excludes` glob patterns.
#[must_use]
pub fn find_rust_sources(dir: &Path, excludes: &[String]) -> Vec<PathBuf> {
    let patterns: Vec<Pattern> = excludes
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "ignoring invalid exclude pattern");
                None
            }
        })
        .collect();
    let mut files = Vec::new();
    scan_recursive(dir, dir, &patterns, &mut files);
    files.sort();
    files
}

fn scan_recursive(root: &Path, dir: &Path, excludes: &[Pattern], out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let rel = path.strip_prefix(root).unwrap_or(&path);
        if excludes.iter().any(|p| p.matches_path(rel) || p.matches_path(&path)) {
            continue;
        }
        if path.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            scan_recursive(root, &path, excludes, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}
