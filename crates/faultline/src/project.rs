//! Target package bookkeeping.
//!
//! Instrumented sources call into `faultline_probe`, so the target's manifest
//! must depend on it before its tests can build.

use crate::result::{FaultlineError, FaultlineResult};
use crate::syntax::write_atomic;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Package name of the probe runtime
pub const PROBE_PACKAGE: &str = "faultline-probe";

/// Add `faultline-probe = { path = ".." }` to the manifest's `[dependencies]`
/// unless it is already there.
///
/// Only the inserted line changes; the rest of the manifest is kept byte for
/// byte. Returns whether the manifest was modified. A missing manifest or
/// probe crate is logged and leaves everything unchanged.
pub fn ensure_probe_dependency(manifest: &Path, probe_crate: &Path) -> FaultlineResult<bool> {
    if !manifest.is_file() {
        warn!(path = %manifest.display(), "manifest not found, probe dependency not added");
        return Ok(false);
    }
    if !probe_crate.join("Cargo.toml").is_file() {
        warn!(path = %probe_crate.display(), "probe crate not found, dependency not added");
        return Ok(false);
    }
    let text = fs::read_to_string(manifest).map_err(|e| FaultlineError::io(manifest, e))?;
    if has_probe_dependency(&text)? {
        return Ok(false);
    }
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let rel = relative_path(&absolute(base), &absolute(probe_crate));
    let updated = insert_dependency(&text, &rel);
    write_atomic(manifest, &updated)?;
    info!(manifest = %manifest.display(), path = %rel, "added probe dependency");
    Ok(true)
}

/// Whether the manifest text already declares the probe dependency
pub fn has_probe_dependency(manifest_text: &str) -> FaultlineResult<bool> {
    let table: toml::Table = manifest_text
        .parse()
        .map_err(|e| FaultlineError::config(format!("invalid Cargo.toml: {e}")))?;
    Ok(table
        .get("dependencies")
        .and_then(toml::Value::as_table)
        .is_some_and(|deps| deps.contains_key(PROBE_PACKAGE)))
}

/// Insert the dependency line as the first entry of `[dependencies]`,
/// appending the table when the manifest has none
#[must_use]
pub fn insert_dependency(manifest_text: &str, probe_path: &str) -> String {
    let newline = if manifest_text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    };
    let entry = format!(
        "{PROBE_PACKAGE} = {{ path = \"{}\" }}",
        probe_path.replace('\\', "/").replace('"', "\\\"")
    );

    let mut offset = 0;
    for line in manifest_text.split_inclusive('\n') {
        offset += line.len();
        if line.trim() == "[dependencies]" {
            let mut out = String::with_capacity(manifest_text.len() + entry.len() + 2);
            out.push_str(&manifest_text[..offset]);
            if !line.ends_with('\n') {
                out.push_str(newline);
            }
            out.push_str(&entry);
            out.push_str(newline);
            out.push_str(&manifest_text[offset..]);
            return out;
        }
    }

    let mut out = manifest_text.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(newline);
    }
    out.push_str(newline);
    out.push_str("[dependencies]");
    out.push_str(newline);
    out.push_str(&entry);
    out.push_str(newline);
    out
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `to` expressed relative to `from`, `/` separated
#[must_use]
pub fn relative_path(from: &Path, to: &Path) -> String {
    let from_parts: Vec<Component<'_>> = from.components().collect();
    let to_parts: Vec<Component<'_>> = to.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    // different roots (another drive): no relative form exists
    if common == 0 && from.has_root() {
        return to.to_string_lossy().replace('\\', "/");
    }
    let mut parts: Vec<String> = from_parts[common..]
        .iter()
        .map(|_| "..".to_string())
        .collect();
    parts.extend(
        to_parts[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().to_string()),
    );
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "[package]\nname = \"calc\"\nversion = \"0.1.0\"\n\n# deps\n[dependencies]\nserde = \"1\"\n\n[dev-dependencies]\nproptest = \"1\"\n";

    #[test]
    fn test_insert_first_in_dependencies() {
        let out = insert_dependency(MANIFEST, "../faultline-probe");
        assert_eq!(
            out,
            MANIFEST.replace(
                "[dependencies]\n",
                "[dependencies]\nfaultline-probe = { path = \"../faultline-probe\" }\n"
            )
        );
        assert!(has_probe_dependency(&out).unwrap());
    }

    #[test]
    fn test_insert_creates_table() {
        let out = insert_dependency("[package]\nname = \"x\"", "p");
        assert_eq!(
            out,
            "[package]\nname = \"x\"\n\n[dependencies]\nfaultline-probe = { path = \"p\" }\n"
        );
    }

    #[test]
    fn test_insert_keeps_crlf() {
        let out = insert_dependency("[dependencies]\r\nserde = \"1\"\r\n", "p");
        assert_eq!(
            out,
            "[dependencies]\r\nfaultline-probe = { path = \"p\" }\r\nserde = \"1\"\r\n"
        );
    }

    #[test]
    fn test_detects_existing_dependency() {
        assert!(!has_probe_dependency(MANIFEST).unwrap());
        assert!(has_probe_dependency("[dependencies]\nfaultline-probe = \"1\"\n").unwrap());
        assert!(has_probe_dependency("not = [toml").is_err());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/w/app"), Path::new("/w/tools/probe")),
            "../tools/probe"
        );
        assert_eq!(relative_path(Path::new("/w"), Path::new("/w/p")), "p");
        assert_eq!(relative_path(Path::new("/w"), Path::new("/w")), ".");
    }

    #[test]
    fn test_ensure_probe_dependency_once() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        let probe = dir.path().join("probe");
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(&probe).unwrap();
        fs::write(probe.join("Cargo.toml"), "[package]\nname = \"faultline-probe\"\n").unwrap();
        let manifest = app.join("Cargo.toml");
        fs::write(&manifest, MANIFEST).unwrap();

        assert!(ensure_probe_dependency(&manifest, &probe).unwrap());
        assert!(!ensure_probe_dependency(&manifest, &probe).unwrap());

        let text = fs::read_to_string(&manifest).unwrap();
        assert!(text.contains("faultline-probe = { path = \"../probe\" }"));
        assert_eq!(text.matches("faultline-probe").count(), 1);
    }

    #[test]
    fn test_missing_inputs_are_noops() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("Cargo.toml");
        assert!(!ensure_probe_dependency(&manifest, dir.path()).unwrap());

        fs::write(&manifest, MANIFEST).unwrap();
        assert!(!ensure_probe_dependency(&manifest, &dir.path().join("nope")).unwrap());
        assert_eq!(fs::read_to_string(&manifest).unwrap(), MANIFEST);
    }
}
