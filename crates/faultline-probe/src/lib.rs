//! Runtime half of faultline.
//!
//! Crates instrumented by `faultline` call [`log`] before every statement:
//!
//! ```text
//! ::faultline_probe::log("/abs/path/current.coverage.tmp", "5c0b4c6e-...");
//! ```
//!
//! Each firing appends the probe id plus a line terminator to the coverage
//! file. Writers are kept open per path and flushed on every write, so a test
//! process that aborts still leaves every fired probe on disk.

#![warn(missing_docs)]

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Appends probe firings to coverage files.
///
/// One writer is opened per distinct path and reused until [`ProbeSink::close`]
/// or drop.
#[derive(Debug, Default)]
pub struct ProbeSink {
    writers: Mutex<HashMap<PathBuf, File>>,
}

impl ProbeSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `probe_id` executed.
    ///
    /// I/O failures are logged and swallowed: a lost firing must not change
    /// the outcome of the test being observed.
    pub fn fire(&self, path: impl AsRef<Path>, probe_id: &str) {
        let path = path.as_ref();
        let line = format!("{probe_id}\n");
        if let Err(e) = self.write(path, line.as_bytes()) {
            tracing::warn!(path = %path.display(), error = %e, "failed to record probe");
        }
    }

    /// Append raw text to `path` (the older probe form carried its own newline).
    pub fn append(&self, path: impl AsRef<Path>, text: &str) {
        let path = path.as_ref();
        if let Err(e) = self.write(path, text.as_bytes()) {
            tracing::warn!(path = %path.display(), error = %e, "failed to append coverage text");
        }
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        if !writers.contains_key(path) {
            let file = open_append(path)?;
            writers.insert(path.to_path_buf(), file);
        }
        match writers.get_mut(path) {
            Some(file) => {
                file.write_all(bytes)?;
                file.flush()
            }
            None => Ok(()),
        }
    }

    /// Number of writers currently open
    #[must_use]
    pub fn open_writers(&self) -> usize {
        self.writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Flush and release every writer. The sink stays usable; later firings
    /// reopen their files.
    pub fn close(&self) {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        for (path, mut file) in writers.drain() {
            if let Err(e) = file.flush() {
                tracing::warn!(path = %path.display(), error = %e, "failed to flush coverage file");
            }
        }
    }
}

impl Drop for ProbeSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

static GLOBAL_SINK: OnceLock<ProbeSink> = OnceLock::new();

/// Process-wide sink used by instrumented code
pub fn global() -> &'static ProbeSink {
    GLOBAL_SINK.get_or_init(ProbeSink::new)
}

/// Fire `probe_id` into `path` through the process-wide sink
pub fn log(path: &str, probe_id: &str) {
    global().fire(path, probe_id);
}

/// Append `text` to `path` through the process-wide sink
pub fn append(path: &str, text: &str) {
    global().append(path, text);
}
