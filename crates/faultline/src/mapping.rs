//! Persistent probe id -> function mapping.
//!
//! The table is a plain `id,methodName,sourceFile` file. It is opened once
//! per run, shared by reference, and written through on every change so a
//! crash mid-instrumentation loses nothing already reported as added.

use crate::result::{FaultlineError, FaultlineResult};
use crate::syntax::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default mapping file name inside the work directory
pub const DEFAULT_MAPPING_FILE: &str = "probe_map.csv";

/// One probe and the function it was injected into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Probe id (UUID v4)
    pub id: String,
    /// Qualified name of the owning function, `module::Type::function`
    pub method: String,
    /// File name the function lives in
    pub source_file: Option<String>,
}

impl ProbeRecord {
    /// Create a record; fields are trimmed and an empty file becomes `None`
    #[must_use]
    pub fn new(id: &str, method: &str, source_file: Option<&str>) -> Self {
        Self {
            id: id.trim().to_string(),
            method: method.trim().to_string(),
            source_file: source_file
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        }
    }

    /// `(file) qualified::name`, or just the name without a file
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.source_file {
            Some(file) => format!("({file}) {}", self.method),
            None => self.method.clone(),
        }
    }

    fn to_row(&self) -> String {
        format!(
            "{},{},{}",
            self.id,
            self.method,
            self.source_file.as_deref().unwrap_or_default()
        )
    }

    fn from_row(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ',');
        let id = parts.next()?.trim();
        let method = parts.next()?.trim();
        if id.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::new(id, method, parts.next()))
    }
}

/// Probe mapping table with write-through persistence
#[derive(Debug)]
pub struct ProbeMappingStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, ProbeRecord>>,
}

impl ProbeMappingStore {
    /// Open (or start) the table stored at `path`
    pub fn open(path: impl Into<PathBuf>) -> FaultlineResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .filter_map(ProbeRecord::from_row)
                .map(|r| (r.id.clone(), r))
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(FaultlineError::io(&path, e)),
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened probe mapping store");
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// A table that never touches disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProbeRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one mapping. Returns `false` when an identical entry already
    /// existed (nothing is written).
    pub fn add_mapping(
        &self,
        id: &str,
        method: &str,
        source_file: Option<&str>,
    ) -> FaultlineResult<bool> {
        Ok(self.add_mappings([ProbeRecord::new(id, method, source_file)])? > 0)
    }

    /// Record a batch, persisting once. Returns how many entries changed.
    pub fn add_mappings(
        &self,
        records: impl IntoIterator<Item = ProbeRecord>,
    ) -> FaultlineResult<usize> {
        let mut entries = self.lock();
        let mut changed = 0;
        for record in records {
            if record.id.is_empty() || record.method.is_empty() {
                continue;
            }
            if entries.get(&record.id) == Some(&record) {
                continue;
            }
            entries.insert(record.id.clone(), record);
            changed += 1;
        }
        if changed > 0 {
            self.persist(&entries)?;
        }
        Ok(changed)
    }

    /// Full record for a probe
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ProbeRecord> {
        self.lock().get(id.trim()).cloned()
    }

    /// Display string for a probe
    #[must_use]
    pub fn display_name(&self, id: &str) -> Option<String> {
        self.lock().get(id.trim()).map(ProbeRecord::display_name)
    }

    /// Every probe id mapped to its display string
    #[must_use]
    pub fn mappings(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(id, r)| (id.clone(), r.display_name()))
            .collect()
    }

    /// Number of mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every mapping and delete the backing file
    pub fn clear(&self) -> FaultlineResult<()> {
        let mut entries = self.lock();
        entries.clear();
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(FaultlineError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Write the current table to disk
    pub fn flush(&self) -> FaultlineResult<()> {
        let entries = self.lock();
        self.persist(&entries)
    }

    /// Flush and release the store
    pub fn close(self) -> FaultlineResult<()> {
        self.flush()
    }

    fn persist(&self, entries: &BTreeMap<String, ProbeRecord>) -> FaultlineResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| FaultlineError::io(parent, e))?;
        }
        let mut text = String::new();
        for record in entries.values() {
            text.push_str(&record.to_row());
            text.push('\n');
        }
        write_atomic(path, &text)
    }
}
