//! Lossless syntax tree adapter.
//!
//! `syn` gives us structure; `proc-macro2` span locations give us line and
//! column for every node. [`SourceTree`] maps those back to byte offsets in
//! the original text so that rewrites are expressed as [`TextEdit`]s and every
//! byte outside an edit (comments, blank lines, formatting) survives untouched.

use crate::result::{FaultlineError, FaultlineResult};
use proc_macro2::{LineColumn, Span};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use syn::spanned::Spanned;

const BOM: &str = "\u{feff}";

/// Parsed source text with byte-accurate node ranges
pub struct SourceTree {
    text: String,
    file: syn::File,
    line_starts: Vec<usize>,
}

impl std::fmt::Debug for SourceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceTree")
            .field("bytes", &self.text.len())
            .field("lines", &self.line_starts.len())
            .field("items", &self.file.items.len())
            .finish()
    }
}

impl SourceTree {
    /// Parse source text
    pub fn parse(text: impl Into<String>) -> FaultlineResult<Self> {
        Self::parse_labeled(text, "<source>")
    }

    /// Parse source text, naming `label` in any parse error
    pub fn parse_labeled(text: impl Into<String>, label: &str) -> FaultlineResult<Self> {
        let text = text.into();
        let masked = mask_preamble(&text);
        let file = syn::parse_str::<syn::File>(masked.as_deref().unwrap_or(&text))
            .map_err(|e| {
                let at = e.span().start();
                FaultlineError::parse(label, format!("{e} at {}:{}", at.line, at.column + 1))
            })?;
        let line_starts = line_starts(&text);
        Ok(Self {
            text,
            file,
            line_starts,
        })
    }

    /// Original text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Syntax tree
    #[must_use]
    pub const fn file(&self) -> &syn::File {
        &self.file
    }

    /// Byte range covered by a node, attributes included
    #[must_use]
    pub fn range_of<T: Spanned + ?Sized>(&self, node: &T) -> Range<usize> {
        self.span_range(node.span())
    }

    /// Byte range of a span
    #[must_use]
    pub fn span_range(&self, span: Span) -> Range<usize> {
        let start = self.offset(span.start());
        let end = self.offset(span.end()).max(start);
        start..end
    }

    /// Byte offset of a line/column position (column counted in chars)
    #[must_use]
    pub fn offset(&self, at: LineColumn) -> usize {
        let Some(&line_start) = at.line.checked_sub(1).and_then(|i| self.line_starts.get(i))
        else {
            return self.text.len();
        };
        self.text[line_start..]
            .char_indices()
            .nth(at.column)
            .map_or(self.text.len(), |(i, _)| line_start + i)
    }

    /// Offset of the first byte of the line containing `offset`
    #[must_use]
    pub fn line_start(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(i) => self.line_starts[i],
            Err(i) => self.line_starts[i.saturating_sub(1)],
        }
    }

    /// Offset just past the `\n` ending the line containing `offset`, or the
    /// end of the text on the last line
    #[must_use]
    pub fn line_end(&self, offset: usize) -> usize {
        self.text[offset..]
            .find('\n')
            .map_or(self.text.len(), |i| offset + i + 1)
    }
}

/// Syn refuses a leading BOM and shebang in `parse_str`; blank them out with
/// filler of the same char width so line/column positions match the original.
fn mask_preamble(text: &str) -> Option<String> {
    let (bom, rest) = match text.strip_prefix(BOM) {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let shebang = rest.starts_with("#!") && !rest[2..].trim_start().starts_with('[');
    if !bom && !shebang {
        return None;
    }
    let mut masked = String::with_capacity(text.len());
    if bom {
        masked.push(' ');
    }
    if shebang {
        masked.push_str("//");
        masked.push_str(&rest[2..]);
    } else {
        masked.push_str(rest);
    }
    Some(masked)
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Replacement of a byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Range being replaced (empty for an insertion)
    pub range: Range<usize>,
    /// Replacement text
    pub replacement: String,
}

impl TextEdit {
    /// Insert `text` at `offset`
    #[must_use]
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self {
            range: offset..offset,
            replacement: text.into(),
        }
    }

    /// Replace `range` with `text`
    #[must_use]
    pub fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            replacement: text.into(),
        }
    }

    /// Delete `range`
    #[must_use]
    pub fn delete(range: Range<usize>) -> Self {
        Self {
            range,
            replacement: String::new(),
        }
    }
}

/// Apply non-overlapping edits to `text`.
///
/// Edits are applied in offset order; insertions at the same offset keep
/// their relative order. An edit overlapping an earlier one is dropped.
#[must_use]
pub fn apply_edits(text: &str, mut edits: Vec<TextEdit>) -> String {
    edits.sort_by_key(|e| (e.range.start, e.range.end));
    let added: usize = edits.iter().map(|e| e.replacement.len()).sum();
    let mut out = String::with_capacity(text.len() + added);
    let mut cursor = 0;
    for edit in edits {
        if edit.range.start < cursor || edit.range.end > text.len() {
            tracing::warn!(range = ?edit.range, "dropping overlapping edit");
            continue;
        }
        out.push_str(&text[cursor..edit.range.start]);
        out.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Result of [`apply_edit`]
#[derive(Debug)]
pub struct EditOutcome {
    /// Whether the file content changed
    pub changed: bool,
    /// Fresh tree of the file as it is now on disk
    pub tree: SourceTree,
}

/// Read, parse, edit, re-parse and atomically write one file.
///
/// `edit` receives a freshly parsed tree and returns the new text. The new
/// text must parse; otherwise nothing is written. The returned tree is parsed
/// from what was written, so a follow-up edit never works on stale ranges.
pub fn apply_edit<F>(path: &Path, edit: F) -> FaultlineResult<EditOutcome>
where
    F: FnOnce(&SourceTree) -> FaultlineResult<String>,
{
    let label = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| FaultlineError::io(path, e))?;
    let tree = SourceTree::parse_labeled(text, &label)?;
    let new_text = edit(&tree)?;
    if new_text == tree.text() {
        return Ok(EditOutcome {
            changed: false,
            tree,
        });
    }
    let new_tree = SourceTree::parse_labeled(new_text, &label)?;
    write_atomic(path, new_tree.text())?;
    Ok(EditOutcome {
        changed: true,
        tree: new_tree,
    })
}

/// Write through a sibling temp file and rename over the target
pub fn write_atomic(path: &Path, contents: &str) -> FaultlineResult<()> {
    let tmp = sibling_temp_path(path);
    fs::write(&tmp, contents).map_err(|e| FaultlineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FaultlineError::io(path, e)
    })
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().to_string());
    path.with_file_name(format!(".{name}.faultline-tmp"))
}
