//! Probe statement recognition and synthesis.

use syn::{Expr, ExprCall, Lit, Stmt};

/// Crate instrumented code calls into
pub const PROBE_CRATE: &str = "faultline_probe";
/// Function emitted for every probe
pub const PROBE_FN: &str = "log";
/// Function of the older probe form, still recognized
pub const LEGACY_PROBE_FN: &str = "append";

/// File-name suffixes that mark an older-form call as a probe
const LEGACY_TARGET_SUFFIXES: [&str; 2] = [".coverage", "coverage.tmp"];

/// Which probe form a statement uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeForm {
    /// `::faultline_probe::log(path, id);`
    Current,
    /// `faultline_probe::append(path, text);`
    Legacy,
}

/// A recognized probe statement
#[derive(Debug, Clone, Copy)]
pub struct ProbeCall<'a> {
    /// Form of the call
    pub form: ProbeForm,
    /// Coverage file literal (first argument)
    pub target: &'a syn::LitStr,
    /// Second argument, when it is a plain string literal
    pub payload: Option<&'a syn::LitStr>,
}

impl ProbeCall<'_> {
    /// Probe id carried by the call, if it is a literal
    #[must_use]
    pub fn probe_id(&self) -> Option<String> {
        self.payload.map(|lit| lit.value().trim().to_string())
    }
}

/// Recognize a probe statement.
///
/// Matches an expression statement ending in `;` that calls
/// `faultline_probe::log` (leading `::` optional) with two arguments, the
/// first a string literal; or `faultline_probe::append` whose first literal
/// names a coverage file.
#[must_use]
pub fn recognize(stmt: &Stmt) -> Option<ProbeCall<'_>> {
    let Stmt::Expr(Expr::Call(call), Some(_)) = stmt else {
        return None;
    };
    let form = call_form(call)?;
    if call.args.len() != 2 {
        return None;
    }
    let mut args = call.args.iter();
    let target = string_literal(args.next()?)?;
    let payload = args.next().and_then(string_literal);
    if form == ProbeForm::Legacy && !is_legacy_target(&target.value()) {
        return None;
    }
    Some(ProbeCall {
        form,
        target,
        payload,
    })
}

fn call_form(call: &ExprCall) -> Option<ProbeForm> {
    let Expr::Path(path) = &*call.func else {
        return None;
    };
    if path.qself.is_some() {
        return None;
    }
    let segments: Vec<String> = path
        .path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect();
    match segments.as_slice() {
        [krate, f] if krate == PROBE_CRATE && f == PROBE_FN => Some(ProbeForm::Current),
        [krate, f] if krate == PROBE_CRATE && f == LEGACY_PROBE_FN => Some(ProbeForm::Legacy),
        _ => None,
    }
}

fn string_literal(expr: &Expr) -> Option<&syn::LitStr> {
    match expr {
        Expr::Lit(lit) => match &lit.lit {
            Lit::Str(s) => Some(s),
            _ => None,
        },
        Expr::Paren(inner) => string_literal(&inner.expr),
        Expr::Group(inner) => string_literal(&inner.expr),
        _ => None,
    }
}

fn is_legacy_target(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    LEGACY_TARGET_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Rust string literal for `value`
#[must_use]
pub fn string_literal_text(value: &str) -> String {
    format!("{value:?}")
}

/// Probe statement text for `coverage_file` and `probe_id`
#[must_use]
pub fn render(coverage_file: &str, probe_id: &str) -> String {
    format!(
        "::{PROBE_CRATE}::{PROBE_FN}({}, {});",
        string_literal_text(coverage_file),
        string_literal_text(probe_id)
    )
}

/// Coverage file a method's probes write to when no override is given
#[must_use]
pub fn default_coverage_file(method: &str) -> String {
    format!("{method}.coverage")
}

/// Fresh probe id
#[must_use]
pub fn new_probe_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
