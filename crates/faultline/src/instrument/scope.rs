//! Qualified-name tracking while walking a file.

use syn::{Attribute, Type};

/// Enclosing module and type names, outermost first
#[derive(Debug, Default, Clone)]
pub struct ScopeStack {
    frames: Vec<String>,
}

impl ScopeStack {
    /// Empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a module or type
    pub fn push(&mut self, name: impl Into<String>) {
        self.frames.push(name.into());
    }

    /// Leave the innermost frame
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// `frame::frame::method`
    #[must_use]
    pub fn qualify(&self, method: &str) -> String {
        let mut name = self.frames.join("::");
        if !name.is_empty() {
            name.push_str("::");
        }
        name.push_str(method);
        name
    }
}

/// Name an `impl` block contributes to the scope: the last path segment of
/// its self type, seen through references, parens and groups.
#[must_use]
pub fn impl_type_name(ty: &Type) -> String {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .map_or_else(|| "_".to_string(), |s| s.ident.to_string()),
        Type::Reference(r) => impl_type_name(&r.elem),
        Type::Paren(p) => impl_type_name(&p.elem),
        Type::Group(g) => impl_type_name(&g.elem),
        _ => "_".to_string(),
    }
}

/// Whether the attributes include `#[cfg(test)]`
#[must_use]
pub fn is_cfg_test(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("cfg")
            && attr
                .parse_args::<syn::Ident>()
                .is_ok_and(|ident| ident == "test")
    })
}

/// Selects functions by the tail of their qualified name.
///
/// `divide`, `Calculator::divide` and `ops::Calculator::divide` all select
/// `ops::Calculator::divide`. `.` is accepted as a separator as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelector {
    segments: Vec<String>,
}

impl MethodSelector {
    /// Parse a selector; `None` when it names nothing
    #[must_use]
    pub fn parse(selector: &str) -> Option<Self> {
        let segments: Vec<String> = selector
            .split("::")
            .flat_map(|part| part.split('.'))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    /// Whether `qualified` ends with this selector
    #[must_use]
    pub fn matches(&self, qualified: &str) -> bool {
        let names: Vec<&str> = qualified.split("::").collect();
        names.len() >= self.segments.len()
            && names[names.len() - self.segments.len()..]
                .iter()
                .zip(&self.segments)
                .all(|(a, b)| *a == b)
    }
}

impl std::fmt::Display for MethodSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("::"))
    }
}
