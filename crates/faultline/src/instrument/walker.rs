//! The syntax walk shared by scanning and injection.

use super::probe::{self, ProbeForm};
use super::scope::{impl_type_name, is_cfg_test, MethodSelector, ScopeStack};
use crate::mapping::ProbeRecord;
use crate::syntax::{SourceTree, TextEdit};
use std::ops::Range;
use syn::visit::{self, Visit};
use syn::{Block, Item, Signature, Stmt};

/// A probe statement found in the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FoundProbe {
    pub statement: Range<usize>,
    pub target: Range<usize>,
    pub form: ProbeForm,
    pub probe_id: Option<String>,
}

/// Where freshly injected probes write to and which file they belong to
#[derive(Debug, Clone, Copy)]
pub(crate) struct InjectTarget<'a> {
    pub source_file: Option<&'a str>,
    pub coverage_override: Option<&'a str>,
    pub include_test_modules: bool,
}

/// Walks one file keeping module/type scope and the current function.
///
/// In scan mode it only collects existing probes. In inject mode it also plans
/// one probe insertion before every eligible statement of every selected
/// function. The method stack holds `None` while inside a context where a
/// runtime call is not allowed (const items, types, const generics).
pub(crate) struct ProbeWalker<'a> {
    tree: &'a SourceTree,
    selector: Option<&'a MethodSelector>,
    inject: Option<InjectTarget<'a>>,
    scope: ScopeStack,
    methods: Vec<Option<String>>,
    line_ending: &'static str,
    pub found: Vec<FoundProbe>,
    pub edits: Vec<TextEdit>,
    pub probes: Vec<ProbeRecord>,
    pub matched_methods: usize,
}

impl<'a> ProbeWalker<'a> {
    pub fn scan(tree: &'a SourceTree, selector: Option<&'a MethodSelector>) -> Self {
        Self::new(tree, selector, None)
    }

    pub fn inject(
        tree: &'a SourceTree,
        selector: Option<&'a MethodSelector>,
        target: InjectTarget<'a>,
    ) -> Self {
        Self::new(tree, selector, Some(target))
    }

    fn new(
        tree: &'a SourceTree,
        selector: Option<&'a MethodSelector>,
        inject: Option<InjectTarget<'a>>,
    ) -> Self {
        let line_ending = if tree.text().contains("\r\n") {
            "\r\n"
        } else {
            "\n"
        };
        Self {
            tree,
            selector,
            inject,
            scope: ScopeStack::new(),
            methods: Vec::new(),
            line_ending,
            found: Vec::new(),
            edits: Vec::new(),
            probes: Vec::new(),
            matched_methods: 0,
        }
    }

    pub fn walk(mut self) -> Self {
        let file = self.tree.file();
        self.visit_file(file);
        self
    }

    fn current_method(&self) -> Option<&str> {
        self.methods.last().and_then(|m| m.as_deref())
    }

    fn enter_fn(&mut self, sig: &Signature) {
        let name = sig.ident.to_string();
        let selected = self
            .selector
            .map_or(true, |s| s.matches(&self.scope.qualify(&name)));
        if selected {
            self.matched_methods += 1;
        }
        let active = selected && sig.constness.is_none();
        self.methods.push(active.then_some(name));
    }

    fn suspended<F: FnOnce(&mut Self)>(&mut self, f: F) {
        self.methods.push(None);
        f(self);
        self.methods.pop();
    }

    fn in_scope<F: FnOnce(&mut Self)>(&mut self, name: String, f: F) {
        self.scope.push(name);
        f(self);
        self.scope.pop();
    }

    fn plan_insertions(&mut self, block: &Block, method: &str) {
        let Some(target) = self.inject else {
            return;
        };
        let mut after_probe = false;
        for stmt in &block.stmts {
            if probe::recognize(stmt).is_some() {
                after_probe = true;
                continue;
            }
            let skip = after_probe || matches!(stmt, Stmt::Item(_));
            after_probe = false;
            if !skip {
                self.insert_probe(stmt, method, target);
            }
        }
    }

    fn insert_probe(&mut self, stmt: &Stmt, method: &str, target: InjectTarget<'_>) {
        let start = self.tree.range_of(stmt).start;
        let line_start = self.tree.line_start(start);
        let lead = &self.tree.text()[line_start..start];

        let id = probe::new_probe_id();
        let coverage_file = target
            .coverage_override
            .map_or_else(|| probe::default_coverage_file(method), str::to_string);
        let statement = probe::render(&coverage_file, &id);
        let text = if lead.chars().all(char::is_whitespace) {
            format!("{statement}{}{lead}", self.line_ending)
        } else {
            format!("{statement} ")
        };

        self.edits.push(TextEdit::insert(start, text));
        self.probes.push(ProbeRecord::new(
            &id,
            &self.scope.qualify(method),
            target.source_file,
        ));
    }
}

impl<'a> Visit<'a> for ProbeWalker<'a> {
    fn visit_item(&mut self, node: &'a Item) {
        match node {
            Item::Fn(_) | Item::Mod(_) | Item::Impl(_) | Item::Trait(_) => {
                visit::visit_item(self, node);
            }
            _ => self.suspended(|w| visit::visit_item(w, node)),
        }
    }

    fn visit_item_mod(&mut self, node: &'a syn::ItemMod) {
        let skip_tests = self.inject.is_some_and(|t| !t.include_test_modules);
        if skip_tests && is_cfg_test(&node.attrs) {
            return;
        }
        if node.content.is_none() {
            return;
        }
        self.in_scope(node.ident.to_string(), |w| visit::visit_item_mod(w, node));
    }

    fn visit_item_impl(&mut self, node: &'a syn::ItemImpl) {
        self.in_scope(impl_type_name(&node.self_ty), |w| {
            visit::visit_item_impl(w, node);
        });
    }

    fn visit_item_trait(&mut self, node: &'a syn::ItemTrait) {
        self.in_scope(node.ident.to_string(), |w| visit::visit_item_trait(w, node));
    }

    fn visit_item_fn(&mut self, node: &'a syn::ItemFn) {
        self.enter_fn(&node.sig);
        visit::visit_item_fn(self, node);
        self.methods.pop();
    }

    fn visit_impl_item_fn(&mut self, node: &'a syn::ImplItemFn) {
        self.enter_fn(&node.sig);
        visit::visit_impl_item_fn(self, node);
        self.methods.pop();
    }

    fn visit_trait_item_fn(&mut self, node: &'a syn::TraitItemFn) {
        self.enter_fn(&node.sig);
        visit::visit_trait_item_fn(self, node);
        self.methods.pop();
    }

    fn visit_impl_item_const(&mut self, node: &'a syn::ImplItemConst) {
        self.suspended(|w| visit::visit_impl_item_const(w, node));
    }

    fn visit_trait_item_const(&mut self, node: &'a syn::TraitItemConst) {
        self.suspended(|w| visit::visit_trait_item_const(w, node));
    }

    fn visit_signature(&mut self, node: &'a Signature) {
        self.suspended(|w| visit::visit_signature(w, node));
    }

    fn visit_type(&mut self, node: &'a syn::Type) {
        self.suspended(|w| visit::visit_type(w, node));
    }

    fn visit_generic_argument(&mut self, node: &'a syn::GenericArgument) {
        self.suspended(|w| visit::visit_generic_argument(w, node));
    }

    fn visit_expr_const(&mut self, node: &'a syn::ExprConst) {
        self.suspended(|w| visit::visit_expr_const(w, node));
    }

    fn visit_expr_repeat(&mut self, node: &'a syn::ExprRepeat) {
        self.visit_expr(&node.expr);
        self.suspended(|w| w.visit_expr(&node.len));
    }

    fn visit_block(&mut self, node: &'a Block) {
        if let Some(method) = self.current_method().map(str::to_string) {
            self.plan_insertions(node, &method);
        }
        visit::visit_block(self, node);
    }

    fn visit_stmt(&mut self, node: &'a Stmt) {
        if let Some(call) = probe::recognize(node) {
            if self.selector.is_none() || self.current_method().is_some() {
                self.found.push(FoundProbe {
                    statement: self.tree.range_of(node),
                    target: self.tree.range_of(call.target),
                    form: call.form,
                    probe_id: call.probe_id(),
                });
            }
            return;
        }
        visit::visit_stmt(self, node);
    }
}

/// Range to delete when removing a probe statement.
///
/// A probe alone on its line goes with the whole line; an inline probe goes
/// with the spaces that follow it.
pub(crate) fn removal_range(tree: &SourceTree, statement: &Range<usize>) -> Range<usize> {
    let text = tree.text();
    let line_start = tree.line_start(statement.start);
    let line_end = tree.line_end(statement.end);
    let alone = text[line_start..statement.start]
        .chars()
        .all(char::is_whitespace)
        && text[statement.end..line_end]
            .chars()
            .all(char::is_whitespace);
    if alone {
        return line_start..line_end;
    }
    let rest = &text[statement.end..];
    let trailing = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    statement.start..statement.end + trailing
}
