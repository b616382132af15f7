use std::collections::HashMap;

use swc_core::atoms::Atom;
use swc_core::common::sync::Lrc;
use swc_core::common::util::take::Take;
use swc_core::common::{SourceMap, Span, DUMMY_SP};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};
use tracing::debug;

use crate::closure::build_closure;
use crate::config::StyleExtractionConfig;
use crate::error::ExtractionError;
use crate::ledger::{ExtractionLedger, StyleNode};
use crate::matcher::ExtractionApiMatcher;
use crate::rewriter::{prune_relocated, re_export, ImportRegistry, Renamer, UidGenerator};
use crate::scope::ScopeOracle;
use crate::shape::{classify_declarator, DeclarationShape};
use crate::virtual_module::{materialize, virtual_module_path, AuxiliaryModule};

/// Moves calls to the style APIs, and the declarations they depend on, into an
/// extracted module.
///
/// A declaration initialized by a style call is removed, and its binding is
/// replaced by an import of the extracted value:
///
/// ```js
/// import { style } from '@macaron-css/core';
/// const color = 'red';
/// export const button = style({ color });
/// ```
///
/// Becomes:
///
/// ```js
/// import { _button as _button2 } from "extracted_<hash>.css.ts";
/// export { _button2 as button };
/// ```
///
/// With the extracted module:
///
/// ```js
/// import { style } from '@macaron-css/core';
/// const color = 'red';
/// export var _button = style({ color });
/// ```
///
/// Calls that don't initialize a declaration are replaced by the import
/// directly, and named after the closest identifier.
pub struct StyleExtractionVisitor<'a> {
  config: &'a StyleExtractionConfig,
  filename: String,
  source_map: Lrc<SourceMap>,
  state: Option<ExtractionState>,
  /// Names of the enclosing declarations, properties and assignments
  name_hints: Vec<Atom>,
  error: Option<ExtractionError>,
  auxiliary: Option<AuxiliaryModule>,
}

/// State of the extraction of one module
struct ExtractionState {
  matcher: ExtractionApiMatcher,
  oracle: ScopeOracle,
  uids: UidGenerator,
  ledger: ExtractionLedger,
  imports: ImportRegistry,
  /// Extracted bindings to the local name of their import
  main_renames: HashMap<Id, Atom>,
  /// Extracted bindings to their name in the extracted module
  aux_renames: HashMap<Id, Atom>,
  re_exports: Vec<ModuleItem>,
}

impl<'a> StyleExtractionVisitor<'a> {
  pub fn new(config: &'a StyleExtractionConfig, filename: &str, source_map: Lrc<SourceMap>) -> Self {
    StyleExtractionVisitor {
      config,
      filename: filename.to_string(),
      source_map,
      state: None,
      name_hints: Vec::new(),
      error: None,
      auxiliary: None,
    }
  }

  /// First fatal error hit while visiting. The visited module must be discarded.
  pub fn take_error(&mut self) -> Option<ExtractionError> {
    self.error.take()
  }

  /// The extracted module, if anything was extracted
  pub fn take_auxiliary(&mut self) -> Option<AuxiliaryModule> {
    self.auxiliary.take()
  }

  fn is_extraction_declarator(&self, declarator: &VarDeclarator) -> bool {
    let Some(state) = &self.state else {
      return false;
    };

    matches!(
      declarator.init.as_deref(),
      Some(Expr::Call(call)) if state.matcher.is_extraction_call(call)
    )
  }

  fn line_of(&self, span: Span) -> usize {
    if span.is_dummy() {
      return 0;
    }
    self.source_map.lookup_char_pos(span.lo).line
  }

  /// Extracts the declarators of a variable statement that are initialized by
  /// a style call, visiting the remaining ones
  fn visit_mut_var_statement(&mut self, var: &mut VarDecl, exported: bool) {
    for mut declarator in std::mem::take(&mut var.decls) {
      if self.error.is_none() && self.is_extraction_declarator(&declarator) {
        self.extract_declarator(&declarator, exported);
        continue;
      }

      declarator.visit_mut_with(self);
      var.decls.push(declarator);
    }
  }

  fn extract_declarator(&mut self, declarator: &VarDeclarator, exported: bool) {
    let Some(Expr::Call(call)) = declarator.init.as_deref() else {
      return;
    };

    let shape = match classify_declarator(declarator) {
      Ok(shape) => shape,
      Err(found) => {
        self.error = Some(ExtractionError::UnsupportedDeclarationShape {
          filename: self.filename.clone(),
          found,
          line: self.line_of(declarator.span),
        });
        return;
      }
    };

    let Some(state) = self.state.as_mut() else {
      return;
    };

    match shape {
      DeclarationShape::Single(ident) => {
        state.extract_binding(ident, declarator.clone(), call.span, exported);
      }
      DeclarationShape::Destructured(elements) => {
        for (index, ident) in elements {
          let isolated = isolate_element(declarator, index);
          state.extract_binding(ident, isolated, call.span, exported);
        }
      }
      DeclarationShape::Bare => {}
    }
  }
}

impl ExtractionState {
  fn extract_binding(&mut self, ident: Ident, declarator: VarDeclarator, call_span: Span, exported: bool) {
    let name = self.uids.generate(&ident.sym);
    let local = self.imports.register(&name, &mut self.uids);

    debug!(
      binding = %ident.sym,
      name = %name,
      local = %local.sym,
      exported,
      "Extracting declaration"
    );

    self.main_renames.insert(ident.to_id(), local.sym.clone());
    self.aux_renames.insert(ident.to_id(), name.clone());
    if exported {
      self.re_exports.push(re_export(&local, &ident.sym));
    }

    let style = StyleNode { declarator, name };
    build_closure(&self.oracle, &mut self.ledger, call_span, style);
  }

  /// Extracts a call whose value isn't bound, returning the identifier that
  /// replaces it
  fn extract_call(&mut self, call: CallExpr, hint: Option<&Atom>) -> Ident {
    let hint = match hint {
      Some(hint) => format!("$$extracted_{hint}"),
      None => "$$unknown_extracted_identifier".to_string(),
    };
    let name = self.uids.generate(&hint);
    let local = self.imports.register(&name, &mut self.uids);

    debug!(name = %name, local = %local.sym, "Extracting call");

    let call_span = call.span;
    let declarator = VarDeclarator {
      span: DUMMY_SP,
      name: Pat::Ident(BindingIdent::from(Ident::new_no_ctxt(name.clone(), DUMMY_SP))),
      init: Some(Box::new(Expr::Call(call))),
      definite: false,
    };
    let style = StyleNode { declarator, name };
    build_closure(&self.oracle, &mut self.ledger, call_span, style);

    local
  }
}

/// Copy of `declarator` binding only the array element at `index`
fn isolate_element(declarator: &VarDeclarator, index: usize) -> VarDeclarator {
  let mut isolated = declarator.clone();
  if let Pat::Array(array) = &mut isolated.name {
    array.elems.truncate(index + 1);
    for (i, element) in array.elems.iter_mut().enumerate() {
      if i != index {
        *element = None;
      }
    }
  }
  isolated
}

impl VisitMut for StyleExtractionVisitor<'_> {
  fn visit_mut_module(&mut self, module: &mut Module) {
    let matcher = ExtractionApiMatcher::new(module, self.config);
    if matcher.is_empty() {
      debug!(package = %self.config.package, "Module doesn't import any extraction API");
      return;
    }

    let oracle = ScopeOracle::build(module, self.source_map.clone(), &matcher);
    let module_path = virtual_module_path(&self.filename);
    self.state = Some(ExtractionState {
      matcher,
      oracle,
      uids: UidGenerator::from_module(module),
      ledger: ExtractionLedger::new(module_path.clone()),
      imports: ImportRegistry::new(module_path),
      main_renames: HashMap::new(),
      aux_renames: HashMap::new(),
      re_exports: Vec::new(),
    });

    module.visit_mut_children_with(self);

    let Some(state) = self.state.take() else {
      return;
    };
    if self.error.is_some() || state.ledger.is_empty() {
      return;
    }

    let ExtractionState {
      mut uids,
      ledger,
      imports,
      main_renames,
      aux_renames,
      re_exports,
      ..
    } = state;

    module.visit_mut_with(&mut Renamer::new(main_renames));

    let mut body = imports.into_module_items();
    body.append(&mut module.body);
    body.extend(re_exports);
    module.body = body;

    if self.config.prune_relocated_bindings {
      prune_relocated(module, ledger.emitted());
    }

    debug!(
      path = ledger.module_path(),
      nodes = ledger.nodes().len(),
      "Materializing extracted module"
    );
    self.auxiliary = Some(materialize(ledger, aux_renames, &mut uids));
  }

  fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
    let mut kept = Vec::with_capacity(items.len());

    for mut item in std::mem::take(items) {
      if self.error.is_some() {
        kept.push(item);
        continue;
      }

      let keep = match &mut item {
        ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => {
          self.visit_mut_var_statement(var, false);
          !var.decls.is_empty()
        }
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
          decl: Decl::Var(var),
          ..
        })) => {
          self.visit_mut_var_statement(var, true);
          !var.decls.is_empty()
        }
        _ => {
          item.visit_mut_with(self);
          true
        }
      };

      if keep {
        kept.push(item);
      }
    }

    *items = kept;
  }

  fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
    let mut kept = Vec::with_capacity(stmts.len());

    for mut stmt in std::mem::take(stmts) {
      if self.error.is_some() {
        kept.push(stmt);
        continue;
      }

      let keep = match &mut stmt {
        Stmt::Decl(Decl::Var(var)) => {
          self.visit_mut_var_statement(var, false);
          !var.decls.is_empty()
        }
        _ => {
          stmt.visit_mut_with(self);
          true
        }
      };

      if keep {
        kept.push(stmt);
      }
    }

    *stmts = kept;
  }

  fn visit_mut_expr(&mut self, expr: &mut Expr) {
    if self.error.is_some() {
      return;
    }

    let is_site = match (&*expr, &self.state) {
      (Expr::Call(call), Some(state)) => state.matcher.is_extraction_call(call),
      _ => false,
    };

    if is_site {
      let hint = self.name_hints.last().cloned();
      if let (Expr::Call(call), Some(state)) = (expr.take(), self.state.as_mut()) {
        *expr = Expr::Ident(state.extract_call(call, hint.as_ref()));
      }
      return;
    }

    expr.visit_mut_children_with(self);
  }

  fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
    let hint = match &declarator.name {
      Pat::Ident(binding) => Some(binding.id.sym.clone()),
      _ => None,
    };
    self.with_hint(hint, |visitor| declarator.visit_mut_children_with(visitor));
  }

  fn visit_mut_key_value_prop(&mut self, prop: &mut KeyValueProp) {
    let hint = match &prop.key {
      PropName::Ident(ident) => Some(ident.sym.clone()),
      PropName::Str(str) => Some(str.value.clone()),
      _ => None,
    };
    self.with_hint(hint, |visitor| prop.visit_mut_children_with(visitor));
  }

  fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
    let hint = Some(fn_decl.ident.sym.clone());
    self.with_hint(hint, |visitor| fn_decl.visit_mut_children_with(visitor));
  }

  fn visit_mut_class_decl(&mut self, class_decl: &mut ClassDecl) {
    let hint = Some(class_decl.ident.sym.clone());
    self.with_hint(hint, |visitor| class_decl.visit_mut_children_with(visitor));
  }

  fn visit_mut_assign_expr(&mut self, assign: &mut AssignExpr) {
    let hint = match &assign.left {
      AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => Some(binding.id.sym.clone()),
      _ => None,
    };
    self.with_hint(hint, |visitor| assign.visit_mut_children_with(visitor));
  }
}

impl StyleExtractionVisitor<'_> {
  fn with_hint(&mut self, hint: Option<Atom>, visit: impl FnOnce(&mut Self)) {
    let pushed = hint.is_some();
    if let Some(hint) = hint {
      self.name_hints.push(hint);
    }
    visit(self);
    if pushed {
      self.name_hints.pop();
    }
  }
}
