//! Lexical scope analysis over a resolved module.
//!
//! SWC's `resolver` already gives every identifier a `SyntaxContext`, so two
//! identifiers refer to the same binding exactly when their `Id`s are equal.
//! What the resolver does not keep around is *where* a binding was declared,
//! which statement declares it, how often it is referenced and which bindings
//! are visible at a given position. [`ScopeOracle`] records all of this in a
//! single pass before the extraction traversal starts mutating the module.

use std::collections::{HashMap, HashSet};

use swc_core::atoms::Atom;
use swc_core::common::sync::Lrc;
use swc_core::common::{BytePos, SourceMap, Span};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::matcher::ExtractionApiMatcher;

/// 1-based line, 0-based column
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
  pub line: usize,
  pub column: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceRange {
  pub start: Position,
  pub end: Position,
}

impl SourceRange {
  pub fn new(start: (usize, usize), end: (usize, usize)) -> Self {
    SourceRange {
      start: Position {
        line: start.0,
        column: start.1,
      },
      end: Position {
        line: end.0,
        column: end.1,
      },
    }
  }
}

/// Identity of a declaring statement.
///
/// Statements parsed from source are identified by their span, synthesized
/// ones (dummy span) by the first binding they declare.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclarationKey {
  Span(BytePos, BytePos),
  Synthetic(Id),
}

impl DeclarationKey {
  /// Key of a statement parsed from source
  pub fn from_span(span: Span) -> Option<Self> {
    (!span.is_dummy()).then_some(DeclarationKey::Span(span.lo, span.hi))
  }
}

#[derive(Clone, Debug)]
pub struct Declaration {
  pub key: DeclarationKey,
  /// Span of the whole declaring statement, without any `export` keyword
  pub span: Span,
  /// Statement to copy into the extracted module. `None` for bindings that
  /// can't be relocated on their own, like parameters, or for statements
  /// whose declarators are all extraction sites themselves.
  pub node: Option<ModuleItem>,
  /// Every binding declared by `node`
  pub declared: Vec<Id>,
}

#[derive(Clone, Debug)]
pub struct Binding {
  pub id: Id,
  declaration: Option<usize>,
  pub references: usize,
  /// The binding is initialized directly by an extraction call and is going to
  /// be extracted as a style of its own
  pub is_extraction_target: bool,
}

impl Binding {
  pub fn is_referenced(&self) -> bool {
    self.references > 0
  }
}

type ScopeId = usize;

#[derive(Debug)]
struct Scope {
  span: Span,
  parent: Option<ScopeId>,
  depth: usize,
  /// Bindings declared directly in this scope, in declaration order
  bindings: Vec<Id>,
}

pub struct ScopeOracle {
  source_map: Lrc<SourceMap>,
  scopes: Vec<Scope>,
  bindings: HashMap<Id, Binding>,
  declarations: Vec<Declaration>,
}

impl ScopeOracle {
  pub fn build(
    module: &Module,
    source_map: Lrc<SourceMap>,
    matcher: &ExtractionApiMatcher,
  ) -> Self {
    let mut builder = ScopeBuilder {
      matcher,
      scopes: vec![Scope {
        span: module.span,
        parent: None,
        depth: 0,
        bindings: vec![],
      }],
      stack: vec![0],
      function_stack: vec![0],
      bindings: HashMap::new(),
      declarations: vec![],
    };
    module.body.visit_with(&mut builder);

    let ScopeBuilder {
      scopes,
      mut bindings,
      declarations,
      ..
    } = builder;

    let references = count_references(module);
    for binding in bindings.values_mut() {
      binding.references = references.get(&binding.id).copied().unwrap_or(0);
    }

    ScopeOracle {
      source_map,
      scopes,
      bindings,
      declarations,
    }
  }

  pub fn binding(&self, id: &Id) -> Option<&Binding> {
    self.bindings.get(id)
  }

  pub fn declaration(&self, binding: &Binding) -> Option<&Declaration> {
    binding
      .declaration
      .and_then(|index| self.declarations.get(index))
  }

  /// All bindings visible at `span`, innermost scope first.
  ///
  /// Within a scope bindings come in declaration order. A binding shadowed by
  /// an inner binding of the same name is not visible.
  pub fn visible_bindings(&self, span: Span) -> Vec<&Binding> {
    let mut seen: HashSet<&Atom> = HashSet::new();
    let mut visible = vec![];
    let mut scope = Some(self.innermost_scope(span));

    while let Some(scope_id) = scope {
      let current = &self.scopes[scope_id];
      for id in &current.bindings {
        if !seen.insert(&id.0) {
          continue;
        }
        if let Some(binding) = self.bindings.get(id) {
          visible.push(binding);
        }
      }
      scope = current.parent;
    }

    visible
  }

  /// Line and column range of `span`, or `None` for synthesized nodes
  pub fn source_range(&self, span: Span) -> Option<SourceRange> {
    if span.is_dummy() {
      return None;
    }

    let start = self.source_map.lookup_char_pos(span.lo);
    let end = self.source_map.lookup_char_pos(span.hi);

    Some(SourceRange::new(
      (start.line, start.col.0),
      (end.line, end.col.0),
    ))
  }

  fn innermost_scope(&self, span: Span) -> ScopeId {
    if span.is_dummy() {
      return 0;
    }

    self
      .scopes
      .iter()
      .enumerate()
      .skip(1)
      .filter(|(_, scope)| scope.span.lo <= span.lo && span.hi <= scope.span.hi)
      .max_by_key(|(_, scope)| scope.depth)
      .map(|(id, _)| id)
      .unwrap_or(0)
  }
}

/// Collects every binding identifier declared by a pattern
pub(crate) fn collect_pat_bindings(pat: &Pat, out: &mut Vec<Ident>) {
  match pat {
    Pat::Ident(ident) => out.push(ident.id.clone()),
    Pat::Array(array) => {
      for elem in array.elems.iter().flatten() {
        collect_pat_bindings(elem, out);
      }
    }
    Pat::Object(object) => {
      for prop in &object.props {
        match prop {
          ObjectPatProp::KeyValue(kv) => collect_pat_bindings(&kv.value, out),
          ObjectPatProp::Assign(assign) => out.push(assign.key.id.clone()),
          ObjectPatProp::Rest(rest) => collect_pat_bindings(&rest.arg, out),
        }
      }
    }
    Pat::Rest(rest) => collect_pat_bindings(&rest.arg, out),
    Pat::Assign(assign) => collect_pat_bindings(&assign.left, out),
    Pat::Invalid(_) | Pat::Expr(_) => {}
  }
}

struct ScopeBuilder<'a> {
  matcher: &'a ExtractionApiMatcher,
  scopes: Vec<Scope>,
  stack: Vec<ScopeId>,
  /// Scopes `var` and function declarations are hoisted to
  function_stack: Vec<ScopeId>,
  bindings: HashMap<Id, Binding>,
  declarations: Vec<Declaration>,
}

impl ScopeBuilder<'_> {
  fn current_scope(&self) -> ScopeId {
    self.stack.last().copied().unwrap_or(0)
  }

  fn function_scope(&self) -> ScopeId {
    self.function_stack.last().copied().unwrap_or(0)
  }

  fn push_scope(&mut self, span: Span, is_function: bool) {
    let parent = self.current_scope();
    let depth = self.scopes[parent].depth + 1;
    self.scopes.push(Scope {
      span,
      parent: Some(parent),
      depth,
      bindings: vec![],
    });

    let id = self.scopes.len() - 1;
    self.stack.push(id);
    if is_function {
      self.function_stack.push(id);
    }
  }

  fn pop_scope(&mut self, is_function: bool) {
    self.stack.pop();
    if is_function {
      self.function_stack.pop();
    }
  }

  fn add_declaration(&mut self, span: Span, node: Option<ModuleItem>, declared: &[Ident]) -> usize {
    let key = if span.is_dummy() {
      match declared.first() {
        Some(ident) => DeclarationKey::Synthetic(ident.to_id()),
        None => DeclarationKey::Span(span.lo, span.hi),
      }
    } else {
      DeclarationKey::Span(span.lo, span.hi)
    };

    self.declarations.push(Declaration {
      key,
      span,
      node,
      declared: declared.iter().map(|ident| ident.to_id()).collect(),
    });
    self.declarations.len() - 1
  }

  fn register(
    &mut self,
    ident: &Ident,
    scope: ScopeId,
    declaration: Option<usize>,
    is_extraction_target: bool,
  ) {
    let id = ident.to_id();
    if self.bindings.contains_key(&id) {
      return;
    }

    self.scopes[scope].bindings.push(id.clone());
    self.bindings.insert(
      id.clone(),
      Binding {
        id,
        declaration,
        references: 0,
        is_extraction_target,
      },
    );
  }

  fn register_params<'p>(&mut self, params: impl IntoIterator<Item = &'p Pat>) {
    let scope = self.current_scope();
    for param in params {
      let mut idents = vec![];
      collect_pat_bindings(param, &mut idents);
      for ident in &idents {
        self.register(ident, scope, None, false);
      }
    }
  }

  fn is_extraction_declarator(&self, declarator: &VarDeclarator) -> bool {
    matches!(
      declarator.init.as_deref(),
      Some(Expr::Call(call)) if self.matcher.is_extraction_call(call)
    )
  }

  fn declare_var_statement(&mut self, var: &VarDecl) {
    let scope = match var.kind {
      VarDeclKind::Var => self.function_scope(),
      VarDeclKind::Let | VarDeclKind::Const => self.current_scope(),
    };

    // Declarators initialized by an extraction call reach the extracted module
    // through their own style export, never as part of a copied statement
    let mut relocated = var.clone();
    relocated
      .decls
      .retain(|declarator| !self.is_extraction_declarator(declarator));
    let node = (!relocated.decls.is_empty())
      .then(|| ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(relocated)))));

    let mut declared = vec![];
    for declarator in &var.decls {
      collect_pat_bindings(&declarator.name, &mut declared);
    }
    let declaration = self.add_declaration(var.span, node, &declared);

    for declarator in &var.decls {
      let is_extraction_target = self.is_extraction_declarator(declarator);
      let mut idents = vec![];
      collect_pat_bindings(&declarator.name, &mut idents);
      for ident in &idents {
        self.register(ident, scope, Some(declaration), is_extraction_target);
      }
    }
  }
}

impl Visit for ScopeBuilder<'_> {
  fn visit_import_decl(&mut self, import: &ImportDecl) {
    let locals: Vec<Ident> = import
      .specifiers
      .iter()
      .map(|specifier| match specifier {
        ImportSpecifier::Named(named) => named.local.clone(),
        ImportSpecifier::Default(default) => default.local.clone(),
        ImportSpecifier::Namespace(namespace) => namespace.local.clone(),
      })
      .collect();

    let node = ModuleItem::ModuleDecl(ModuleDecl::Import(import.clone()));
    let declaration = self.add_declaration(import.span, Some(node), &locals);
    for local in &locals {
      self.register(local, 0, Some(declaration), false);
    }
  }

  fn visit_decl(&mut self, decl: &Decl) {
    match decl {
      Decl::Var(var) => {
        self.declare_var_statement(var);
        for declarator in &var.decls {
          declarator.visit_with(self);
        }
      }
      Decl::Fn(fn_decl) => {
        let node = ModuleItem::Stmt(Stmt::Decl(decl.clone()));
        let declaration = self.add_declaration(
          fn_decl.function.span,
          Some(node),
          std::slice::from_ref(&fn_decl.ident),
        );
        let scope = self.function_scope();
        self.register(&fn_decl.ident, scope, Some(declaration), false);
        fn_decl.function.visit_with(self);
      }
      Decl::Class(class_decl) => {
        let node = ModuleItem::Stmt(Stmt::Decl(decl.clone()));
        let declaration = self.add_declaration(
          class_decl.class.span,
          Some(node),
          std::slice::from_ref(&class_decl.ident),
        );
        let scope = self.current_scope();
        self.register(&class_decl.ident, scope, Some(declaration), false);
        class_decl.class.visit_with(self);
      }
      Decl::TsEnum(ts_enum) => {
        let node = ModuleItem::Stmt(Stmt::Decl(decl.clone()));
        let declaration =
          self.add_declaration(ts_enum.span, Some(node), std::slice::from_ref(&ts_enum.id));
        let scope = self.current_scope();
        self.register(&ts_enum.id, scope, Some(declaration), false);
        ts_enum.visit_children_with(self);
      }
      Decl::TsInterface(_) | Decl::TsTypeAlias(_) | Decl::TsModule(_) | Decl::Using(_) => {
        decl.visit_children_with(self);
      }
    }
  }

  // Only reached for declarations in `for` heads, statements go through `visit_decl`
  fn visit_var_decl(&mut self, var: &VarDecl) {
    let scope = match var.kind {
      VarDeclKind::Var => self.function_scope(),
      VarDeclKind::Let | VarDeclKind::Const => self.current_scope(),
    };

    let mut declared = vec![];
    for declarator in &var.decls {
      collect_pat_bindings(&declarator.name, &mut declared);
    }
    let declaration = self.add_declaration(var.span, None, &declared);
    for ident in &declared {
      self.register(ident, scope, Some(declaration), false);
    }

    var.visit_children_with(self);
  }

  fn visit_function(&mut self, function: &Function) {
    self.push_scope(function.span, true);
    self.register_params(function.params.iter().map(|param| &param.pat));
    function.params.visit_with(self);
    if let Some(body) = &function.body {
      body.stmts.visit_with(self);
    }
    self.pop_scope(true);
  }

  fn visit_constructor(&mut self, constructor: &Constructor) {
    self.push_scope(constructor.span, true);
    self.register_params(constructor.params.iter().filter_map(|param| match param {
      ParamOrTsParamProp::Param(param) => Some(&param.pat),
      ParamOrTsParamProp::TsParamProp(_) => None,
    }));
    constructor.params.visit_with(self);
    if let Some(body) = &constructor.body {
      body.stmts.visit_with(self);
    }
    self.pop_scope(true);
  }

  fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
    self.push_scope(arrow.span, true);
    self.register_params(arrow.params.iter());
    arrow.params.visit_with(self);
    match &*arrow.body {
      BlockStmtOrExpr::BlockStmt(block) => block.stmts.visit_with(self),
      BlockStmtOrExpr::Expr(expr) => expr.visit_with(self),
    }
    self.pop_scope(true);
  }

  fn visit_block_stmt(&mut self, block: &BlockStmt) {
    self.push_scope(block.span, false);
    block.visit_children_with(self);
    self.pop_scope(false);
  }

  fn visit_for_stmt(&mut self, node: &ForStmt) {
    self.push_scope(node.span, false);
    node.visit_children_with(self);
    self.pop_scope(false);
  }

  fn visit_for_in_stmt(&mut self, node: &ForInStmt) {
    self.push_scope(node.span, false);
    node.visit_children_with(self);
    self.pop_scope(false);
  }

  fn visit_for_of_stmt(&mut self, node: &ForOfStmt) {
    self.push_scope(node.span, false);
    node.visit_children_with(self);
    self.pop_scope(false);
  }

  fn visit_catch_clause(&mut self, clause: &CatchClause) {
    self.push_scope(clause.span, false);
    if let Some(param) = &clause.param {
      self.register_params(std::iter::once(param));
      param.visit_with(self);
    }
    clause.body.stmts.visit_with(self);
    self.pop_scope(false);
  }
}

/// Number of references to every identifier of `node`.
///
/// Declaring occurrences (patterns, import specifiers, function names) are
/// not references.
pub(crate) fn count_references<N: VisitWith<ReferenceCounter>>(node: &N) -> HashMap<Id, usize> {
  let mut counter = ReferenceCounter::default();
  node.visit_with(&mut counter);
  counter.references
}

#[derive(Default)]
pub(crate) struct ReferenceCounter {
  references: HashMap<Id, usize>,
}

impl ReferenceCounter {
  fn reference(&mut self, ident: &Ident) {
    *self.references.entry(ident.to_id()).or_default() += 1;
  }
}

impl Visit for ReferenceCounter {
  fn visit_expr(&mut self, expr: &Expr) {
    if let Expr::Ident(ident) = expr {
      self.reference(ident);
    }
    expr.visit_children_with(self);
  }

  fn visit_prop(&mut self, prop: &Prop) {
    if let Prop::Shorthand(ident) = prop {
      self.reference(ident);
    }
    prop.visit_children_with(self);
  }

  fn visit_simple_assign_target(&mut self, target: &SimpleAssignTarget) {
    if let SimpleAssignTarget::Ident(ident) = target {
      self.reference(&ident.id);
    }
    target.visit_children_with(self);
  }

  fn visit_named_export(&mut self, export: &NamedExport) {
    // Re-exports from another module don't reference local bindings
    if export.src.is_some() {
      return;
    }

    for specifier in &export.specifiers {
      if let ExportSpecifier::Named(ExportNamedSpecifier {
        orig: ModuleExportName::Ident(orig),
        ..
      }) = specifier
      {
        self.reference(orig);
      }
    }
  }

  fn visit_ts_entity_name(&mut self, name: &TsEntityName) {
    if let TsEntityName::Ident(ident) = name {
      self.reference(ident);
    }
    name.visit_children_with(self);
  }

  fn visit_jsx_element_name(&mut self, name: &JSXElementName) {
    if let JSXElementName::Ident(ident) = name {
      self.reference(ident);
    }
    name.visit_children_with(self);
  }

  fn visit_jsx_object(&mut self, object: &JSXObject) {
    if let JSXObject::Ident(ident) = object {
      self.reference(ident);
    }
    object.visit_children_with(self);
  }
}
