use std::collections::HashSet;

use swc_core::atoms::Atom;
use swc_core::ecma::ast::*;

use crate::scope::{collect_pat_bindings, DeclarationKey};

/// Extracted declaration of a style value
#[derive(Clone, Debug)]
pub struct StyleNode {
  /// Declarator exported as `export var <declarator>` from the extracted module
  pub declarator: VarDeclarator,
  /// Name the value is exported under
  pub name: Atom,
}

#[derive(Clone, Debug)]
pub enum ExtractionNode {
  /// A declaration copied as-is because extracted styles depend on it
  Binding(ModuleItem),
  Style(StyleNode),
}

/// Everything written into the extracted module of one source file.
///
/// Nodes are kept in emission order, a node may only depend on nodes before it.
#[derive(Debug)]
pub struct ExtractionLedger {
  module_path: String,
  nodes: Vec<ExtractionNode>,
  emitted: HashSet<DeclarationKey>,
  /// Bindings whose style node is already in `nodes`
  appended_styles: HashSet<Id>,
}

impl ExtractionLedger {
  pub fn new(module_path: String) -> Self {
    ExtractionLedger {
      module_path,
      nodes: Vec::new(),
      emitted: HashSet::new(),
      appended_styles: HashSet::new(),
    }
  }

  pub fn module_path(&self) -> &str {
    &self.module_path
  }

  /// Appends `node` unconditionally
  pub fn emit(&mut self, node: ExtractionNode) {
    if let ExtractionNode::Style(style) = &node {
      let mut idents = vec![];
      collect_pat_bindings(&style.declarator.name, &mut idents);
      self
        .appended_styles
        .extend(idents.iter().map(|ident| ident.to_id()));
    }
    self.nodes.push(node);
  }

  /// Whether the style declaring `id` was already appended
  pub fn has_appended_style(&self, id: &Id) -> bool {
    self.appended_styles.contains(id)
  }

  pub fn has_emitted(&self, key: &DeclarationKey) -> bool {
    self.emitted.contains(key)
  }

  pub fn mark_emitted(&mut self, key: DeclarationKey) {
    self.emitted.insert(key);
  }

  pub fn emitted(&self) -> &HashSet<DeclarationKey> {
    &self.emitted
  }

  pub fn nodes(&self) -> &[ExtractionNode] {
    &self.nodes
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn into_nodes(self) -> Vec<ExtractionNode> {
    self.nodes
  }
}

/// Guards the style node of one extraction site, so it reaches the ledger
/// exactly once
#[derive(Debug)]
pub enum StyleEmission {
  Pending(StyleNode),
  Appended,
}

impl StyleEmission {
  pub fn new(style: StyleNode) -> Self {
    StyleEmission::Pending(style)
  }

  /// Appends the style to `ledger` if it wasn't already. No-op otherwise.
  pub fn append(&mut self, ledger: &mut ExtractionLedger) {
    if let StyleEmission::Pending(style) = std::mem::replace(self, StyleEmission::Appended) {
      ledger.emit(ExtractionNode::Style(style));
    }
  }

  pub fn is_appended(&self) -> bool {
    matches!(self, StyleEmission::Appended)
  }
}
