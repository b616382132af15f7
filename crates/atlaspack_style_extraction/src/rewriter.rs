//! Primitives used to rewrite a module once its extraction sites are known:
//! fresh identifiers, imports from the extracted module, renames keyed by
//! binding identity, re-exports and pruning of relocated declarations.

use std::collections::{HashMap, HashSet};

use swc_core::atoms::Atom;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

use crate::scope::{collect_pat_bindings, count_references, DeclarationKey};

/// Generates identifiers unique within a module.
///
/// `hint` is reduced to identifier characters and stripped of leading
/// underscores and trailing digits, then tried as `_hint`, `_hint2`, `_hint3`...
#[derive(Debug, Default)]
pub struct UidGenerator {
  used: HashSet<Atom>,
}

impl UidGenerator {
  /// A generator avoiding every identifier that appears in `module`
  pub fn from_module(module: &Module) -> Self {
    let mut collector = NameCollector::default();
    module.visit_with(&mut collector);
    UidGenerator {
      used: collector.names,
    }
  }

  pub fn generate(&mut self, hint: &str) -> Atom {
    let mut name: String = hint
      .chars()
      .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
      .collect();
    name = name
      .trim_start_matches('_')
      .trim_end_matches(|c: char| c.is_ascii_digit())
      .to_string();
    if name.is_empty() {
      name = "temp".to_string();
    }

    let mut i = 1;
    loop {
      let candidate: Atom = if i > 1 {
        format!("_{name}{i}").into()
      } else {
        format!("_{name}").into()
      };

      if self.used.insert(candidate.clone()) {
        return candidate;
      }
      i += 1;
    }
  }
}

#[derive(Default)]
struct NameCollector {
  names: HashSet<Atom>,
}

impl Visit for NameCollector {
  fn visit_ident(&mut self, ident: &Ident) {
    self.names.insert(ident.sym.clone());
  }

  fn visit_ident_name(&mut self, ident: &IdentName) {
    self.names.insert(ident.sym.clone());
  }
}

/// Imports of extracted values, one import statement per value
#[derive(Debug)]
pub struct ImportRegistry {
  module_path: String,
  imports: Vec<(Atom, Ident)>,
}

impl ImportRegistry {
  pub fn new(module_path: String) -> Self {
    ImportRegistry {
      module_path,
      imports: vec![],
    }
  }

  /// Local identifier bound to the export `name` of the extracted module
  pub fn register(&mut self, name: &Atom, uids: &mut UidGenerator) -> Ident {
    if let Some((_, local)) = self.imports.iter().find(|(imported, _)| imported == name) {
      return local.clone();
    }

    let local = Ident::new_no_ctxt(uids.generate(name), DUMMY_SP);
    self.imports.push((name.clone(), local.clone()));
    local
  }

  pub fn into_module_items(self) -> Vec<ModuleItem> {
    let ImportRegistry {
      module_path,
      imports,
    } = self;

    imports
      .into_iter()
      .map(|(imported, local)| {
        ModuleItem::ModuleDecl(ModuleDecl::Import(ImportDecl {
          span: DUMMY_SP,
          specifiers: vec![ImportSpecifier::Named(ImportNamedSpecifier {
            span: DUMMY_SP,
            local,
            imported: Some(ModuleExportName::Ident(Ident::new_no_ctxt(
              imported, DUMMY_SP,
            ))),
            is_type_only: false,
          })],
          src: Box::new(Str {
            span: DUMMY_SP,
            value: format!("./{module_path}").into(),
            raw: None,
          }),
          type_only: false,
          with: None,
          phase: Default::default(),
        }))
      })
      .collect()
  }
}

/// `export { <local> as <exported> };`
pub fn re_export(local: &Ident, exported: &Atom) -> ModuleItem {
  ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(NamedExport {
    span: DUMMY_SP,
    specifiers: vec![ExportSpecifier::Named(ExportNamedSpecifier {
      span: DUMMY_SP,
      orig: ModuleExportName::Ident(local.clone()),
      exported: Some(ModuleExportName::Ident(Ident::new_no_ctxt(
        exported.clone(),
        DUMMY_SP,
      ))),
      is_type_only: false,
    })],
    src: None,
    type_only: false,
    with: None,
  }))
}

/// Renames identifiers by binding identity.
///
/// Shorthand properties, shorthand patterns and import/export specifiers are
/// expanded so the names they expose don't change.
pub struct Renamer {
  renames: HashMap<Id, Atom>,
}

impl Renamer {
  pub fn new(renames: HashMap<Id, Atom>) -> Self {
    Renamer { renames }
  }

  fn renamed(&self, ident: &Ident) -> Option<&Atom> {
    self.renames.get(&ident.to_id())
  }
}

impl VisitMut for Renamer {
  fn visit_mut_ident(&mut self, ident: &mut Ident) {
    if let Some(name) = self.renames.get(&ident.to_id()) {
      ident.sym = name.clone();
    }
  }

  fn visit_mut_prop(&mut self, prop: &mut Prop) {
    if let Prop::Shorthand(ident) = prop {
      if let Some(name) = self.renamed(ident).cloned() {
        let key = PropName::Ident(IdentName::new(ident.sym.clone(), ident.span));
        let mut value = ident.clone();
        value.sym = name;
        *prop = Prop::KeyValue(KeyValueProp {
          key,
          value: Box::new(Expr::Ident(value)),
        });
        return;
      }
    }

    prop.visit_mut_children_with(self);
  }

  fn visit_mut_object_pat_prop(&mut self, prop: &mut ObjectPatProp) {
    if let ObjectPatProp::Assign(AssignPatProp { span, key, value }) = prop {
      if let Some(name) = self.renamed(&key.id).cloned() {
        let span = *span;
        let prop_key = PropName::Ident(IdentName::new(key.id.sym.clone(), key.id.span));
        let mut binding = key.clone();
        binding.id.sym = name;
        let left = Pat::Ident(binding);

        let mut value = value.take();
        value.visit_mut_with(self);
        let pattern = match value {
          Some(right) => Pat::Assign(AssignPat {
            span,
            left: Box::new(left),
            right,
          }),
          None => left,
        };

        *prop = ObjectPatProp::KeyValue(KeyValuePatProp {
          key: prop_key,
          value: Box::new(pattern),
        });
        return;
      }
    }

    prop.visit_mut_children_with(self);
  }

  fn visit_mut_export_named_specifier(&mut self, specifier: &mut ExportNamedSpecifier) {
    if let ModuleExportName::Ident(orig) = &specifier.orig {
      if specifier.exported.is_none() && self.renamed(orig).is_some() {
        specifier.exported = Some(ModuleExportName::Ident(Ident::new_no_ctxt(
          orig.sym.clone(),
          orig.span,
        )));
      }
    }

    specifier.orig.visit_mut_with(self);
  }

  fn visit_mut_import_named_specifier(&mut self, specifier: &mut ImportNamedSpecifier) {
    if specifier.imported.is_none() && self.renamed(&specifier.local).is_some() {
      specifier.imported = Some(ModuleExportName::Ident(Ident::new_no_ctxt(
        specifier.local.sym.clone(),
        specifier.local.span,
      )));
    }

    specifier.local.visit_mut_with(self);
  }

  // Re-exports from other modules name foreign bindings
  fn visit_mut_named_export(&mut self, export: &mut NamedExport) {
    if export.src.is_none() {
      export.visit_mut_children_with(self);
    }
  }
}

/// Key of the declaration a top-level item corresponds to in the scope
/// analysis, if it is a candidate for pruning
fn prunable_key(item: &ModuleItem) -> Option<DeclarationKey> {
  match item {
    ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => DeclarationKey::from_span(import.span),
    ModuleItem::Stmt(Stmt::Decl(decl)) => match decl {
      Decl::Var(var) => DeclarationKey::from_span(var.span),
      Decl::Fn(fn_decl) => DeclarationKey::from_span(fn_decl.function.span),
      Decl::Class(class_decl) => DeclarationKey::from_span(class_decl.class.span),
      Decl::TsEnum(ts_enum) => DeclarationKey::from_span(ts_enum.span),
      _ => None,
    },
    _ => None,
  }
}

/// Removes top-level declarations listed in `relocated` that nothing in
/// `module` references anymore.
///
/// Runs until no more declarations can be removed, removing unreferenced
/// import specifiers and declarators individually. Exported declarations are
/// never removed. Returns the number of removed bindings.
pub fn prune_relocated(module: &mut Module, relocated: &HashSet<DeclarationKey>) -> usize {
  let mut removed = 0;

  loop {
    let references = count_references(&*module);
    let is_referenced = |ident: &Ident| references.get(&ident.to_id()).is_some_and(|count| *count > 0);
    let mut removed_this_pass = 0;

    module.body.retain_mut(|item| {
      let Some(key) = prunable_key(item) else {
        return true;
      };
      if !relocated.contains(&key) {
        return true;
      }

      match item {
        ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
          let before = import.specifiers.len();
          import.specifiers.retain(|specifier| {
            let local = match specifier {
              ImportSpecifier::Named(named) => &named.local,
              ImportSpecifier::Default(default) => &default.local,
              ImportSpecifier::Namespace(namespace) => &namespace.local,
            };
            is_referenced(local)
          });
          removed_this_pass += before - import.specifiers.len();
          !import.specifiers.is_empty()
        }
        ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => {
          let before = var.decls.len();
          var.decls.retain(|declarator| {
            let mut idents = vec![];
            collect_pat_bindings(&declarator.name, &mut idents);
            idents.iter().any(|ident| is_referenced(ident))
          });
          removed_this_pass += before - var.decls.len();
          !var.decls.is_empty()
        }
        ModuleItem::Stmt(Stmt::Decl(decl)) => {
          let ident = match decl {
            Decl::Fn(fn_decl) => &fn_decl.ident,
            Decl::Class(class_decl) => &class_decl.ident,
            Decl::TsEnum(ts_enum) => &ts_enum.id,
            _ => return true,
          };
          if is_referenced(ident) {
            true
          } else {
            removed_this_pass += 1;
            false
          }
        }
        _ => true,
      }
    });

    if removed_this_pass == 0 {
      break;
    }
    removed += removed_this_pass;
  }

  if removed > 0 {
    debug!(removed, "Pruned relocated declarations");
  }
  removed
}
