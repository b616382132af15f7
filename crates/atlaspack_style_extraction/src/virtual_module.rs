use std::collections::HashMap;

use swc_core::atoms::Atom;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::VisitMutWith;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::ledger::{ExtractionLedger, ExtractionNode, StyleNode};
use crate::rewriter::{Renamer, UidGenerator};
use crate::scope::collect_pat_bindings;

/// The module extracted styles are moved to
#[derive(Debug)]
pub struct AuxiliaryModule {
  /// File name of the module, written next to the source file
  pub path: String,
  pub module: Module,
}

/// Path of the extracted module of `filename`, stable across builds
pub fn virtual_module_path(filename: &str) -> String {
  format!("extracted_{:016x}.css.ts", xxh3_64(filename.as_bytes()))
}

/// Builds the extracted module from the ledger, in emission order.
///
/// `renames` maps the bindings of extracted declarations to their exported
/// names. Relocated bindings that would clash with another top-level name of
/// the extracted module are renamed with `uids`.
pub fn materialize(
  ledger: ExtractionLedger,
  mut renames: HashMap<Id, Atom>,
  uids: &mut UidGenerator,
) -> AuxiliaryModule {
  let path = ledger.module_path().to_string();
  let mut top_level: HashMap<Atom, Id> = HashMap::new();
  let mut body = vec![];

  for node in ledger.into_nodes() {
    let item = match node {
      ExtractionNode::Binding(item) => {
        for id in declared_ids(&item) {
          let name = renames.get(&id).cloned().unwrap_or_else(|| id.0.clone());
          match top_level.get(&name) {
            Some(existing) if *existing != id => {
              let fresh = uids.generate(&name);
              debug!(binding = %id.0, renamed = %fresh, "Renaming clashing relocated binding");
              renames.insert(id.clone(), fresh.clone());
              top_level.insert(fresh, id);
            }
            Some(_) => {}
            None => {
              top_level.insert(name, id);
            }
          }
        }
        item
      }
      ExtractionNode::Style(style) => {
        let mut declared = vec![];
        collect_pat_bindings(&style.declarator.name, &mut declared);
        for ident in declared {
          let id = ident.to_id();
          let name = renames.get(&id).cloned().unwrap_or_else(|| id.0.clone());
          top_level.insert(name, id);
        }
        style_export(style)
      }
    };

    body.push(item);
  }

  let mut module = Module {
    span: DUMMY_SP,
    body,
    shebang: None,
  };
  module.visit_mut_with(&mut Renamer::new(renames));

  AuxiliaryModule { path, module }
}

/// `export var <declarator>;`
fn style_export(style: StyleNode) -> ModuleItem {
  ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
    span: DUMMY_SP,
    decl: Decl::Var(Box::new(VarDecl {
      span: DUMMY_SP,
      ctxt: Default::default(),
      kind: VarDeclKind::Var,
      declare: false,
      decls: vec![style.declarator],
    })),
  }))
}

fn declared_ids(item: &ModuleItem) -> Vec<Id> {
  let mut idents = vec![];
  match item {
    ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
      for specifier in &import.specifiers {
        idents.push(match specifier {
          ImportSpecifier::Named(named) => named.local.clone(),
          ImportSpecifier::Default(default) => default.local.clone(),
          ImportSpecifier::Namespace(namespace) => namespace.local.clone(),
        });
      }
    }
    ModuleItem::Stmt(Stmt::Decl(decl)) => match decl {
      Decl::Var(var) => {
        for declarator in &var.decls {
          collect_pat_bindings(&declarator.name, &mut idents);
        }
      }
      Decl::Fn(fn_decl) => idents.push(fn_decl.ident.clone()),
      Decl::Class(class_decl) => idents.push(class_decl.ident.clone()),
      Decl::TsEnum(ts_enum) => idents.push(ts_enum.id.clone()),
      _ => {}
    },
    _ => {}
  }

  idents.iter().map(|ident| ident.to_id()).collect()
}

#[cfg(test)]
mod tests {
  use atlaspack_swc_runner::runner::emit_module;
  use atlaspack_swc_runner::test_utils::{remove_code_whitespace, run_test_visit_const, RunTestContext};
  use indoc::indoc;
  use pretty_assertions::assert_eq;
  use swc_core::common::sync::Lrc;
  use swc_core::common::SourceMap;
  use swc_core::ecma::visit::{Visit, VisitWith};

  use super::*;
  use crate::closure::build_closure;
  use crate::config::StyleExtractionConfig;
  use crate::matcher::ExtractionApiMatcher;
  use crate::scope::ScopeOracle;

  #[test]
  fn test_virtual_module_path_is_stable() {
    let path = virtual_module_path("src/button.tsx");

    assert_eq!(path, virtual_module_path("src/button.tsx"));
    assert_ne!(path, virtual_module_path("src/card.tsx"));
    assert!(path.starts_with("extracted_"));
    assert!(path.ends_with(".css.ts"));
    assert_eq!(path.len(), "extracted_".len() + 16 + ".css.ts".len());
  }

  /// Extracts every `const <name> = style(...)` declarator found inside
  /// functions, without touching the source module
  struct Materializer {
    source_map: Lrc<SourceMap>,
    output: String,
  }

  impl Visit for Materializer {
    fn visit_module(&mut self, module: &Module) {
      let matcher = ExtractionApiMatcher::new(module, &StyleExtractionConfig::default());
      let oracle = ScopeOracle::build(module, self.source_map.clone(), &matcher);
      let mut uids = UidGenerator::from_module(module);
      let mut ledger = ExtractionLedger::new(virtual_module_path("test.js"));
      let mut renames = HashMap::new();

      let mut sites = SiteFinder {
        matcher: &matcher,
        sites: vec![],
      };
      module.visit_with(&mut sites);

      for (declarator, span) in sites.sites {
        let Pat::Ident(binding) = &declarator.name else {
          continue;
        };
        let name = uids.generate(&binding.id.sym);
        renames.insert(binding.id.to_id(), name.clone());
        let style = StyleNode {
          declarator: declarator.clone(),
          name,
        };
        build_closure(&oracle, &mut ledger, span, style);
      }

      let auxiliary = materialize(ledger, renames, &mut uids);
      self.output = emit_module(&self.source_map, &auxiliary.module).unwrap().0;
    }
  }

  struct SiteFinder<'a> {
    matcher: &'a ExtractionApiMatcher,
    sites: Vec<(VarDeclarator, swc_core::common::Span)>,
  }

  impl Visit for SiteFinder<'_> {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
      if let Some(Expr::Call(call)) = declarator.init.as_deref() {
        if self.matcher.is_extraction_call(call) {
          self.sites.push((declarator.clone(), call.span));
          return;
        }
      }
      declarator.visit_children_with(self);
    }
  }

  fn materialized(code: &str) -> String {
    run_test_visit_const(code, |context: RunTestContext| Materializer {
      source_map: context.source_map,
      output: String::new(),
    })
    .visitor
    .output
  }

  #[test]
  fn test_materialize_renames_clashing_bindings() {
    let output = materialized(indoc! {r#"
      import { style } from '@macaron-css/core';
      const color = 'blue';
      const card = style({ color });
      function Button() {
        const color = 'red';
        const button = style({ color, borderColor: card });
        return button;
      }
    "#});

    assert_eq!(
      remove_code_whitespace(&output),
      remove_code_whitespace(indoc! {r#"
        import { style } from '@macaron-css/core';
        const color = 'blue';
        export var _card = style({
          color
        });
        const _color = 'red';
        export var _button = style({
          color: _color,
          borderColor: _card
        });
      "#})
    );
  }
}
