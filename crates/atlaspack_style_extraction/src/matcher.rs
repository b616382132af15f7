use std::collections::{HashMap, HashSet};

use swc_core::atoms::Atom;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::config::StyleExtractionConfig;

/// Decides whether a call expression invokes one of the extraction APIs.
///
/// Calls are matched through the identity of the import binding the callee
/// resolves to, so a local function that happens to be called `style`, or a
/// parameter shadowing the import, is never treated as an extraction site.
///
/// Both named and namespace imports are tracked:
///
/// ```js
/// import { style, styleVariants as variants } from '@macaron-css/core';
/// import * as macaron from '@macaron-css/core';
///
/// style({});          // matched
/// variants({});       // matched
/// macaron.style({});  // matched
/// ```
#[derive(Debug, Default)]
pub struct ExtractionApiMatcher {
  /// Local import bindings of extraction APIs, with the API they refer to
  api_bindings: HashMap<Id, Atom>,
  /// Namespace imports of the style package
  namespace_bindings: HashSet<Id>,
  apis: HashSet<Atom>,
}

impl ExtractionApiMatcher {
  pub fn new(module: &Module, config: &StyleExtractionConfig) -> Self {
    let mut collector = ApiImportCollector {
      config,
      matcher: ExtractionApiMatcher {
        apis: config
          .extraction_apis
          .iter()
          .map(|api| Atom::from(api.as_str()))
          .collect(),
        ..Default::default()
      },
    };
    module.visit_with(&mut collector);
    collector.matcher
  }

  /// Returns false when the module imports nothing that could trigger an extraction
  pub fn is_empty(&self) -> bool {
    self.api_bindings.is_empty() && self.namespace_bindings.is_empty()
  }

  /// The extraction API invoked by `call`, if any
  pub fn extraction_api(&self, call: &CallExpr) -> Option<Atom> {
    let Callee::Expr(callee) = &call.callee else {
      return None;
    };

    match &**callee {
      Expr::Ident(ident) => self.api_bindings.get(&ident.to_id()).cloned(),
      Expr::Member(MemberExpr {
        obj,
        prop: MemberProp::Ident(prop),
        ..
      }) => match &**obj {
        Expr::Ident(namespace) if self.namespace_bindings.contains(&namespace.to_id()) => {
          self.apis.contains(&prop.sym).then(|| prop.sym.clone())
        }
        _ => None,
      },
      _ => None,
    }
  }

  pub fn is_extraction_call(&self, call: &CallExpr) -> bool {
    self.extraction_api(call).is_some()
  }
}

struct ApiImportCollector<'a> {
  config: &'a StyleExtractionConfig,
  matcher: ExtractionApiMatcher,
}

impl Visit for ApiImportCollector<'_> {
  fn visit_import_decl(&mut self, import: &ImportDecl) {
    if import.type_only || &*import.src.value != self.config.package.as_str() {
      return;
    }

    for specifier in &import.specifiers {
      match specifier {
        ImportSpecifier::Named(named) if !named.is_type_only => {
          let imported = match &named.imported {
            Some(ModuleExportName::Ident(imported)) => imported.sym.clone(),
            Some(ModuleExportName::Str(imported)) => imported.value.clone(),
            None => named.local.sym.clone(),
          };

          if self.matcher.apis.contains(&imported) {
            self
              .matcher
              .api_bindings
              .insert(named.local.to_id(), imported);
          }
        }
        ImportSpecifier::Namespace(namespace) => {
          self
            .matcher
            .namespace_bindings
            .insert(namespace.local.to_id());
        }
        _ => {}
      }
    }
  }

  // Imports only appear at the top level
  fn visit_stmt(&mut self, _stmt: &Stmt) {}
}

#[cfg(test)]
mod tests {
  use atlaspack_swc_runner::test_utils::{run_test_visit_const, RunTestContext};
  use indoc::indoc;

  use super::*;

  /// Collects the API matched by every call in the module, in source order
  struct MatchRecorder {
    config: StyleExtractionConfig,
    matched: Vec<Option<String>>,
  }

  impl Visit for MatchRecorder {
    fn visit_module(&mut self, module: &Module) {
      let matcher = ExtractionApiMatcher::new(module, &self.config);
      let mut calls = CallCollector { calls: vec![] };
      module.visit_with(&mut calls);
      self.matched = calls
        .calls
        .iter()
        .map(|call| matcher.extraction_api(call).map(|api| api.to_string()))
        .collect();
    }
  }

  struct CallCollector {
    calls: Vec<CallExpr>,
  }

  impl Visit for CallCollector {
    fn visit_call_expr(&mut self, call: &CallExpr) {
      self.calls.push(call.clone());
      call.visit_children_with(self);
    }
  }

  fn matched_apis(code: &str) -> Vec<Option<String>> {
    run_test_visit_const(code, |_: RunTestContext| MatchRecorder {
      config: StyleExtractionConfig::default(),
      matched: vec![],
    })
    .visitor
    .matched
  }

  #[test]
  fn test_matches_named_imports() {
    let matched = matched_apis(indoc! {r#"
      import { style, styleVariants } from '@macaron-css/core';
      style({});
      styleVariants({});
    "#});

    assert_eq!(
      matched,
      vec![Some("style".to_string()), Some("styleVariants".to_string())]
    );
  }

  #[test]
  fn test_matches_renamed_import() {
    let matched = matched_apis(indoc! {r#"
      import { style as css } from '@macaron-css/core';
      css({});
    "#});

    assert_eq!(matched, vec![Some("style".to_string())]);
  }

  #[test]
  fn test_matches_namespace_import_members() {
    let matched = matched_apis(indoc! {r#"
      import * as macaron from '@macaron-css/core';
      macaron.style({});
      macaron.notAnApi({});
    "#});

    assert_eq!(matched, vec![Some("style".to_string()), None]);
  }

  #[test]
  fn test_ignores_other_packages_and_globals() {
    let matched = matched_apis(indoc! {r#"
      import { style } from './local-style';
      style({});
      styleVariants({});
    "#});

    assert_eq!(matched, vec![None, None]);
  }

  #[test]
  fn test_ignores_shadowed_import() {
    let matched = matched_apis(indoc! {r#"
      import { style } from '@macaron-css/core';
      function render(style) {
        return style({});
      }
      style({});
    "#});

    assert_eq!(matched, vec![None, Some("style".to_string())]);
  }

  #[test]
  fn test_ignores_non_api_imports() {
    let matched = matched_apis(indoc! {r#"
      import { someHelper } from '@macaron-css/core';
      someHelper({});
    "#});

    assert_eq!(matched, vec![None]);
  }
}
