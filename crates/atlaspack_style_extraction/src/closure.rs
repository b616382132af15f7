//! Decides which declarations follow an extraction site into the extracted
//! module, and in which order.

use std::collections::HashSet;

use swc_core::common::Span;
use swc_core::ecma::ast::*;
use tracing::trace;

use crate::ledger::{ExtractionLedger, ExtractionNode, StyleEmission, StyleNode};
use crate::scope::{
  collect_pat_bindings, count_references, DeclarationKey, Position, ScopeOracle, SourceRange,
};

/// Where a visible binding is declared relative to the extraction call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
  /// Declared before the call, or enclosing it
  TruePredecessor,
  /// Declared at or after the call
  SameOrLater,
  /// The binding or the call has no source position
  Unpositioned,
  /// Its declaration was relocated by an earlier extraction site
  AlreadyEmitted,
}

/// Compares the ranges of a declaration and of an extraction call.
///
/// Source order approximates evaluation order, loops and conditionals are not
/// taken into account.
pub fn classify_placement(binding: Option<SourceRange>, call: Option<SourceRange>) -> Placement {
  let (Some(binding), Some(call)) = (binding, call) else {
    return Placement::Unpositioned;
  };

  let ends_before = binding.end.line < call.start.line;
  let encloses = binding.start.line < call.start.line && binding.end.line > call.end.line;
  let earlier_on_same_line =
    binding.start.line == call.start.line && binding.start.column < call.start.column;

  if ends_before || encloses || earlier_on_same_line {
    Placement::TruePredecessor
  } else {
    Placement::SameOrLater
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClosureDecision {
  pub id: Id,
  pub placement: Placement,
  pub relocated: bool,
}

/// When a relocated declaration can be emitted, relative to the style of the
/// current site
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Readiness {
  BeforeStyle,
  /// Reads the value of the current site
  AfterStyle,
  /// Reads the value of a site that wasn't extracted yet. Left to that site.
  Deferred,
}

struct Relocation {
  /// Index of the binding's decision
  decision: usize,
  key: DeclarationKey,
  start: Option<Position>,
  node: ModuleItem,
  declared: Vec<Id>,
  references: HashSet<Id>,
  /// Function declarations are hoisted and only read their references when
  /// called
  hoisted: bool,
  readiness: Readiness,
}

impl Relocation {
  fn depends_on(&self, other: &Relocation) -> bool {
    other
      .declared
      .iter()
      .any(|id| self.references.contains(id))
  }
}

/// Relocates the dependencies of one extraction site into `ledger`, along with
/// the site's style.
///
/// Every referenced binding visible at the call is relocated once per ledger,
/// unless it reads the value of an extraction site whose style isn't in the
/// ledger yet. Relocated declarations are emitted after the declarations they
/// reference, in source order otherwise. Declarations reading the current
/// site's value are emitted after its style.
pub fn build_closure(
  oracle: &ScopeOracle,
  ledger: &mut ExtractionLedger,
  call_span: Span,
  style: StyleNode,
) -> Vec<ClosureDecision> {
  let call_range = oracle.source_range(call_span);
  let mut decisions = vec![];
  let mut relocations: Vec<Relocation> = vec![];

  let mut current = vec![];
  collect_pat_bindings(&style.declarator.name, &mut current);
  let current: HashSet<Id> = current.iter().map(|ident| ident.to_id()).collect();

  for binding in oracle.visible_bindings(call_span) {
    if binding.is_extraction_target {
      trace!(binding = %binding.id.0, "Skipping extraction target");
      continue;
    }

    let Some(declaration) = oracle.declaration(binding) else {
      continue;
    };
    let Some(node) = &declaration.node else {
      trace!(binding = %binding.id.0, "Skipping binding without a relocatable declaration");
      continue;
    };

    let selected = relocations
      .iter()
      .any(|relocation| relocation.key == declaration.key);
    if selected || ledger.has_emitted(&declaration.key) {
      decisions.push(ClosureDecision {
        id: binding.id.clone(),
        placement: Placement::AlreadyEmitted,
        relocated: false,
      });
      continue;
    }

    let binding_range = oracle.source_range(declaration.span);
    let placement = classify_placement(binding_range, call_range);
    if placement != Placement::Unpositioned && !binding.is_referenced() {
      trace!(binding = %binding.id.0, ?placement, "Skipping unreferenced binding");
      decisions.push(ClosureDecision {
        id: binding.id.clone(),
        placement,
        relocated: false,
      });
      continue;
    }

    let references: HashSet<Id> = count_references(node).into_keys().collect();
    let hoisted = matches!(node, ModuleItem::Stmt(Stmt::Decl(Decl::Fn(_))));
    let reads_pending_style = |target: &Id| {
      !ledger.has_appended_style(target)
        && oracle
          .binding(target)
          .is_some_and(|found| found.is_extraction_target)
    };
    let readiness = if hoisted {
      Readiness::BeforeStyle
    } else if references
      .iter()
      .any(|id| !current.contains(id) && reads_pending_style(id))
    {
      Readiness::Deferred
    } else if references.iter().any(|id| current.contains(id)) {
      Readiness::AfterStyle
    } else {
      Readiness::BeforeStyle
    };

    decisions.push(ClosureDecision {
      id: binding.id.clone(),
      placement,
      relocated: readiness != Readiness::Deferred,
    });
    relocations.push(Relocation {
      decision: decisions.len() - 1,
      key: declaration.key.clone(),
      start: binding_range.map(|range| range.start),
      node: node.clone(),
      declared: declaration.declared.clone(),
      references,
      hoisted,
      readiness,
    });
  }

  propagate_readiness(&mut relocations);

  let mut before = vec![];
  let mut after = vec![];
  for relocation in relocations {
    let decision = &mut decisions[relocation.decision];
    decision.relocated = relocation.readiness != Readiness::Deferred;
    trace!(
      binding = %decision.id.0,
      placement = ?decision.placement,
      readiness = ?relocation.readiness,
      relocated = decision.relocated,
      "Visited binding"
    );

    match relocation.readiness {
      Readiness::BeforeStyle => before.push(relocation),
      Readiness::AfterStyle => after.push(relocation),
      Readiness::Deferred => {}
    }
  }

  emit_relocations(ledger, before);
  let mut emission = StyleEmission::new(style);
  emission.append(ledger);
  emit_relocations(ledger, after);

  decisions
}

/// A declaration can't be emitted before the declarations it references
fn propagate_readiness(relocations: &mut [Relocation]) {
  loop {
    let mut changed = false;
    for index in 0..relocations.len() {
      if relocations[index].hoisted {
        continue;
      }

      let required = relocations
        .iter()
        .enumerate()
        .filter(|(other, dependency)| *other != index && relocations[index].depends_on(dependency))
        .map(|(_, dependency)| dependency.readiness)
        .max();

      if let Some(required) = required {
        if required > relocations[index].readiness {
          relocations[index].readiness = required;
          changed = true;
        }
      }
    }

    if !changed {
      break;
    }
  }
}

/// Emits `relocations` in dependency order, falling back to source order
/// (unpositioned first) between independent declarations and within cycles
fn emit_relocations(ledger: &mut ExtractionLedger, mut relocations: Vec<Relocation>) {
  relocations.sort_by_key(|relocation| relocation.start);

  while !relocations.is_empty() {
    let next = (0..relocations.len())
      .find(|&index| {
        !relocations
          .iter()
          .enumerate()
          .any(|(other, dependency)| other != index && relocations[index].depends_on(dependency))
      })
      .unwrap_or(0);

    let relocation = relocations.remove(next);
    ledger.mark_emitted(relocation.key);
    ledger.emit(ExtractionNode::Binding(relocation.node));
  }
}

#[cfg(test)]
mod tests {
  use atlaspack_swc_runner::test_utils::{run_test_visit, run_test_visit_const, RunTestContext};
  use indoc::indoc;
  use pretty_assertions::assert_eq;
  use swc_core::common::sync::Lrc;
  use swc_core::common::{SourceMap, DUMMY_SP};
  use swc_core::ecma::visit::{Visit, VisitMut, VisitWith};

  use super::*;
  use crate::config::StyleExtractionConfig;
  use crate::matcher::ExtractionApiMatcher;

  #[test]
  fn test_classify_placement() {
    let call = Some(SourceRange::new((5, 10), (5, 30)));

    assert_eq!(
      classify_placement(Some(SourceRange::new((1, 0), (2, 5))), call),
      Placement::TruePredecessor
    );
    // Encloses the call
    assert_eq!(
      classify_placement(Some(SourceRange::new((4, 0), (7, 2))), call),
      Placement::TruePredecessor
    );
    // Same line, earlier column
    assert_eq!(
      classify_placement(Some(SourceRange::new((5, 0), (5, 31))), call),
      Placement::TruePredecessor
    );
    assert_eq!(
      classify_placement(Some(SourceRange::new((5, 12), (5, 20))), call),
      Placement::SameOrLater
    );
    assert_eq!(
      classify_placement(Some(SourceRange::new((8, 0), (8, 10))), call),
      Placement::SameOrLater
    );
    // Starts on the line before but ends on the call's last line
    assert_eq!(
      classify_placement(Some(SourceRange::new((4, 0), (5, 40))), call),
      Placement::SameOrLater
    );
    assert_eq!(classify_placement(None, call), Placement::Unpositioned);
    assert_eq!(
      classify_placement(Some(SourceRange::new((1, 0), (1, 5))), None),
      Placement::Unpositioned
    );
  }

  /// Runs the closure of every extraction call, in source order, against one
  /// ledger
  struct ClosureRunner {
    source_map: Lrc<SourceMap>,
    decisions: Vec<Vec<(String, Placement, bool)>>,
    ledger: Vec<String>,
  }

  impl Visit for ClosureRunner {
    fn visit_module(&mut self, module: &Module) {
      let matcher = ExtractionApiMatcher::new(module, &StyleExtractionConfig::default());
      let oracle = ScopeOracle::build(module, self.source_map.clone(), &matcher);
      let mut ledger = ExtractionLedger::new("extracted.css.ts".into());

      let mut sites = SiteFinder {
        matcher: &matcher,
        sites: vec![],
      };
      module.visit_with(&mut sites);

      for (index, (span, declarator)) in sites.sites.into_iter().enumerate() {
        let name = format!("style{index}");
        let declarator = declarator.unwrap_or_else(|| VarDeclarator {
          span: DUMMY_SP,
          name: Pat::Ident(BindingIdent::from(Ident::new_no_ctxt(
            name.as_str().into(),
            DUMMY_SP,
          ))),
          init: None,
          definite: false,
        });
        let style = StyleNode {
          declarator,
          name: name.as_str().into(),
        };

        let decisions = build_closure(&oracle, &mut ledger, span, style);
        self.decisions.push(
          decisions
            .into_iter()
            .map(|decision| (decision.id.0.to_string(), decision.placement, decision.relocated))
            .collect(),
        );
      }

      self.ledger = ledger.nodes().iter().map(describe).collect();
    }
  }

  /// Extraction calls, with the declarator they initialize if any
  struct SiteFinder<'a> {
    matcher: &'a ExtractionApiMatcher,
    sites: Vec<(Span, Option<VarDeclarator>)>,
  }

  impl Visit for SiteFinder<'_> {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
      if let Some(Expr::Call(call)) = declarator.init.as_deref() {
        if self.matcher.is_extraction_call(call) {
          self.sites.push((call.span, Some(declarator.clone())));
          call.args.visit_with(self);
          return;
        }
      }
      declarator.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, call: &CallExpr) {
      if self.matcher.is_extraction_call(call) {
        self.sites.push((call.span, None));
      }
      call.visit_children_with(self);
    }
  }

  fn describe(node: &ExtractionNode) -> String {
    match node {
      ExtractionNode::Style(style) => format!("style {}", style.name),
      ExtractionNode::Binding(ModuleItem::ModuleDecl(ModuleDecl::Import(import))) => {
        format!("import {}", import.src.value)
      }
      ExtractionNode::Binding(ModuleItem::Stmt(Stmt::Decl(Decl::Var(var)))) => {
        let mut idents = vec![];
        for declarator in &var.decls {
          collect_pat_bindings(&declarator.name, &mut idents);
        }
        let names: Vec<String> = idents.iter().map(|ident| ident.sym.to_string()).collect();
        format!("var {}", names.join(", "))
      }
      ExtractionNode::Binding(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(fn_decl)))) => {
        format!("function {}", fn_decl.ident.sym)
      }
      ExtractionNode::Binding(_) => "other".to_string(),
    }
  }

  fn run(code: &str) -> ClosureRunner {
    run_test_visit_const(code, |context: RunTestContext| ClosureRunner {
      source_map: context.source_map,
      decisions: vec![],
      ledger: vec![],
    })
    .visitor
  }

  #[test]
  fn test_predecessor_is_relocated_before_style() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const helper = 1;
      const unused = 2;
      const s = style({ width: helper });
    "#});

    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var helper",
        "style style0",
      ]
    );
    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("helper".to_string(), Placement::TruePredecessor, true),
        ("unused".to_string(), Placement::TruePredecessor, false),
      ]
    );
  }

  #[test]
  fn test_shared_dependencies_are_emitted_once() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const color = 'red';
      const a = style({ color });
      const b = style({ color });
      const c = style({ background: color });
    "#});

    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var color",
        "style style0",
        "style style1",
        "style style2",
      ]
    );
    assert_eq!(
      result.decisions[2],
      vec![
        ("style".to_string(), Placement::AlreadyEmitted, false),
        ("color".to_string(), Placement::AlreadyEmitted, false),
      ]
    );
  }

  #[test]
  fn test_enclosing_declaration_is_a_predecessor() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const theme = {
        button: style({ color: 'red' }),
      };
      console.log(theme);
    "#});

    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("theme".to_string(), Placement::TruePredecessor, true),
      ]
    );
    assert_eq!(
      result.ledger,
      vec!["import @macaron-css/core", "var theme", "style style0"]
    );
  }

  #[test]
  fn test_later_bindings_are_relocated_before_style() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const a = style({ color: pick() });
      function pick() {
        return base;
      }
      const base = 'red';
    "#});

    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("pick".to_string(), Placement::SameOrLater, true),
        ("base".to_string(), Placement::SameOrLater, true),
      ]
    );
    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var base",
        "function pick",
        "style style0",
      ]
    );
  }

  #[test]
  fn test_statement_with_several_bindings_is_relocated_once() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const small = 1, large = 2;
      export const a = style({ width: small, height: large });
    "#});

    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var small, large",
        "style style0",
      ]
    );
    assert_eq!(result.decisions[0][2], ("large".to_string(), Placement::AlreadyEmitted, false));
  }

  #[test]
  fn test_inner_scope_bindings_are_relocated() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const base = 10;
      function Button(props) {
        const size = base * 2;
        const button = style({ width: size });
        return button;
      }
    "#});

    assert_eq!(
      result.decisions[0],
      vec![
        ("size".to_string(), Placement::TruePredecessor, true),
        ("style".to_string(), Placement::TruePredecessor, true),
        ("base".to_string(), Placement::TruePredecessor, true),
        ("Button".to_string(), Placement::TruePredecessor, false),
      ]
    );
    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var base",
        "var size",
        "style style0",
      ]
    );
  }

  #[test]
  fn test_binding_reading_the_current_style_is_emitted_after_it() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const a = style({});
      const helper = { a };
      export const b = style({ selectors: helper });
    "#});

    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("helper".to_string(), Placement::SameOrLater, true),
      ]
    );
    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "style style0",
        "var helper",
        "style style1",
      ]
    );
  }

  #[test]
  fn test_binding_reading_a_later_style_waits_for_it() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      const a = style({});
      const b = style({});
      const helper = { b };
      export const c = style({ selectors: helper });
    "#});

    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("helper".to_string(), Placement::SameOrLater, false),
      ]
    );
    assert_eq!(
      result.decisions[1],
      vec![
        ("style".to_string(), Placement::AlreadyEmitted, false),
        ("helper".to_string(), Placement::SameOrLater, true),
      ]
    );
    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "style style0",
        "style style1",
        "var helper",
        "style style2",
      ]
    );
  }

  #[test]
  fn test_dependencies_are_emitted_before_their_dependents() {
    let result = run(indoc! {r#"
      import { style } from '@macaron-css/core';
      function f() {
        const inner = base;
        return style({ color: inner });
      }
      const base = 'red';
    "#});

    assert_eq!(
      result.ledger,
      vec![
        "import @macaron-css/core",
        "var base",
        "var inner",
        "style style0",
      ]
    );
  }

  /// Inserts a declaration without source position after the first import
  struct WithSyntheticDeclaration(ClosureRunner);

  impl VisitMut for WithSyntheticDeclaration {
    fn visit_mut_module(&mut self, module: &mut Module) {
      let declaration = ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: Default::default(),
        kind: VarDeclKind::Const,
        declare: false,
        decls: vec![VarDeclarator {
          span: DUMMY_SP,
          name: Pat::Ident(BindingIdent::from(Ident::new_no_ctxt(
            "synthetic".into(),
            DUMMY_SP,
          ))),
          init: Some(Box::new(Expr::Lit(Lit::Num(Number {
            span: DUMMY_SP,
            value: 1.0,
            raw: None,
          })))),
          definite: false,
        }],
      }))));
      module.body.insert(1, declaration);

      self.0.visit_module(module);
    }
  }

  #[test]
  fn test_unpositioned_declarations_are_relocated_even_if_unreferenced() {
    let result = run_test_visit(
      indoc! {r#"
        import { style } from '@macaron-css/core';
        const unused = 2;
        const s = style({});
      "#},
      |context: RunTestContext| {
        WithSyntheticDeclaration(ClosureRunner {
          source_map: context.source_map,
          decisions: vec![],
          ledger: vec![],
        })
      },
    )
    .visitor
    .0;

    assert_eq!(
      result.decisions[0],
      vec![
        ("style".to_string(), Placement::TruePredecessor, true),
        ("synthetic".to_string(), Placement::Unpositioned, true),
        ("unused".to_string(), Placement::TruePredecessor, false),
      ]
    );
    assert_eq!(
      result.ledger,
      vec![
        "var synthetic",
        "import @macaron-css/core",
        "style style0",
      ]
    );
  }
}
