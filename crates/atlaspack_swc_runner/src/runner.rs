use std::string::FromUtf8Error;

use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, Globals, Mark, SourceMap, GLOBALS};
use swc_core::ecma::ast::Module;
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{EsSyntax, Parser, Syntax, TsSyntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

pub struct RunContext {
  /// Source-map in use
  pub source_map: Lrc<SourceMap>,
  /// Global mark from SWC resolver
  pub global_mark: Mark,
  /// Unresolved mark from SWC resolver
  pub unresolved_mark: Mark,
}

pub struct RunVisitResult<V> {
  pub output_code: String,
  #[allow(unused)]
  pub visitor: V,
  pub source_map: Vec<u8>,
  /// Source-map the module was parsed into, so further modules synthesized by
  /// the visitor can be emitted against the same files
  pub cm: Lrc<SourceMap>,
}

/// Per-file options for a run
#[derive(Clone, Debug)]
pub struct RunOptions {
  /// Name the source file is registered under in the source-map
  pub filename: Option<String>,
  pub syntax: Syntax,
}

impl Default for RunOptions {
  fn default() -> Self {
    RunOptions {
      filename: None,
      syntax: Syntax::Es(EsSyntax::default()),
    }
  }
}

impl RunOptions {
  /// Options for `filename`, picking the parser syntax from its extension
  pub fn for_filename(filename: &str) -> Self {
    RunOptions {
      filename: Some(filename.to_string()),
      syntax: syntax_for_filename(filename),
    }
  }

  fn is_typescript(&self) -> bool {
    matches!(self.syntax, Syntax::Typescript(_))
  }
}

pub fn syntax_for_filename(name: &str) -> Syntax {
  let is_typescript = [".ts", ".tsx", ".mts", ".cts"]
    .iter()
    .any(|extension| name.ends_with(extension));

  if is_typescript {
    Syntax::Typescript(TsSyntax {
      tsx: name.ends_with(".tsx"),
      decorators: true,
      ..Default::default()
    })
  } else {
    Syntax::Es(EsSyntax {
      jsx: name.ends_with(".jsx") || name.ends_with(".js"),
      decorators: true,
      import_attributes: true,
      ..Default::default()
    })
  }
}

/// Runner of SWC transformations
///
/// * Parse `code` with SWC
/// * Run a visitor over it
/// * Return the result
///
pub fn run_visit<V: VisitMut>(
  code: &str,
  make_visit: impl FnOnce(RunContext) -> V,
) -> Result<RunVisitResult<V>, RunWithTransformationError> {
  run_visit_with_options(code, RunOptions::default(), make_visit)
}

/// Same as `run_visit` but parses `code` with the given per-file options
pub fn run_visit_with_options<V: VisitMut>(
  code: &str,
  options: RunOptions,
  make_visit: impl FnOnce(RunContext) -> V,
) -> Result<RunVisitResult<V>, RunWithTransformationError> {
  let (output_code, visitor, source_map, cm) = run_with_transformation(
    code,
    options,
    |run_test_context: RunContext, module: &mut Module| {
      let mut visit = make_visit(run_test_context);
      module.visit_mut_with(&mut visit);
      visit
    },
  )?;
  Ok(RunVisitResult {
    output_code,
    visitor,
    source_map,
    cm,
  })
}

/// Same as `run_visit` but for `Visit` instead of `VisitMut`
pub fn run_visit_const<V: Visit>(
  code: &str,
  make_visit: impl FnOnce(RunContext) -> V,
) -> Result<RunVisitResult<V>, RunWithTransformationError> {
  let (output_code, visitor, source_map, cm) = run_with_transformation(
    code,
    RunOptions::default(),
    |run_test_context: RunContext, module: &mut Module| {
      let mut visit = make_visit(run_test_context);
      module.visit_with(&mut visit);
      visit
    },
  )?;
  Ok(RunVisitResult {
    output_code,
    visitor,
    source_map,
    cm,
  })
}

#[derive(Debug, thiserror::Error)]
pub enum RunWithTransformationError {
  #[error("Failed to parse module: {0:?}")]
  SwcParse(swc_core::ecma::parser::error::Error),
  #[error("IO Error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Invalid utf-8 output: {0}")]
  InvalidUtf8Output(#[from] FromUtf8Error),
  #[error("Failed to generate source map")]
  SourceMap(#[from] sourcemap::Error),
}

type RunWithTransformationOutput<R> = (String, R, Vec<u8>, Lrc<SourceMap>);

/// Parse code, run resolver over it, then run the `tranform` function with the parsed module
/// codegen and return the results.
fn run_with_transformation<R>(
  code: &str,
  options: RunOptions,
  transform: impl FnOnce(RunContext, &mut Module) -> R,
) -> Result<RunWithTransformationOutput<R>, RunWithTransformationError> {
  let source_map = Lrc::new(SourceMap::default());
  let file_name = match &options.filename {
    Some(filename) => FileName::Custom(filename.clone()),
    None => FileName::Anon,
  };
  let source_file = source_map.new_source_file(Lrc::new(file_name), code.into());

  let lexer = Lexer::new(
    options.syntax,
    Default::default(),
    StringInput::from(&*source_file),
    None,
  );

  let mut parser = Parser::new_from(lexer);
  let mut module = parser
    .parse_module()
    .map_err(RunWithTransformationError::SwcParse)?;

  GLOBALS.set(
    &Globals::new(),
    || -> Result<RunWithTransformationOutput<R>, RunWithTransformationError> {
      let global_mark = Mark::new();
      let unresolved_mark = Mark::new();
      module.visit_mut_with(&mut resolver(
        unresolved_mark,
        global_mark,
        options.is_typescript(),
      ));

      let context = RunContext {
        source_map: source_map.clone(),
        global_mark,
        unresolved_mark,
      };
      let result = transform(context, &mut module);

      let (output_code, output_map_buffer) = emit_module(&source_map, &module)?;

      Ok((output_code, result, output_map_buffer, source_map.clone()))
    },
  )
}

/// Print `module` with the given source-map, returning the code and its
/// serialized source-map.
///
/// Used for modules that never went through a parse, like the ones a visitor
/// synthesizes next to the file it transformed.
pub fn emit_module(
  source_map: &Lrc<SourceMap>,
  module: &Module,
) -> Result<(String, Vec<u8>), RunWithTransformationError> {
  let mut line_pos_buffer = vec![];
  let mut output_buffer = vec![];
  let writer = JsWriter::new(
    source_map.clone(),
    "\n",
    &mut output_buffer,
    Some(&mut line_pos_buffer),
  );
  let mut emitter = swc_core::ecma::codegen::Emitter {
    cfg: Default::default(),
    cm: source_map.clone(),
    comments: None,
    wr: writer,
  };
  emitter.emit_module(module)?;
  let output_code = String::from_utf8(output_buffer)?;
  let built_map = source_map.build_source_map(&line_pos_buffer);
  let mut output_map_buffer = vec![];
  built_map.to_writer(&mut output_map_buffer)?;

  Ok((output_code, output_map_buffer))
}

#[cfg(test)]
mod tests {
  use swc_core::common::DUMMY_SP;
  use swc_core::ecma::ast::{Lit, ModuleItem, Str};
  use swc_core::ecma::visit::VisitMut;

  use super::*;

  #[test]
  fn test_example() {
    struct Visitor;
    impl VisitMut for Visitor {
      fn visit_mut_lit(&mut self, n: &mut Lit) {
        *n = Lit::Str(Str::from("replacement"));
      }
    }

    let code = r#"console.log('test!')"#;
    let RunVisitResult { output_code, .. } = run_visit(code, |_: RunContext| Visitor).unwrap();
    assert_eq!(
      output_code,
      r#"console.log("replacement");
"#
    );
  }

  #[test]
  fn test_typescript_from_filename() {
    struct Noop;
    impl VisitMut for Noop {}

    let code = r#"const value: number = 1;"#;
    let RunVisitResult { output_code, .. } = run_visit_with_options(
      code,
      RunOptions::for_filename("styles.css.ts"),
      |_: RunContext| Noop,
    )
    .unwrap();
    assert_eq!(
      output_code,
      r#"const value: number = 1;
"#
    );
  }

  #[test]
  fn test_emit_synthesized_module() {
    struct Noop;
    impl VisitMut for Noop {}

    let RunVisitResult { cm, .. } = run_visit("", |_: RunContext| Noop).unwrap();
    let module = Module {
      span: DUMMY_SP,
      body: vec![ModuleItem::Stmt(
        swc_core::ecma::ast::Stmt::Expr(swc_core::ecma::ast::ExprStmt {
          span: DUMMY_SP,
          expr: Box::new(swc_core::ecma::ast::Expr::Lit(Lit::Str(Str::from("synthesized")))),
        }),
      )],
      shebang: None,
    };

    let (output_code, _) = emit_module(&cm, &module).unwrap();
    assert_eq!(output_code, "\"synthesized\";\n");
  }
}
