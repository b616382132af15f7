//! Extraction of style definitions into a separate module.
//!
//! Calls to the style APIs of a package (`@macaron-css/core` by default) are
//! moved, together with every declaration they depend on, into an extracted
//! module that can be evaluated on its own at build time. The source module
//! imports the extracted values instead.
//!
//! ```
//! use atlaspack_style_extraction::{extract_styles, StyleExtractionConfig};
//!
//! let output = extract_styles(
//!   &StyleExtractionConfig::default(),
//!   "button.js",
//!   "import { style } from '@macaron-css/core';\nexport const button = style({ color: 'red' });",
//! )
//! .unwrap();
//!
//! let auxiliary = output.auxiliary.unwrap();
//! assert!(output.code.contains(&format!("\"./{}\"", auxiliary.path)));
//! assert!(auxiliary.code.contains("export var _button = style("));
//! ```

use atlaspack_swc_runner::runner::{emit_module, run_visit_with_options, RunOptions, RunVisitResult};
use tracing::debug;

pub use crate::config::StyleExtractionConfig;
pub use crate::error::ExtractionError;
pub use crate::virtual_module::virtual_module_path;
pub use crate::visitor::StyleExtractionVisitor;

pub mod closure;
pub mod config;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod rewriter;
pub mod scope;
pub mod shape;
pub mod virtual_module;
pub mod visitor;

/// Result of extracting the styles of one source file
#[derive(Debug)]
pub struct ExtractionOutput {
  pub code: String,
  /// Source map of `code`, empty when the source was returned as-is
  pub map: Vec<u8>,
  /// Extracted module, if the source had anything to extract
  pub auxiliary: Option<AuxiliaryOutput>,
}

#[derive(Debug)]
pub struct AuxiliaryOutput {
  /// File name of the extracted module, imported by `code` as `./<path>`
  pub path: String,
  pub code: String,
}

/// Extracts the styles of `code`, read from `filename`.
///
/// Sources that don't mention the configured package are returned unchanged.
#[tracing::instrument(level = "debug", skip_all, fields(filename = %filename))]
pub fn extract_styles(
  config: &StyleExtractionConfig,
  filename: &str,
  code: &str,
) -> Result<ExtractionOutput, ExtractionError> {
  if !config.should_transform(code) {
    debug!("Skipping source without style package");
    return Ok(ExtractionOutput {
      code: code.to_string(),
      map: Vec::new(),
      auxiliary: None,
    });
  }

  let RunVisitResult {
    output_code,
    mut visitor,
    source_map,
    cm,
  } = run_visit_with_options(code, RunOptions::for_filename(filename), |context| {
    StyleExtractionVisitor::new(config, filename, context.source_map)
  })?;

  if let Some(error) = visitor.take_error() {
    return Err(error);
  }

  let auxiliary = match visitor.take_auxiliary() {
    Some(auxiliary) => {
      let (auxiliary_code, _) = emit_module(&cm, &auxiliary.module)?;
      Some(AuxiliaryOutput {
        path: auxiliary.path,
        code: auxiliary_code,
      })
    }
    None => None,
  };

  debug!(extracted = auxiliary.is_some(), "Extracted styles");

  Ok(ExtractionOutput {
    code: output_code,
    map: source_map,
    auxiliary,
  })
}
