use atlaspack_swc_runner::runner::RunWithTransformationError;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
  /// The value of an extraction call is bound to something other than an
  /// identifier or an array pattern of identifiers
  #[error(
    "Declaration should be an `ArrayPattern` or `Identifier`, found {found} at line {line} in {filename}"
  )]
  UnsupportedDeclarationShape {
    filename: String,
    found: &'static str,
    line: usize,
  },
  #[error(transparent)]
  Transformation(#[from] RunWithTransformationError),
}
